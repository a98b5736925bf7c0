//! Decline catalog: failed attempts per gateway code with their most common messages

use crate::error::{AnalyticsError, Result};
use crate::scoring::EnrichedRow;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const TOP_MESSAGES: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct DeclineEntry {
    pub gateway_code: String,
    pub declines: u64,
    pub distinct_messages: usize,
    /// Most frequent messages with their counts
    pub top_messages: Vec<(String, u64)>,
}

/// One entry per gateway code seen on a failed attempt, most declines first.
pub fn decline_catalog(rows: &[EnrichedRow]) -> Result<Vec<DeclineEntry>> {
    if !rows.is_empty() && rows.iter().all(|r| r.tx.gateway_code.is_none()) {
        return Err(AnalyticsError::missing("gateway_code"));
    }

    let mut by_code: BTreeMap<&str, (u64, HashMap<&str, u64>)> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.tx.is_failed()) {
        let Some(code) = row.tx.gateway_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            continue;
        };
        let entry = by_code.entry(code).or_default();
        entry.0 += 1;
        if let Some(msg) = row.tx.gateway_message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            *entry.1.entry(msg).or_default() += 1;
        }
    }

    let mut catalog: Vec<DeclineEntry> = by_code
        .into_iter()
        .map(|(code, (declines, messages))| {
            let distinct_messages = messages.len();
            let mut ranked: Vec<(String, u64)> = messages
                .into_iter()
                .map(|(m, n)| (m.to_string(), n))
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            ranked.truncate(TOP_MESSAGES);

            DeclineEntry {
                gateway_code: code.to_string(),
                declines,
                distinct_messages,
                top_messages: ranked,
            }
        })
        .collect();

    // stable: ties keep code order from the BTreeMap
    catalog.sort_by(|a, b| b.declines.cmp(&a.declines));
    Ok(catalog)
}
