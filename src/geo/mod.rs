//! IP geolocation: offline providers behind a per-run cache
//!
//! The resolver never fails. A missing database makes it report itself unavailable
//! and every lookup returns an empty [`GeoLocation`]; provider errors are logged
//! and treated exactly like a miss.

pub mod ip_map;
pub mod mmdb;

pub use ip_map::CsvIpMapProvider;
pub use mmdb::MmdbProvider;

use crate::config::GeoConfig;
use crate::error::Result;
use crate::normalizer::first_in_list;
use crate::types::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{info, warn};

/// Location attributes for one IP. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO2 country code
    pub country: Option<String>,
    pub country_name: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    /// Autonomous system, "AS<number>"
    pub asn: Option<String>,
    pub org: Option<String>,
    pub continent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoLocation {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A source of IP geolocation data
pub trait GeoProvider {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// `Ok(None)` on a miss, `Err` on a lookup failure
    fn lookup(&self, ip: IpAddr) -> Result<Option<GeoLocation>>;
}

/// Lookup counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub lookups: u64,
    pub cache_hits: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub failures: u64,
}

/// Cached resolver over an ordered list of providers.
///
/// The first provider with an answer wins. The cache is a plain map scoped to the
/// resolver's lifetime and is never evicted.
pub struct GeoResolver {
    providers: Vec<Box<dyn GeoProvider>>,
    cache: HashMap<String, GeoLocation>,
    stats: ResolverStats,
}

impl GeoResolver {
    pub fn new(providers: Vec<Box<dyn GeoProvider>>) -> Self {
        if providers.is_empty() {
            warn!("No geolocation database available, IP lookups will return empty results");
        } else {
            let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
            info!(providers = ?names, "Geolocation resolver ready");
        }
        Self {
            providers,
            cache: HashMap::new(),
            stats: ResolverStats::default(),
        }
    }

    /// Resolver with no providers
    pub fn unavailable() -> Self {
        Self::new(Vec::new())
    }

    /// Open the configured sources (MMDB first, then the ip,country map).
    ///
    /// A source that cannot be opened is logged and skipped.
    pub fn from_config(config: &GeoConfig) -> Self {
        let mut providers: Vec<Box<dyn GeoProvider>> = Vec::new();

        if let Some(path) = &config.mmdb_path {
            match MmdbProvider::open(path) {
                Ok(provider) => providers.push(Box::new(provider)),
                Err(e) => warn!(path = %path, error = %e, "Failed to open MMDB database"),
            }
        }
        if let Some(path) = &config.ip_map_path {
            match CsvIpMapProvider::load(path) {
                Ok(provider) => providers.push(Box::new(provider)),
                Err(e) => warn!(path = %path, error = %e, "Failed to load IP country map"),
            }
        }

        Self::new(providers)
    }

    pub fn is_available(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Resolve one IP string. Never fails; misses give an empty location.
    pub fn resolve(&mut self, raw: &str) -> GeoLocation {
        self.stats.lookups += 1;

        let Some(key) = normalize_ip(raw) else {
            self.stats.rejected += 1;
            return GeoLocation::default();
        };

        if let Some(hit) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            return hit.clone();
        }

        let location = match key.parse::<IpAddr>() {
            Ok(ip) => self.lookup_providers(ip),
            Err(_) => {
                self.stats.rejected += 1;
                GeoLocation::default()
            }
        };

        if !location.is_empty() {
            self.stats.resolved += 1;
        }
        self.cache.insert(key, location.clone());
        location
    }

    fn lookup_providers(&mut self, ip: IpAddr) -> GeoLocation {
        for provider in &self.providers {
            match provider.lookup(ip) {
                Ok(Some(location)) => return location,
                Ok(None) => {}
                Err(e) => {
                    self.stats.failures += 1;
                    warn!(ip = %ip, provider = provider.name(), error = %e, "IP lookup failed");
                }
            }
        }
        GeoLocation::default()
    }

    /// Fill `geo` for every transaction with a known IP
    pub fn enrich(&mut self, transactions: &mut [Transaction]) {
        for tx in transactions.iter_mut() {
            let ip = tx.effective_ip().map(str::to_string);
            if let Some(ip) = ip {
                tx.geo = self.resolve(&ip);
            }
        }
    }
}

/// Trim, keep the first entry of a forwarded list, reject placeholder values
fn normalize_ip(raw: &str) -> Option<String> {
    let ip = first_in_list(raw);
    let lowered = ip.to_ascii_lowercase();
    if ip.is_empty() || matches!(lowered.as_str(), "nan" | "none" | "null") {
        return None;
    }
    Some(ip)
}
