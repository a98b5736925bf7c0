//! Offline MMDB database provider
//!
//! Understands both the flat IPinfo lite layout (`country_code`, `asn`, `as_name`)
//! and the nested MaxMind layout (`country.iso_code`, `city.names.en`, `traits.*`).

use super::{GeoLocation, GeoProvider};
use crate::error::{AnalyticsError, Result};
use crate::normalizer::{normalize_iso2, path_get};
use maxminddb::{MaxMindDBError, Reader};
use serde_json::Value;
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

/// Memory-loaded MMDB reader
pub struct MmdbProvider {
    reader: Reader<Vec<u8>>,
}

impl MmdbProvider {
    /// Load the database file into memory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| AnalyticsError::LookupFailure {
            ip: String::new(),
            reason: format!("cannot open {}: {}", path.display(), e),
        })?;

        info!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            node_count = reader.metadata.node_count,
            "MMDB database loaded"
        );

        Ok(Self { reader })
    }
}

impl GeoProvider for MmdbProvider {
    fn name(&self) -> &'static str {
        "mmdb"
    }

    fn lookup(&self, ip: IpAddr) -> Result<Option<GeoLocation>> {
        match self.reader.lookup::<Value>(ip) {
            Ok(record) => {
                let location = location_from_record(&record);
                Ok((!location.is_empty()).then_some(location))
            }
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(e) => Err(AnalyticsError::LookupFailure {
                ip: ip.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Map a decoded MMDB record onto [`GeoLocation`]
pub fn location_from_record(record: &Value) -> GeoLocation {
    let text = |paths: &[&[&str]]| {
        paths.iter().find_map(|path| {
            path_get(record, path)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    };
    let number = |paths: &[&[&str]]| {
        paths
            .iter()
            .find_map(|path| path_get(record, path).and_then(Value::as_f64))
    };

    let asn = text(&[&["asn"]]).or_else(|| {
        path_get(record, &["traits", "autonomous_system_number"])
            .or_else(|| path_get(record, &["autonomous_system_number"]))
            .and_then(Value::as_u64)
            .map(|n| format!("AS{}", n))
    });

    let region = text(&[&["region"]]).or_else(|| {
        record
            .get("subdivisions")
            .and_then(Value::as_array)
            .and_then(|subs| subs.first())
            .and_then(|sub| path_get(sub, &["names", "en"]))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    GeoLocation {
        country: text(&[&["country_code"], &["country", "iso_code"], &["registered_country", "iso_code"]])
            .and_then(|c| normalize_iso2(&c)),
        country_name: text(&[&["country"], &["country", "names", "en"]]),
        region,
        city: text(&[&["city"], &["city", "names", "en"]]),
        asn,
        org: text(&[
            &["as_name"],
            &["traits", "autonomous_system_organization"],
            &["autonomous_system_organization"],
        ]),
        continent: text(&[&["continent_code"], &["continent", "code"], &["continent"]]),
        latitude: number(&[&["location", "latitude"], &["latitude"]]),
        longitude: number(&[&["location", "longitude"], &["longitude"]]),
    }
}
