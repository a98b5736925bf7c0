//! `ip,country` CSV map provider

use super::{GeoLocation, GeoProvider};
use crate::error::{AnalyticsError, Result};
use crate::normalizer::normalize_iso2;
use std::collections::HashMap;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info};

const IP_COLUMNS: &[&str] = &["ip", "ip_address", "client_ip"];
const COUNTRY_COLUMNS: &[&str] = &["country", "country_code", "ip_country", "iso2"];

/// Exact-match IP to country table
pub struct CsvIpMapProvider {
    entries: HashMap<IpAddr, String>,
}

impl CsvIpMapProvider {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let provider = Self::from_reader(std::fs::File::open(path)?)?;
        info!(path = %path.display(), entries = provider.len(), "IP country map loaded");
        Ok(provider)
    }

    /// Read a headered CSV. Rows with an unparseable IP or empty country are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = csv.headers()?.clone();

        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
        };
        let ip_idx = find(IP_COLUMNS).ok_or_else(|| AnalyticsError::missing("ip"))?;
        let country_idx = find(COUNTRY_COLUMNS).ok_or_else(|| AnalyticsError::missing("country"))?;

        let mut entries = HashMap::new();
        for record in csv.records() {
            let record = record?;
            let ip = record.get(ip_idx).and_then(|s| s.parse::<IpAddr>().ok());
            let country = record.get(country_idx).and_then(normalize_iso2);
            match (ip, country) {
                (Some(ip), Some(country)) => {
                    entries.insert(ip, country);
                }
                _ => debug!(row = ?record.position().map(|p| p.line()), "Skipping IP map row"),
            }
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GeoProvider for CsvIpMapProvider {
    fn name(&self) -> &'static str {
        "ip_map"
    }

    fn lookup(&self, ip: IpAddr) -> Result<Option<GeoLocation>> {
        Ok(self.entries.get(&ip).map(|country| GeoLocation {
            country: Some(country.clone()),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_map() {
        let data = "IP,Country\n198.51.100.1,de\nnot-an-ip,US\n2001:db8::1,fr\n198.51.100.2,\n";
        let provider = CsvIpMapProvider::from_reader(data.as_bytes()).unwrap();

        assert_eq!(provider.len(), 2);
        let hit = provider.lookup("198.51.100.1".parse().unwrap()).unwrap();
        assert_eq!(hit.unwrap().country.as_deref(), Some("DE"));
        assert!(provider.lookup("198.51.100.2".parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_missing_country_column() {
        let data = "ip,city\n1.1.1.1,Sydney\n";
        assert!(matches!(
            CsvIpMapProvider::from_reader(data.as_bytes()),
            Err(AnalyticsError::MissingColumn(_))
        ));
    }
}
