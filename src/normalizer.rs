//! Record normalizer: flat attributes out of the semi-structured JSON body.
//!
//! Every lookup first tries the explicit paths used by the payment gateway payload
//! (`payer.*`, `initiator.*`, `card.*`, `order.*`) and then falls back to key-suffix
//! matching over the flattened document, so differently shaped bodies still yield
//! billing, identity and device attributes. Parsing is total: malformed input gives
//! an all-null [`BodyFields`] and never an error to the caller.

use crate::error::{AnalyticsError, Result};
use crate::types::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Attributes extracted from a transaction body. All nullable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyFields {
    pub billing_country: Option<String>,
    pub billing_zip: Option<String>,
    pub billing_city: Option<String>,
    pub billing_address1: Option<String>,
    pub billing_address2: Option<String>,
    pub shipping_country: Option<String>,
    pub shipping_zip: Option<String>,
    pub shipping_city: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub user_id: Option<String>,
    pub customer_id: Option<String>,
    pub session_id: Option<String>,
    pub device_id: Option<String>,
    pub fingerprint: Option<String>,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub browser_language: Option<String>,
    pub user_agent: Option<String>,
    pub screen_width: Option<String>,
    pub screen_height: Option<String>,
    pub timezone: Option<String>,
    pub os_name: Option<String>,
    pub ip: Option<String>,
    pub card_brand: Option<String>,
    pub card_type: Option<String>,
    pub order_amount: Option<f64>,
    pub order_currency: Option<String>,
}

impl BodyFields {
    /// Extract from a raw cell. Never fails; anything unparseable gives all-null fields.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(parse_body) {
            Some(Ok(Some(doc))) => Self::from_value(&doc),
            _ => Self::default(),
        }
    }

    /// Extract from an already parsed document
    pub fn from_value(doc: &Value) -> Self {
        let flat = flatten(doc);
        let pick = |paths: &[&[&str]], suffixes: &[&str]| lookup(doc, &flat, paths, suffixes);

        let first_name = pick(
            &[&["payer", "first_name"]],
            &["first_name", "firstname", "given_name", "fname"],
        );
        let last_name = pick(
            &[&["payer", "last_name"]],
            &["last_name", "lastname", "family_name", "lname", "surname"],
        );
        let full_name = pick(
            &[],
            &["full_name", "fullname", "cardholder.name", "billing_name", "customer.name"],
        )
        .or_else(|| {
            let parts: Vec<&str> = [first_name.as_deref(), last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });

        Self {
            billing_country: pick(
                &[
                    &["payer", "billing_address", "country_code"],
                    &["billing", "country"],
                    &["billing_address", "country"],
                ],
                &[
                    "billing_country",
                    "billing.country",
                    "billing.country_code",
                    "billing_address.country",
                    "billing_address.country_code",
                    "address.country",
                ],
            )
            .and_then(|c| normalize_iso2(&c)),
            billing_zip: pick(
                &[&["billing", "zip"], &["billing_address", "zip"]],
                &[
                    "billing_zip",
                    "billing_postal_code",
                    "billing.zip",
                    "billing.postal_code",
                    "billing_address.zip",
                    "billing_address.postal_code",
                    "address.zip",
                    "address.postal_code",
                ],
            ),
            billing_city: pick(
                &[&["billing", "city"], &["billing_address", "city"]],
                &["billing_city", "billing.city", "billing_address.city", "address.city"],
            ),
            billing_address1: pick(
                &[&["payer", "billing_address", "address_line_1"]],
                &[
                    "billing_address1",
                    "billing_address_line1",
                    "billing.address",
                    "billing.line1",
                    "billing_address.line1",
                    "billing_address.address1",
                    "address.line1",
                    "address.address1",
                ],
            ),
            billing_address2: pick(
                &[&["payer", "billing_address", "address_line_2"]],
                &[
                    "billing_address2",
                    "billing_address_line2",
                    "billing.line2",
                    "billing_address.line2",
                    "billing_address.address2",
                    "address.line2",
                    "address.address2",
                ],
            ),
            shipping_country: pick(
                &[&["shipping", "country"], &["shipping_address", "country"]],
                &[
                    "shipping_country",
                    "shipping.country",
                    "shipping_address.country",
                    "shipping_address.country_code",
                    "ship_address.country",
                ],
            )
            .and_then(|c| normalize_iso2(&c)),
            shipping_zip: pick(
                &[],
                &["shipping_zip", "shipping_postal_code", "shipping.zip", "shipping_address.zip"],
            ),
            shipping_city: pick(&[], &["shipping_city", "shipping.city", "shipping_address.city"]),
            email: pick(&[&["payer", "email"]], &["email", "email_address"])
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty()),
            phone: pick(
                &[&["payer", "phone"]],
                &["phone", "phone_number", "mobile", "msisdn"],
            )
            .and_then(|p| normalize_phone(&p)),
            first_name,
            last_name,
            full_name,
            user_id: pick(&[&["user", "id"]], &["user_id", "userid", "uid"]),
            customer_id: pick(&[&["customer", "id"]], &["customer_id", "customerid"]),
            session_id: pick(&[&["session", "id"]], &["session_id", "sessionid"]),
            device_id: pick(&[&["device", "id"]], &["device_id", "deviceid"]),
            fingerprint: pick(&[&["device", "fingerprint"]], &["fingerprint"]),
            browser_name: pick(&[&["initiator", "browser", "name"]], &["browser.name", "browser_name"]),
            browser_version: pick(
                &[&["initiator", "browser", "version"]],
                &["browser.version", "browser_version"],
            ),
            browser_language: pick(
                &[&["initiator", "browser", "language"]],
                &["browser.language", "browser_language", "accept-language", "accept_language"],
            ),
            user_agent: pick(
                &[&["initiator", "browser", "user_agent"]],
                &["user_agent", "useragent", "user-agent"],
            ),
            screen_width: pick(
                &[&["initiator", "browser", "screen_width"]],
                &["screen_width", "screen.width"],
            ),
            screen_height: pick(
                &[&["initiator", "browser", "screen_height"]],
                &["screen_height", "screen.height"],
            ),
            timezone: pick(
                &[&["initiator", "browser", "time_zone"]],
                &["time_zone", "timezone"],
            ),
            os_name: pick(
                &[&["device", "os"]],
                &["os_name", "device_os", "operating_system", "os_family"],
            ),
            ip: pick(
                &[&["initiator", "ip_address"], &["ip"]],
                &["ip_address", "client_ip", "remote_ip", "x-forwarded-for", "ip"],
            )
            .map(|ip| first_in_list(&ip)),
            card_brand: pick(&[&["card", "brand"]], &["card_brand", "card.scheme"]),
            card_type: pick(&[&["card", "type"]], &["card_type"]),
            order_amount: pick(&[&["order", "amount_total"]], &["amount_total"])
                .and_then(|a| a.parse::<f64>().ok()),
            order_currency: pick(&[&["order", "currency"]], &["order_currency"]),
        }
    }

    /// True when nothing at all was extracted
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Outcome of normalizing one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyOutcome {
    /// A body parsed (fields may still be sparse)
    Extracted,
    /// No body, or the cell is not JSON-shaped
    Empty,
    /// Looked like JSON but failed to parse
    Malformed,
}

/// Applies body extraction to loaded transactions.
pub struct RecordNormalizer;

impl RecordNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Fill `tx.body` from the first candidate payload that parses.
    ///
    /// Candidates are the body / request_payload / response_payload cells in that order.
    pub fn normalize_row(&self, tx: &mut Transaction, payloads: &[Option<String>]) -> BodyOutcome {
        let mut outcome = BodyOutcome::Empty;

        for raw in payloads.iter().flatten() {
            match parse_body(raw) {
                Ok(Some(doc)) => {
                    tx.body = BodyFields::from_value(&doc);
                    return BodyOutcome::Extracted;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(transaction_id = %tx.transaction_id, error = %e, "Body is not valid JSON");
                    outcome = BodyOutcome::Malformed;
                }
            }
        }

        tx.body = BodyFields::default();
        outcome
    }
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a raw cell.
///
/// `Ok(None)` for empty or non-JSON-shaped cells (`""`, `"nan"`, `"42"`),
/// `Err(Parse)` for cells that start like JSON but do not parse.
pub fn parse_body(raw: &str) -> Result<Option<Value>> {
    let s = raw.trim();
    if s.is_empty() || !(s.starts_with('{') || s.starts_with('[')) {
        return Ok(None);
    }
    serde_json::from_str(s)
        .map(Some)
        .map_err(|e| AnalyticsError::Parse {
            field: "body".to_string(),
            reason: e.to_string(),
        })
}

/// Flatten a document into (lower-case dotted path, leaf) pairs in document order.
pub fn flatten(doc: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    flatten_into(doc, String::new(), &mut out);
    out
}

fn flatten_into<'a>(value: &'a Value, prefix: String, out: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let key = key.to_lowercase();
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(child, path, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(child, format!("{}[{}]", prefix, i), out);
            }
        }
        _ => out.push((prefix, value)),
    }
}

/// Explicit paths first, then the first suffix (in priority order) that matches a
/// flattened path exactly or on a `.` boundary.
fn lookup(doc: &Value, flat: &[(String, &Value)], paths: &[&[&str]], suffixes: &[&str]) -> Option<String> {
    for path in paths {
        if let Some(s) = path_get(doc, path).and_then(scalar_to_string) {
            return Some(s);
        }
    }
    for suffix in suffixes {
        let dotted = format!(".{}", suffix);
        for (path, value) in flat {
            if path == suffix || path.ends_with(&dotted) {
                if let Some(s) = scalar_to_string(value) {
                    return Some(s);
                }
            }
        }
    }
    None
}

/// Follow object keys from the document root
pub fn path_get<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |cur, key| cur.as_object()?.get(*key))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(
            n.as_i64()
                .map(|i| i.to_string())
                .unwrap_or_else(|| n.to_string()),
        ),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Upper-case two-letter prefix ("us" -> "US", "DEU" -> "DE")
pub fn normalize_iso2(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(s.to_uppercase().chars().take(2).collect())
}

/// Digits only; `None` when no digits remain
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty()).then_some(digits)
}

/// First entry of a comma-separated list ("1.2.3.4, 10.0.0.1" -> "1.2.3.4")
pub fn first_in_list(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or(raw.trim())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY_BODY: &str = r#"{
        "payer": {
            "email": "Jane.Doe@Example.com",
            "first_name": "Jane",
            "last_name": "Doe",
            "billing_address": {"country_code": "de", "address_line_1": "Hauptstr. 1"}
        },
        "initiator": {
            "ip_address": "203.0.113.7, 10.0.0.1",
            "browser": {
                "user_agent": "Mozilla/5.0 HeadlessChrome/120.0",
                "language": "de-DE",
                "time_zone": "Europe/Berlin",
                "screen_width": 800,
                "screen_height": 600
            }
        },
        "card": {"brand": "VISA", "type": "debit"},
        "order": {"amount_total": 1978, "currency": "EUR"}
    }"#;

    #[test]
    fn test_gateway_payload_extraction() {
        let fields = BodyFields::from_raw(Some(GATEWAY_BODY));

        assert_eq!(fields.email.as_deref(), Some("jane.doe@example.com"));
        assert_eq!(fields.billing_country.as_deref(), Some("DE"));
        assert_eq!(fields.billing_address1.as_deref(), Some("Hauptstr. 1"));
        assert_eq!(fields.full_name.as_deref(), Some("Jane Doe"));
        assert_eq!(fields.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(fields.screen_width.as_deref(), Some("800"));
        assert_eq!(fields.screen_height.as_deref(), Some("600"));
        assert_eq!(fields.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(fields.card_brand.as_deref(), Some("VISA"));
        assert_eq!(fields.order_amount, Some(1978.0));
    }

    #[test]
    fn test_suffix_fallback_shapes() {
        let body = r#"{"customer": {"email": "x@y.io", "phone": "+49 (151) 234-56"},
                       "billing": {"country": "us", "city": "Austin", "zip": "73301"},
                       "headers": {"x-forwarded-for": "198.51.100.2"}}"#;
        let fields = BodyFields::from_raw(Some(body));

        assert_eq!(fields.email.as_deref(), Some("x@y.io"));
        assert_eq!(fields.phone.as_deref(), Some("4915123456"));
        assert_eq!(fields.billing_country.as_deref(), Some("US"));
        assert_eq!(fields.billing_city.as_deref(), Some("Austin"));
        assert_eq!(fields.billing_zip.as_deref(), Some("73301"));
        assert_eq!(fields.ip.as_deref(), Some("198.51.100.2"));
        assert_eq!(fields.shipping_country, None);
    }

    #[test]
    fn test_parsing_is_total() {
        let inputs = [
            None,
            Some(""),
            Some("   "),
            Some("nan"),
            Some("42"),
            Some("null"),
            Some("\"just a string\""),
            Some("{not json"),
            Some("[1, 2, {\"a\": null}]"),
            Some("{\"email\": null, \"ip\": [], \"billing\": 5}"),
        ];

        for raw in inputs {
            let fields = BodyFields::from_raw(raw);
            assert!(fields.is_empty(), "expected no fields for {:?}", raw);
        }
    }

    #[test]
    fn test_normalize_row_outcomes() {
        let normalizer = RecordNormalizer::new();
        let mut tx = Transaction::new("tx_1");

        let outcome = normalizer.normalize_row(&mut tx, &[Some("{broken".to_string())]);
        assert_eq!(outcome, BodyOutcome::Malformed);
        assert!(tx.body.is_empty());

        let outcome = normalizer.normalize_row(&mut tx, &[None, Some(String::new())]);
        assert_eq!(outcome, BodyOutcome::Empty);

        // request_payload wins when body is unusable
        let outcome = normalizer.normalize_row(
            &mut tx,
            &[Some("{broken".to_string()), Some(r#"{"email": "a@b.c"}"#.to_string())],
        );
        assert_eq!(outcome, BodyOutcome::Extracted);
        assert_eq!(tx.body.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(normalize_iso2(" deu "), Some("DE".to_string()));
        assert_eq!(normalize_iso2("nan"), None);
        assert_eq!(normalize_phone("n/a"), None);
        assert_eq!(first_in_list(" , 1.1.1.1, 2.2.2.2"), "1.1.1.1");
    }
}
