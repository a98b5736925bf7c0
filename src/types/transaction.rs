//! Transaction record: one payment attempt plus enrichment slots

use crate::geo::GeoLocation;
use crate::normalizer::BodyFields;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One payment attempt as read from the input CSV.
///
/// Raw columns are filled by ingestion and never modified afterwards; `body` and `geo`
/// are filled by the normalizer and the resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier (falls back to the 1-based row number)
    pub transaction_id: String,

    /// Position of the row in the input file
    pub row_index: usize,

    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub created_at: Option<DateTime<Utc>>,

    /// Status label, e.g. "Completed" / "Failed"
    pub status_title: Option<String>,

    /// `None` when the input has no is_final column
    pub is_final: Option<bool>,

    pub gateway_code: Option<String>,
    pub gateway_message: Option<String>,
    pub gateway_name: Option<String>,

    pub user_email: Option<String>,
    pub billing_country: Option<String>,
    pub bin_country: Option<String>,
    pub ip_country: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,

    /// Attributes extracted from the JSON body
    #[serde(default)]
    pub body: BodyFields,

    /// Resolved IP geolocation (empty when unresolved)
    #[serde(default)]
    pub geo: GeoLocation,
}

impl Transaction {
    /// Create an empty transaction with only an identifier
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            ..Default::default()
        }
    }

    /// `status_title == "Failed"` (case-insensitive, trimmed)
    pub fn is_failed(&self) -> bool {
        self.status_title
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case("failed"))
            .unwrap_or(false)
    }

    /// Not failed, and final where finality is known
    pub fn is_successful(&self) -> bool {
        !self.is_failed() && self.is_final.unwrap_or(true)
    }

    pub fn hour(&self) -> Option<u32> {
        self.created_at.map(|ts| ts.hour())
    }

    /// Monday = 0 .. Sunday = 6
    pub fn day_of_week(&self) -> Option<u32> {
        self.created_at.map(|ts| ts.weekday().num_days_from_monday())
    }

    /// Billing country: CSV column first, JSON body second
    pub fn effective_billing_country(&self) -> Option<&str> {
        self.billing_country
            .as_deref()
            .or(self.body.billing_country.as_deref())
    }

    pub fn shipping_country(&self) -> Option<&str> {
        self.body.shipping_country.as_deref()
    }

    /// IP address: CSV column first, JSON body second
    pub fn effective_ip(&self) -> Option<&str> {
        self.ip_address.as_deref().or(self.body.ip.as_deref())
    }

    /// IP country: resolver result first, CSV column second
    pub fn effective_ip_country(&self) -> Option<&str> {
        self.geo.country.as_deref().or(self.ip_country.as_deref())
    }

    pub fn effective_email(&self) -> Option<&str> {
        self.user_email.as_deref().or(self.body.email.as_deref())
    }

    pub fn effective_user_agent(&self) -> Option<&str> {
        self.user_agent
            .as_deref()
            .or(self.body.user_agent.as_deref())
    }

    pub fn effective_language(&self) -> Option<&str> {
        self.body
            .browser_language
            .as_deref()
            .or(self.accept_language.as_deref())
    }

    /// Identity used for per-user grouping: email, then phone, customer id, user id
    pub fn user_key(&self) -> Option<String> {
        if let Some(email) = self.effective_email() {
            let email = email.trim().to_lowercase();
            if !email.is_empty() {
                return Some(email);
            }
        }
        self.body
            .phone
            .clone()
            .or_else(|| self.body.customer_id.clone())
            .or_else(|| self.body.user_id.clone())
    }

    /// "WxH" screen resolution when both dimensions are known
    pub fn screen_resolution(&self) -> Option<String> {
        match (&self.body.screen_width, &self.body.screen_height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }

    /// Browser family from the explicit browser name or the user agent
    pub fn browser_family(&self) -> Option<String> {
        if let Some(name) = self.body.browser_name.as_deref() {
            if !name.trim().is_empty() {
                return Some(name.trim().to_string());
            }
        }
        self.effective_user_agent().map(browser_family_from_ua)
    }

    pub fn card_brand(&self) -> Option<&str> {
        self.body.card_brand.as_deref()
    }
}

/// Coarse browser family from a user agent string
pub fn browser_family_from_ua(ua: &str) -> String {
    let ua = ua.to_lowercase();
    let family = if ua.contains("edg/") || ua.contains("edge") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox") || ua.contains("fxios") {
        "Firefox"
    } else if ua.contains("chrome") || ua.contains("crios") || ua.contains("chromium") {
        "Chrome"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        "Other"
    };
    family.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_is_never_successful() {
        let mut tx = Transaction::new("tx_1");
        tx.status_title = Some("Failed".to_string());
        tx.is_final = Some(true);
        assert!(!tx.is_successful());

        tx.status_title = Some("  failed ".to_string());
        tx.is_final = None;
        assert!(!tx.is_successful());
    }

    #[test]
    fn test_success_requires_final_when_known() {
        let mut tx = Transaction::new("tx_2");
        tx.status_title = Some("Completed".to_string());
        assert!(tx.is_successful());

        tx.is_final = Some(false);
        assert!(!tx.is_successful());
    }

    #[test]
    fn test_user_key_fallback() {
        let mut tx = Transaction::new("tx_3");
        assert_eq!(tx.user_key(), None);

        tx.body.customer_id = Some("cust-9".to_string());
        assert_eq!(tx.user_key().as_deref(), Some("cust-9"));

        tx.body.phone = Some("4915112345".to_string());
        assert_eq!(tx.user_key().as_deref(), Some("4915112345"));

        tx.user_email = Some(" Alice@Example.COM ".to_string());
        assert_eq!(tx.user_key().as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_browser_family() {
        assert_eq!(
            browser_family_from_ua(
                "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 Chrome/120.0 Safari/537.36 Edg/120.0"
            ),
            "Edge"
        );
        assert_eq!(
            browser_family_from_ua("Mozilla/5.0 (X11; Linux) Gecko/20100101 Firefox/121.0"),
            "Firefox"
        );
        assert_eq!(browser_family_from_ua("python-requests/2.31"), "Other");
    }
}
