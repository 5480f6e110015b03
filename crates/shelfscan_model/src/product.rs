//! Product catalogue record (read-mostly).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A product in the catalogue, keyed by canonical EAN-13.
///
/// Any code listed in `upc`, `ean8`, or `additional_codes` resolves to this
/// product via the repository's any-code lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: i64,

    pub ean: String,
    pub upc: Option<String>,
    pub ean8: Option<String>,
    #[serde(default)]
    pub additional_codes: Vec<String>,

    pub name: String,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,

    pub size: Option<String>,
    pub unit: Option<String>,
    pub pack_size: Option<i64>,

    pub external_id: Option<String>,
    pub sku: Option<String>,

    pub active: bool,

    pub image_url: Option<String>,
    pub source: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRecord {
    pub fn new(ean: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            ean: ean.into(),
            upc: None,
            ean8: None,
            additional_codes: Vec::new(),
            name: name.into(),
            brand: None,
            description: None,
            category: None,
            subcategory: None,
            size: None,
            unit: None,
            pack_size: None,
            external_id: None,
            sku: None,
            active: true,
            image_url: None,
            source: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether any of this product's codes matches `code`.
    pub fn has_code(&self, code: &str) -> bool {
        if self.ean == code {
            return true;
        }
        if self.upc.as_deref() == Some(code) || self.ean8.as_deref() == Some(code) {
            return true;
        }
        self.additional_codes.iter().any(|c| c == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_code_checks_all_fields() {
        let mut p = ProductRecord::new("4006381333931", "Stabilo Boss");
        p.upc = Some("012345678905".to_string());
        p.ean8 = Some("96385074".to_string());
        p.additional_codes.push("5901234123457".to_string());

        assert!(p.has_code("4006381333931"));
        assert!(p.has_code("012345678905"));
        assert!(p.has_code("96385074"));
        assert!(p.has_code("5901234123457"));
        assert!(!p.has_code("0000000000000"));
    }
}
