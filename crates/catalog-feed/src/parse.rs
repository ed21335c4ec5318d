use catalog_core::ProductUpsert;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("feed is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("feed has no `products` field")]
    MissingProducts,
    #[error("feed `products` is {found}, expected an array")]
    ProductsNotArray { found: &'static str },
}

/// The `products` collection of a feed document. Entries are kept loosely typed.
#[derive(Debug, Clone)]
pub struct FeedProducts {
    entries: Vec<JsonValue>,
}

/// Parse a feed body and locate its `products` array. Individual entries are not validated here.
pub fn parse_feed(body: &[u8]) -> Result<FeedProducts, ParseError> {
    let mut root: JsonValue = serde_json::from_slice(body)?;
    match root.get_mut("products").map(JsonValue::take) {
        None => Err(ParseError::MissingProducts),
        Some(JsonValue::Array(entries)) => Ok(FeedProducts { entries }),
        Some(other) => Err(ParseError::ProductsNotArray {
            found: kind_of(&other),
        }),
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

impl FeedProducts {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in feed order.
    pub fn records(&self) -> impl Iterator<Item = FeedRecord<'_>> {
        self.entries.iter().map(|value| FeedRecord { value })
    }
}

/// One feed entry with optional-field accessors; nothing is assumed to be present.
#[derive(Debug, Clone, Copy)]
pub struct FeedRecord<'a> {
    value: &'a JsonValue,
}

impl<'a> FeedRecord<'a> {
    /// Numeric id that fits an `i64`. Strings, floats and out-of-range numbers are rejected.
    pub fn id(&self) -> Option<i64> {
        self.value.get("id")?.as_i64()
    }

    pub fn text(&self, key: &str) -> Option<&'a str> {
        self.value.get(key)?.as_str()
    }

    /// RFC 3339 timestamp normalized to UTC. Unparsable values read as absent.
    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.text(key)?)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Upsert for this entry, or `None` when it carries no usable id.
    pub fn to_upsert(&self) -> Option<ProductUpsert> {
        Some(ProductUpsert {
            id: self.id()?,
            title: self.text("title").map(str::to_string),
            handle: self.text("handle").map(str::to_string),
            vendor: self.text("vendor").map(str::to_string),
            product_type: self.text("product_type").map(str::to_string),
            published_at: self.timestamp("published_at"),
            created_at: self.timestamp("created_at"),
            updated_at: self.timestamp("updated_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn finds_products_array() {
        let products = parse_feed(br#"{"products":[{"id":1},{"id":2}],"extra":true}"#)
            .expect("parse");
        assert_eq!(products.len(), 2);
        let ids = products.records().filter_map(|r| r.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn missing_products_is_structured_error() {
        assert!(matches!(
            parse_feed(br#"{"items":[]}"#),
            Err(ParseError::MissingProducts)
        ));
        assert!(matches!(
            parse_feed(br#"[{"id":1}]"#),
            Err(ParseError::MissingProducts)
        ));
    }

    #[test]
    fn non_array_products_is_rejected() {
        let err = parse_feed(br#"{"products":{"id":1}}"#).expect_err("object");
        assert!(matches!(err, ParseError::ProductsNotArray { found: "an object" }));

        let err = parse_feed(br#"{"products":null}"#).expect_err("null");
        assert!(matches!(err, ParseError::ProductsNotArray { found: "null" }));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(
            parse_feed(b"<html>maintenance</html>"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn record_fields_are_optional() {
        let products = parse_feed(
            br#"{"products":[{
                "id": 8001,
                "title": "Seamless Bra",
                "handle": null,
                "vendor": 42,
                "created_at": "2024-05-01T10:15:00+02:00",
                "published_at": "yesterday"
            }]}"#,
        )
        .expect("parse");
        let upsert = products.records().next().and_then(|r| r.to_upsert()).expect("upsert");

        assert_eq!(upsert.id, 8001);
        assert_eq!(upsert.title.as_deref(), Some("Seamless Bra"));
        assert_eq!(upsert.handle, None);
        assert_eq!(upsert.vendor, None);
        assert_eq!(upsert.product_type, None);
        assert_eq!(upsert.published_at, None);
        assert_eq!(upsert.updated_at, None);
        assert_eq!(
            upsert.created_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 15, 0).single()
        );
    }

    #[test]
    fn unusable_ids_yield_no_upsert() {
        let products = parse_feed(
            br#"{"products":[
                {"title":"no id"},
                {"id":"123"},
                {"id":1.5},
                {"id":null},
                "not an object",
                {"id":18446744073709551615},
                {"id":7}
            ]}"#,
        )
        .expect("parse");
        let upserts = products.records().filter_map(|r| r.to_upsert()).collect::<Vec<_>>();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].id, 7);
    }
}
