//! Core domain model for the product catalog: products, upserts and page views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "catalog-core";

/// Page size used when a caller asks for a non-positive one.
pub const DEFAULT_PAGE_SIZE: u64 = 10;
/// Result cap used when a caller asks for a non-positive search limit.
pub const DEFAULT_SEARCH_LIMIT: u64 = 50;

/// Canonical persisted product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: Option<String>,
    pub handle: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Assigned by the store on first insert; drives listing order.
    pub created_on: DateTime<Utc>,
}

/// Insert-or-update request keyed by `id`.
///
/// `None` means "not supplied": an existing row keeps its stored value for that column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductUpsert {
    pub id: i64,
    pub title: Option<String>,
    pub handle: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProductUpsert {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    /// Apply the supplied fields onto an existing product, leaving the rest untouched.
    pub fn merge_into(&self, product: &mut Product) {
        fn keep<T: Clone>(slot: &mut Option<T>, supplied: &Option<T>) {
            if let Some(value) = supplied {
                *slot = Some(value.clone());
            }
        }

        keep(&mut product.title, &self.title);
        keep(&mut product.handle, &self.handle);
        keep(&mut product.vendor, &self.vendor);
        keep(&mut product.product_type, &self.product_type);
        keep(&mut product.published_at, &self.published_at);
        keep(&mut product.created_at, &self.created_at);
        keep(&mut product.updated_at, &self.updated_at);
    }

    /// Materialize a fresh row for an id that is not stored yet.
    pub fn into_product(self, created_on: DateTime<Utc>) -> Product {
        Product {
            id: self.id,
            title: self.title,
            handle: self.handle,
            vendor: self.vendor,
            product_type: self.product_type,
            published_at: self.published_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_on,
        }
    }
}

/// Normalized offset pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u64,
    pub size: u64,
}

impl PageRequest {
    /// Negative pages become page 0; non-positive sizes fall back to [`DEFAULT_PAGE_SIZE`].
    pub fn normalized(page: i64, size: i64) -> Self {
        Self::normalized_with(page, size, DEFAULT_PAGE_SIZE)
    }

    pub fn normalized_with(page: i64, size: i64, default_size: u64) -> Self {
        Self {
            page: u64::try_from(page).unwrap_or(0),
            size: u64::try_from(size)
                .ok()
                .filter(|s| *s > 0)
                .unwrap_or(default_size.max(1)),
        }
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Falls back to [`DEFAULT_SEARCH_LIMIT`] for non-positive limits.
pub fn normalize_search_limit(limit: i64) -> u64 {
    normalize_search_limit_with(limit, DEFAULT_SEARCH_LIMIT)
}

pub fn normalize_search_limit_with(limit: i64, default_limit: u64) -> u64 {
    u64::try_from(limit)
        .ok()
        .filter(|l| *l > 0)
        .unwrap_or(default_limit.max(1))
}

/// User-editable fields for the manual create/update path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductForm {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
}

impl ProductForm {
    pub fn into_upsert(self, id: i64) -> ProductUpsert {
        ProductUpsert {
            id,
            title: self.title,
            handle: self.handle,
            vendor: self.vendor,
            product_type: self.product_type,
            ..Default::default()
        }
    }
}

/// One offset-addressed page of an ordered listing.
///
/// `total_elements` comes from a separate count query and may disagree with `content` when writes
/// land between the two reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub content: Vec<T>,
    pub total_elements: u64,
    pub page: u64,
    pub size: u64,
}

impl<T> PagedResult<T> {
    pub fn new(content: Vec<T>, total_elements: u64, request: PageRequest) -> Self {
        Self {
            content,
            total_elements,
            page: request.page,
            size: request.size,
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total_elements.div_ceil(self.size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).single().expect("ts")
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = PagedResult::<i64> {
            content: vec![],
            total_elements: 25,
            page: 0,
            size: 10,
        };
        assert_eq!(page.total_pages(), 3);

        let exact = PagedResult::<i64> {
            total_elements: 20,
            ..page.clone()
        };
        assert_eq!(exact.total_pages(), 2);

        let empty = PagedResult::<i64> {
            total_elements: 0,
            ..page
        };
        assert_eq!(empty.total_pages(), 0);
    }

    #[test]
    fn zero_size_has_no_pages() {
        let page = PagedResult::<i64> {
            content: vec![],
            total_elements: 25,
            page: 0,
            size: 0,
        };
        assert_eq!(page.total_pages(), 0);
    }

    #[test]
    fn page_request_normalizes_bad_input() {
        assert_eq!(PageRequest::normalized(-3, 0), PageRequest { page: 0, size: 10 });
        assert_eq!(PageRequest::normalized(2, -5), PageRequest { page: 2, size: 10 });
        assert_eq!(PageRequest::normalized(4, 25), PageRequest { page: 4, size: 25 });
        assert_eq!(PageRequest::normalized(3, 7).offset(), 21);
    }

    #[test]
    fn search_limit_defaults_when_not_positive() {
        assert_eq!(normalize_search_limit(0), DEFAULT_SEARCH_LIMIT);
        assert_eq!(normalize_search_limit(-1), DEFAULT_SEARCH_LIMIT);
        assert_eq!(normalize_search_limit(7), 7);
    }

    #[test]
    fn merge_keeps_unsupplied_fields() {
        let mut stored = ProductUpsert::new(7)
            .title("Linen Shirt")
            .handle("linen-shirt")
            .vendor("FAMME")
            .product_type("Tops")
            .into_product(ts(9));

        ProductUpsert::new(7).title("Linen Shirt v2").merge_into(&mut stored);

        assert_eq!(stored.title.as_deref(), Some("Linen Shirt v2"));
        assert_eq!(stored.handle.as_deref(), Some("linen-shirt"));
        assert_eq!(stored.vendor.as_deref(), Some("FAMME"));
        assert_eq!(stored.product_type.as_deref(), Some("Tops"));
        assert_eq!(stored.created_on, ts(9));
    }

    #[test]
    fn product_serializes_with_snake_case_fields() {
        let product = ProductUpsert::new(1).product_type("Dress").into_product(ts(1));
        let json = serde_json::to_value(&product).expect("json");
        assert_eq!(json["product_type"], "Dress");
        assert!(json["title"].is_null());
    }
}
