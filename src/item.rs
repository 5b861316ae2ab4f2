use serde::{Deserialize, Serialize};

/// Catalog entry as listed by the product service.
///
/// Catalog documents use Spanish field names (`nombre`, `precio`, ...);
/// both spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Option<String>,
    #[serde(alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "descripcion")]
    pub description: String,
    #[serde(alias = "precio")]
    pub price: f64,
    #[serde(default)]
    pub stock: u32,
    #[serde(default, alias = "imagen")]
    pub image: String,
}

/// One line of a user's cart, keyed by `product_id`.
///
/// The same shape is stored locally and as a remote document, so the serde
/// names follow the remote collection (`productId`, `updatedAt`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub price: f64,
    pub image: String,
    pub quantity: u32,
    /// Last local or remote modification, Unix milliseconds.
    pub updated_at: i64,
    /// Tombstone: logically deleted, kept until the delete is confirmed remotely.
    #[serde(default)]
    pub deleted: bool,
}

impl CartItem {
    /// Fresh live line with quantity 1. Fails when the product has no id.
    pub fn from_product(product: &Product, now_ms: i64) -> Option<Self> {
        let product_id = product.id.as_deref().filter(|id| !id.is_empty())?;
        Some(Self {
            product_id: product_id.to_string(),
            name: product.name.clone(),
            price: product.price,
            image: product.image.clone(),
            quantity: 1,
            updated_at: now_ms,
            deleted: false,
        })
    }

    /// Flag the line as deleted at `now_ms`.
    pub fn tombstone(&mut self, now_ms: i64) {
        self.deleted = true;
        self.updated_at = now_ms;
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// Sum of line totals over live items.
pub fn cart_total(items: &[CartItem]) -> f64 {
    items
        .iter()
        .filter(|i| i.is_live())
        .map(CartItem::line_total)
        .sum()
}
