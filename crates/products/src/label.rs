//! `(variety, size)` label lookup.
//!
//! Order lines typed from a price sheet or a pot label name the plant as
//! variety + pot size ("Lavender", "2L") instead of a product id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use nursery_core::ValueObject;

use crate::product::{Product, ProductId};

/// Normalized `(variety, size)` pair: trimmed and lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarietySize {
    variety: String,
    size: String,
}

impl ValueObject for VarietySize {}

impl VarietySize {
    /// Returns `None` when either half is blank.
    pub fn new(variety: &str, size: &str) -> Option<Self> {
        let variety = normalize(variety);
        let size = normalize(size);
        if variety.is_empty() || size.is_empty() {
            return None;
        }
        Some(Self { variety, size })
    }

    pub fn variety(&self) -> &str {
        &self.variety
    }

    pub fn size(&self) -> &str {
        &self.size
    }
}

impl core::fmt::Display for VarietySize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} / {}", self.variety, self.size)
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Label → product map, built once per order from all active org products.
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    by_label: HashMap<VarietySize, ProductId>,
}

impl LabelIndex {
    /// When two products share a label the first one wins.
    pub fn build<'a>(products: impl IntoIterator<Item = &'a Product>) -> Self {
        let mut by_label = HashMap::new();
        for product in products {
            if !product.can_be_sold() {
                continue;
            }
            if let Some(label) = product.label() {
                by_label.entry(label).or_insert(product.id);
            }
        }
        Self { by_label }
    }

    pub fn lookup(&self, variety: &str, size: &str) -> Option<ProductId> {
        let key = VarietySize::new(variety, size)?;
        self.by_label.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}
