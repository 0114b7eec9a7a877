//! Catalog products and walk-in sales.

use chrono::{DateTime, Utc};
use common::{ProductId, SaleId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{InsufficientStock, StockError, StockLimitExceeded, UnknownVariant};
use crate::order::Money;
use crate::stock::StockAdjustment;

/// Errors raised by catalog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Product fields failed validation.
    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// A sale's total would exceed the largest storable amount.
    #[error("Sale total would exceed {limit}")]
    TotalTooLarge { limit: Money },

    /// Not enough stock to cover a sale.
    #[error(transparent)]
    InsufficientStock(#[from] InsufficientStock),
}

/// Product category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Category {
    #[serde(rename = "T-SHIRT")]
    TShirt,
    #[serde(rename = "HOODIE")]
    Hoodie,
    #[serde(rename = "JEANS")]
    Jeans,
    #[serde(rename = "SHOES")]
    Shoes,
    #[default]
    #[serde(rename = "OTHER")]
    Other,
}

impl Category {
    /// Returns the stored code for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TShirt => "T-SHIRT",
            Category::Hoodie => "HOODIE",
            Category::Jeans => "JEANS",
            Category::Shoes => "SHOES",
            Category::Other => "OTHER",
        }
    }

    /// Returns the human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Category::TShirt => "T-Shirt",
            Category::Hoodie => "Hoodie",
            Category::Jeans => "Jeans",
            Category::Shoes => "Shoes",
            Category::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for Category {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "T-SHIRT" => Ok(Category::TShirt),
            "HOODIE" => Ok(Category::Hoodie),
            "JEANS" => Ok(Category::Jeans),
            "SHOES" => Ok(Category::Shoes),
            "OTHER" => Ok(Category::Other),
            other => Err(UnknownVariant::new("category", other)),
        }
    }
}

/// Descriptive and pricing fields of a product.
///
/// Everything staff may edit freely. Stock is deliberately absent: it only
/// moves through [`StockAdjustment`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub name: String,
    pub category: Category,
    pub size: String,
    pub buying_price: Money,
    pub selling_price: Money,
}

impl ProductDetails {
    fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::InvalidProduct("name is required".into()));
        }
        if self.name.chars().count() > 100 {
            return Err(CatalogError::InvalidProduct(
                "name must be at most 100 characters".into(),
            ));
        }
        if self.size.chars().count() > 10 {
            return Err(CatalogError::InvalidProduct(
                "size must be at most 10 characters".into(),
            ));
        }
        if self.buying_price.is_negative() {
            return Err(CatalogError::InvalidProduct(format!(
                "buying price {} must not be negative",
                self.buying_price
            )));
        }
        if !self.selling_price.is_positive() {
            return Err(CatalogError::InvalidProduct(format!(
                "selling price {} must be greater than zero",
                self.selling_price
            )));
        }
        for (label, price) in [("buying", self.buying_price), ("selling", self.selling_price)] {
            if !price.is_within_limit() {
                return Err(CatalogError::InvalidProduct(format!(
                    "{label} price must be at most {}",
                    Money::MAX
                )));
            }
        }
        Ok(())
    }
}

/// A product in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: Category,
    pub size: String,
    pub buying_price: Money,
    pub selling_price: Money,
    pub quantity_on_hand: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a product with an opening stock level.
    pub fn create(
        details: ProductDetails,
        opening_quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, CatalogError> {
        details.validate()?;

        Ok(Self {
            id: ProductId::new(),
            name: details.name.trim().to_string(),
            category: details.category,
            size: details.size.trim().to_string(),
            buying_price: details.buying_price,
            selling_price: details.selling_price,
            quantity_on_hand: opening_quantity,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces the descriptive and pricing fields. Stock is untouched.
    pub fn update_details(
        &mut self,
        details: ProductDetails,
        now: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        details.validate()?;

        self.name = details.name.trim().to_string();
        self.category = details.category;
        self.size = details.size.trim().to_string();
        self.buying_price = details.buying_price;
        self.selling_price = details.selling_price;
        self.updated_at = now;
        Ok(())
    }

    /// Applies a signed stock change, refusing to go below zero or past
    /// `u32::MAX`.
    ///
    /// Returns the new on-hand quantity. On error nothing changes.
    pub fn apply_stock_delta(
        &mut self,
        delta: i64,
        now: DateTime<Utc>,
    ) -> Result<u32, StockError> {
        let next = i64::from(self.quantity_on_hand).saturating_add(delta);
        if next < 0 {
            return Err(InsufficientStock {
                product_id: self.id,
                available: self.quantity_on_hand,
                requested: u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
            }
            .into());
        }

        let next = u32::try_from(next).map_err(|_| StockLimitExceeded {
            product_id: self.id,
            on_hand: self.quantity_on_hand,
            added: delta.unsigned_abs(),
        })?;

        self.quantity_on_hand = next;
        self.updated_at = now;
        Ok(self.quantity_on_hand)
    }

    /// Returns true if stock is at or below `threshold`.
    pub fn is_low_stock(&self, threshold: u32) -> bool {
        self.quantity_on_hand <= threshold
    }

    /// Returns true if at least `quantity` units are on hand.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.quantity_on_hand >= quantity
    }

    /// Per-unit margin between selling and buying price.
    pub fn unit_margin(&self) -> Money {
        self.selling_price - self.buying_price
    }
}

/// A walk-in sale recorded directly against stock, outside any order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub product_id: ProductId,
    pub quantity_sold: u32,
    pub total_price: Money,
    pub sold_at: DateTime<Utc>,
}

impl Sale {
    /// Prices a sale at the product's current selling price.
    ///
    /// Returns the sale together with the stock decrement that must be
    /// applied with it.
    pub fn record(
        product: &Product,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(Self, StockAdjustment), CatalogError> {
        if quantity == 0 {
            return Err(CatalogError::InvalidQuantity { quantity });
        }

        if !product.has_stock_for(quantity) {
            return Err(InsufficientStock {
                product_id: product.id,
                available: product.quantity_on_hand,
                requested: quantity,
            }
            .into());
        }

        let total_price = product
            .selling_price
            .checked_multiply(quantity)
            .filter(Money::is_within_limit)
            .ok_or(CatalogError::TotalTooLarge { limit: Money::MAX })?;

        let sale = Self {
            id: SaleId::new(),
            product_id: product.id,
            quantity_sold: quantity,
            total_price,
            sold_at: now,
        };

        Ok((sale, StockAdjustment::reserve(product.id, quantity)))
    }
}
