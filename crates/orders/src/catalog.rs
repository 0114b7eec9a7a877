//! Catalog service: products, restocking and walk-in sales.

use chrono::Utc;
use common::ProductId;
use domain::{CatalogError, Product, ProductDetails, Sale, StockAdjustment};
use store::Store;

use crate::error::ServiceError;

/// Staff-facing product and stock management.
pub struct CatalogService<S: Store> {
    store: S,
}

impl<S: Store> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds a product with an opening stock level.
    #[tracing::instrument(skip(self, details), fields(name = %details.name))]
    pub async fn add_product(
        &self,
        details: ProductDetails,
        opening_quantity: u32,
    ) -> Result<Product, ServiceError> {
        let product = Product::create(details, opening_quantity, Utc::now())?;
        self.store.insert_product(&product).await?;

        tracing::info!(product_id = %product.id, "product added");
        Ok(product)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product, ServiceError> {
        self.store
            .get_product(id)
            .await?
            .ok_or(ServiceError::ProductNotFound(id))
    }

    /// Lists all products, newest first.
    pub async fn list_products(&self) -> Result<Vec<Product>, ServiceError> {
        Ok(self.store.list_products().await?)
    }

    /// Replaces a product's descriptive and pricing fields.
    ///
    /// Existing order lines keep the price they were added at.
    #[tracing::instrument(skip(self, details))]
    pub async fn update_product(
        &self,
        id: ProductId,
        details: ProductDetails,
    ) -> Result<Product, ServiceError> {
        let mut product = self.get_product(id).await?;
        product.update_details(details, Utc::now())?;
        self.store.update_product_details(&product).await?;

        // Stock may have moved since the read above
        self.get_product(id).await
    }

    /// Deletes a product that no order line references.
    #[tracing::instrument(skip(self))]
    pub async fn delete_product(&self, id: ProductId) -> Result<(), ServiceError> {
        if !self.store.delete_product(id).await? {
            return Err(ServiceError::ProductNotFound(id));
        }
        tracing::info!("product deleted");
        Ok(())
    }

    /// Puts `quantity` units into stock.
    #[tracing::instrument(skip(self))]
    pub async fn restock(&self, id: ProductId, quantity: u32) -> Result<Product, ServiceError> {
        if quantity == 0 {
            return Err(CatalogError::InvalidQuantity { quantity }.into());
        }

        // Make sure a missing product reports as such rather than a store error
        self.get_product(id).await?;

        let on_hand = self
            .store
            .adjust_stock(StockAdjustment::release(id, quantity), Utc::now())
            .await?;
        tracing::info!(on_hand, "product restocked");

        self.get_product(id).await
    }

    /// Records a walk-in sale at the current selling price.
    #[tracing::instrument(skip(self))]
    pub async fn record_sale(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Sale, ServiceError> {
        let product = self.get_product(product_id).await?;
        let (sale, _) = Sale::record(&product, quantity, Utc::now())?;

        match self.store.record_sale(&sale).await {
            Ok(remaining) => {
                tracing::info!(sale_id = %sale.id, remaining, "sale recorded");
                Ok(sale)
            }
            Err(err) => {
                let err = ServiceError::from(err);
                if matches!(err, ServiceError::InsufficientStock(_)) {
                    metrics::counter!("stock_rejections_total").increment(1);
                }
                Err(err)
            }
        }
    }

    /// Lists all sales, newest first.
    pub async fn list_sales(&self) -> Result<Vec<Sale>, ServiceError> {
        Ok(self.store.list_sales().await?)
    }

    /// Products at or below `threshold` units, lowest stock first.
    #[tracing::instrument(skip(self))]
    pub async fn low_stock(&self, threshold: u32) -> Result<Vec<Product>, ServiceError> {
        Ok(self.store.list_low_stock(threshold).await?)
    }
}
