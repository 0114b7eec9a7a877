use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CustomerId, OrderId, OrderItemId, PaymentId, ProductId, SaleId, Version,
};
use domain::{
    InsufficientStock, Money, Order, OrderItem, Payment, PaymentStatus, PhoneNumber, Product,
    Sale, StockAdjustment, StockLimitExceeded,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{Result, StoreError, store::Store};

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Applies one guarded stock change on `conn`.
    ///
    /// The range predicate on `quantity_on_hand + delta` makes the check and
    /// the write a single statement, so concurrent decrements serialize on
    /// the row lock and the loser sees zero rows updated.
    async fn apply_adjustment(
        conn: &mut PgConnection,
        adjustment: StockAdjustment,
        at: DateTime<Utc>,
    ) -> Result<u32> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET quantity_on_hand = quantity_on_hand + $2, updated_at = $3
            WHERE id = $1 AND quantity_on_hand + $2 BETWEEN 0 AND $4
            RETURNING quantity_on_hand
            "#,
        )
        .bind(adjustment.product_id.as_uuid())
        .bind(adjustment.delta)
        .bind(at)
        .bind(i64::from(u32::MAX))
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(quantity) = updated {
            return to_u32(quantity, "quantity_on_hand");
        }

        let current: Option<i64> =
            sqlx::query_scalar("SELECT quantity_on_hand FROM products WHERE id = $1")
                .bind(adjustment.product_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?;

        match current {
            None => Err(StoreError::not_found("product", adjustment.product_id)),
            Some(on_hand) if adjustment.delta > 0 => Err(StockLimitExceeded {
                product_id: adjustment.product_id,
                on_hand: to_u32(on_hand, "quantity_on_hand")?,
                added: adjustment.delta.unsigned_abs(),
            }
            .into()),
            Some(available) => Err(InsufficientStock {
                product_id: adjustment.product_id,
                available: to_u32(available, "quantity_on_hand")?,
                requested: adjustment.units(),
            }
            .into()),
        }
    }

    /// Applies all adjustments in product-id order so that concurrent
    /// transactions lock product rows in the same sequence.
    async fn apply_adjustments(
        conn: &mut PgConnection,
        adjustments: &[StockAdjustment],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut ordered = adjustments.to_vec();
        ordered.sort_by_key(|a| a.product_id);

        for adjustment in ordered {
            Self::apply_adjustment(&mut *conn, adjustment, at).await?;
        }
        Ok(())
    }

    /// Locks the order row and checks it is still at the caller's version.
    async fn lock_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
        let stored: Option<i64> =
            sqlx::query_scalar("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order.id().as_uuid())
                .fetch_optional(&mut *conn)
                .await?;

        match stored {
            None => Err(StoreError::not_found("order", order.id())),
            Some(actual) if actual != order.version().as_i64() => {
                Err(StoreError::ConcurrencyConflict {
                    entity: "order",
                    id: order.id().to_string(),
                    expected: order.version(),
                    actual: Version::new(actual),
                })
            }
            Some(_) => Ok(()),
        }
    }

    async fn load_items(&self, order_ids: Vec<Uuid>) -> Result<HashMap<OrderId, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, product_name, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let item = Self::row_to_item(row)?;
            items.entry(item.order_id).or_default().push(item);
        }
        Ok(items)
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        let category: String = row.try_get("category")?;

        Ok(Product {
            id: ProductId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            category: parse_column(&category)?,
            size: row.try_get("size")?,
            buying_price: Money::from_cents(row.try_get("buying_price_cents")?),
            selling_price: Money::from_cents(row.try_get("selling_price_cents")?),
            quantity_on_hand: to_u32(row.try_get("quantity_on_hand")?, "quantity_on_hand")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_sale(row: PgRow) -> Result<Sale> {
        Ok(Sale {
            id: SaleId::from_uuid(row.try_get("id")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            quantity_sold: to_u32(row.try_get("quantity_sold")?, "quantity_sold")?,
            total_price: Money::from_cents(row.try_get("total_price_cents")?),
            sold_at: row.try_get("sold_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            id: OrderItemId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            product_name: row.try_get("product_name")?,
            quantity: to_u32(row.try_get("quantity")?, "quantity")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        })
    }

    fn row_to_order(row: PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let status: String = row.try_get("status")?;

        Ok(Order::from_parts(
            OrderId::from_uuid(row.try_get("id")?),
            CustomerId::from_uuid(row.try_get("customer_id")?),
            parse_column(&status)?,
            items,
            row.try_get("created_at")?,
            row.try_get("updated_at")?,
            Version::new(row.try_get("version")?),
        ))
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        let phone: String = row.try_get("phone_number")?;
        let phone_number =
            PhoneNumber::parse(&phone).map_err(|e| StoreError::InvalidData(e.to_string()))?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            phone_number,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            checkout_request_id: row.try_get("checkout_request_id")?,
            merchant_request_id: row.try_get("merchant_request_id")?,
            receipt_number: row.try_get("receipt_number")?,
            transaction_date: row.try_get("transaction_date")?,
            result_desc: row.try_get("result_desc")?,
            status: parse_column(&status)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{column} out of range: {value}")))
}

fn parse_column<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::InvalidData(e.to_string()))
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, category, size, buying_price_cents,
                                  selling_price_cents, quantity_on_hand, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.category.as_str())
        .bind(&product.size)
        .bind(product.buying_price.cents())
        .bind(product.selling_price.cents())
        .bind(i64::from(product.quantity_on_hand))
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, name, category, size, buying_price_cents, selling_price_cents,
                   quantity_on_hand, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, category, size, buying_price_cents, selling_price_cents,
                   quantity_on_hand, created_at, updated_at
            FROM products
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn list_low_stock(&self, threshold: u32) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, category, size, buying_price_cents, selling_price_cents,
                   quantity_on_hand, created_at, updated_at
            FROM products
            WHERE quantity_on_hand <= $1
            ORDER BY quantity_on_hand ASC, name ASC
            "#,
        )
        .bind(i64::from(threshold))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn update_product_details(&self, product: &Product) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, category = $3, size = $4, buying_price_cents = $5,
                selling_price_cents = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.category.as_str())
        .bind(&product.size)
        .bind(product.buying_price.cents())
        .bind(product.selling_price.cents())
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("product", product.id));
        }
        Ok(())
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("order_items_product_fk")
                {
                    return StoreError::ProductInUse(id);
                }
                StoreError::Database(e)
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn adjust_stock(&self, adjustment: StockAdjustment, at: DateTime<Utc>) -> Result<u32> {
        let mut conn = self.pool.acquire().await?;
        Self::apply_adjustment(&mut conn, adjustment, at).await
    }

    async fn record_sale(&self, sale: &Sale) -> Result<u32> {
        let mut tx = self.pool.begin().await?;

        let remaining = Self::apply_adjustment(
            &mut tx,
            StockAdjustment::reserve(sale.product_id, sale.quantity_sold),
            sale.sold_at,
        )
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sales (id, product_id, quantity_sold, total_price_cents, sold_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(sale.id.as_uuid())
        .bind(sale.product_id.as_uuid())
        .bind(i64::from(sale.quantity_sold))
        .bind(sale.total_price.cents())
        .bind(sale.sold_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(remaining)
    }

    async fn list_sales(&self) -> Result<Vec<Sale>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, quantity_sold, total_price_cents, sold_at
            FROM sales
            ORDER BY sold_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_sale).collect()
    }

    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let version = Version::first();

        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, status, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.customer_id().as_uuid())
        .bind(order.status().as_str())
        .bind(version.as_i64())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::ConcurrencyConflict {
                    entity: "order",
                    id: order.id().to_string(),
                    expected: Version::initial(),
                    actual: version,
                };
            }
            StoreError::Database(e)
        })?;

        Ok(version)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, customer_id, status, version, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = self
            .load_items(vec![id.as_uuid()])
            .await?
            .remove(&id)
            .unwrap_or_default();

        Self::row_to_order(row, items).map(Some)
    }

    async fn list_orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, status, version, created_at, updated_at
            FROM orders
            WHERE customer_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(ids).await?;

        rows.into_iter()
            .map(|row| {
                let id = OrderId::from_uuid(row.try_get("id")?);
                Self::row_to_order(row, items.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn commit_order(
        &self,
        order: &Order,
        adjustments: &[StockAdjustment],
    ) -> Result<Version> {
        let mut tx = self.pool.begin().await?;

        Self::lock_order(&mut tx, order).await?;
        Self::apply_adjustments(&mut tx, adjustments, order.updated_at()).await?;

        let next = order.version().next();
        sqlx::query("UPDATE orders SET status = $2, version = $3, updated_at = $4 WHERE id = $1")
            .bind(order.id().as_uuid())
            .bind(order.status().as_str())
            .bind(next.as_i64())
            .bind(order.updated_at())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order.id().as_uuid())
            .execute(&mut *tx)
            .await?;

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, product_name, quantity,
                                         unit_price_cents, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(&item.product_name)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.cents())
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(next)
    }

    async fn delete_order(&self, order: &Order, adjustments: &[StockAdjustment]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        Self::lock_order(&mut tx, order).await?;
        Self::apply_adjustments(&mut tx, adjustments, Utc::now()).await?;

        // Items and payments go with the order via ON DELETE CASCADE
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order.id().as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, phone_number, amount_cents, checkout_request_id,
                                  merchant_request_id, receipt_number, transaction_date,
                                  result_desc, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.phone_number.as_str())
        .bind(payment.amount.cents())
        .bind(&payment.checkout_request_id)
        .bind(&payment.merchant_request_id)
        .bind(&payment.receipt_number)
        .bind(payment.transaction_date)
        .bind(&payment.result_desc)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("unique_checkout_request_id") {
                    return StoreError::DuplicateCorrelation(payment.checkout_request_id.clone());
                }
                if db_err.is_foreign_key_violation() {
                    return StoreError::not_found("order", payment.order_id);
                }
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn get_payment_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, order_id, phone_number, amount_cents, checkout_request_id,
                   merchant_request_id, receipt_number, transaction_date, result_desc,
                   status, created_at, updated_at
            FROM payments
            WHERE checkout_request_id = $1
            "#,
        )
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn list_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, phone_number, amount_cents, checkout_request_id,
                   merchant_request_id, receipt_number, transaction_date, result_desc,
                   status, created_at, updated_at
            FROM payments
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn transition_payment(&self, payment: &Payment, from: PaymentStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET phone_number = $2, amount_cents = $3, receipt_number = $4,
                transaction_date = $5, result_desc = $6, status = $7, updated_at = $8
            WHERE id = $1 AND status = $9
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.phone_number.as_str())
        .bind(payment.amount.cents())
        .bind(&payment.receipt_number)
        .bind(payment.transaction_date)
        .bind(&payment.result_desc)
        .bind(payment.status.as_str())
        .bind(payment.updated_at)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("one_success_per_order")
            {
                return StoreError::PaymentAlreadySettled(payment.order_id);
            }
            StoreError::Database(e)
        })?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM payments WHERE id = $1")
            .bind(payment.id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("payment", payment.id)),
        }
    }
}
