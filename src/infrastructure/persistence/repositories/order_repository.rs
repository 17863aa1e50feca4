use crate::domain::repositories::OrderRepository;
use crate::domain::types::{Coin, Order, OrderSide, OrderStatus};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

pub struct SqliteOrderRepository {
    database: Database,
}

impl SqliteOrderRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    decision_id: String,
    cycle_id: i64,
    coin: String,
    side: String,
    intended_size: String,
    filled_size: String,
    limit_price: Option<String>,
    leverage: i64,
    reduce_only: bool,
    client_order_id: String,
    exchange_order_id: Option<i64>,
    status: String,
    submitted_at: i64,
    finalized_at: Option<i64>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order> {
        Ok(Order {
            order_id: Uuid::from_str(&self.order_id).context("Corrupt order id")?,
            decision_id: Uuid::from_str(&self.decision_id).context("Corrupt decision id")?,
            cycle_id: self.cycle_id,
            coin: Coin::from_str(&self.coin)?,
            side: OrderSide::from_str(&self.side)?,
            intended_size: Decimal::from_str(&self.intended_size).unwrap_or_default(),
            filled_size: Decimal::from_str(&self.filled_size).unwrap_or_default(),
            limit_price: self.limit_price.and_then(|p| Decimal::from_str(&p).ok()),
            leverage: self.leverage as u32,
            reduce_only: self.reduce_only,
            client_order_id: self.client_order_id,
            exchange_order_id: self.exchange_order_id,
            status: OrderStatus::from_str(&self.status)?,
            submitted_at: DateTime::<Utc>::from_timestamp_millis(self.submitted_at)
                .unwrap_or_else(Utc::now),
            finalized_at: self.finalized_at.and_then(DateTime::<Utc>::from_timestamp_millis),
            error_code: self.error_code,
            error_message: self.error_message,
        })
    }
}

const ORDER_COLUMNS: &str = r#"
    order_id, decision_id, cycle_id, coin, side,
    intended_size, filled_size, limit_price, leverage, reduce_only,
    client_order_id, exchange_order_id, status,
    submitted_at, finalized_at, error_code, error_message
"#;

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    /// Upsert by `order_id`; called at every status transition.
    async fn save(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_trades (
                order_id,
                decision_id,
                cycle_id,
                coin,
                side,
                intended_size,
                filled_size,
                limit_price,
                leverage,
                reduce_only,
                client_order_id,
                exchange_order_id,
                status,
                submitted_at,
                finalized_at,
                error_code,
                error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT(order_id) DO UPDATE SET
                filled_size = excluded.filled_size,
                exchange_order_id = excluded.exchange_order_id,
                status = excluded.status,
                finalized_at = excluded.finalized_at,
                error_code = excluded.error_code,
                error_message = excluded.error_message
            "#,
        )
        .bind(order.order_id.to_string())
        .bind(order.decision_id.to_string())
        .bind(order.cycle_id)
        .bind(order.coin.to_string())
        .bind(order.side.to_string())
        .bind(order.intended_size.to_string())
        .bind(order.filled_size.to_string())
        .bind(order.limit_price.map(|p| p.to_string()))
        .bind(order.leverage as i64)
        .bind(order.reduce_only)
        .bind(&order.client_order_id)
        .bind(order.exchange_order_id)
        .bind(order.status.to_string())
        .bind(order.submitted_at.timestamp_millis())
        .bind(order.finalized_at.map(|t| t.timestamp_millis()))
        .bind(&order.error_code)
        .bind(&order.error_message)
        .execute(&self.database.pool)
        .await
        .context("Failed to save order")?;

        Ok(())
    }

    async fn find_by_decision(&self, decision_id: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM agent_trades WHERE decision_id = $1 ORDER BY submitted_at, order_id",
            ORDER_COLUMNS
        ))
        .bind(decision_id.to_string())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load orders for decision")?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }

    async fn find_by_cycle(&self, cycle_id: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM agent_trades WHERE cycle_id = $1 ORDER BY submitted_at, order_id",
            ORDER_COLUMNS
        ))
        .bind(cycle_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load orders for cycle")?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }
}
