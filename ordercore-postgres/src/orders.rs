use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ordercore::{
    Currency, CustomerId, Envelope, MessageId, Money, Order, OrderId, OrderItem, OrderRepository,
    OrderStatus, Outbox, OutboxEntry, OutboundMessage, PersistedOrder, ProductKey, Quantity,
    StoreError, StoreResult, Topic,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{query, Postgres, Row, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{corrupt, map_sqlx_error};
use crate::retry::retry_transient;
use crate::{version_from_db, version_to_db, PostgresStore};

async fn write_items(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
    operation: &'static str,
) -> StoreResult<()> {
    for (position, item) in order.items().iter().enumerate() {
        let position = i32::try_from(position)
            .map_err(|_| StoreError::Internal(format!("{operation}: too many line items")))?;
        query(
            "INSERT INTO order_items \
             (order_id, product_key, position, name, quantity, unit_price, currency) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(order.id().as_ref())
        .bind(item.product_key().as_ref())
        .bind(position)
        .bind(item.name())
        .bind(item.quantity().value())
        .bind(item.unit_price().amount())
        .bind(item.currency().as_ref())
        .execute(&mut **tx)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;
    }
    Ok(())
}

async fn append_outbox(
    tx: &mut Transaction<'_, Postgres>,
    messages: Vec<OutboundMessage>,
    operation: &'static str,
) -> StoreResult<()> {
    for message in messages {
        let entry = OutboxEntry::new(message);
        query(
            "INSERT INTO outbox (message_id, topic, partition_key, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id().into_inner())
        .bind(entry.topic.as_str())
        .bind(&entry.envelope.partition_key)
        .bind(Json(&entry.envelope.payload))
        .bind(entry.created_at.into_datetime())
        .execute(&mut **tx)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;
    }
    Ok(())
}

async fn load_items(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &OrderId,
) -> StoreResult<Vec<OrderItem>> {
    const OPERATION: &str = "load_items";
    let rows = query(
        "SELECT product_key, name, quantity, unit_price, currency \
         FROM order_items WHERE order_id = $1 ORDER BY position",
    )
    .bind(order_id.as_ref())
    .fetch_all(&mut **tx)
    .await
    .map_err(|error| map_sqlx_error(error, OPERATION))?;

    rows.iter()
        .map(|row| {
            let product_key: String = column(row, "product_key")?;
            let name: String = column(row, "name")?;
            let quantity: Decimal = column(row, "quantity")?;
            let unit_price: Decimal = column(row, "unit_price")?;
            let currency: String = column(row, "currency")?;

            let currency = Currency::try_new(currency).map_err(|e| corrupt(OPERATION, e))?;
            OrderItem::new(
                ProductKey::try_new(product_key).map_err(|e| corrupt(OPERATION, e))?,
                name,
                Quantity::new(quantity).map_err(|e| corrupt(OPERATION, e))?,
                Money::new(unit_price, currency).map_err(|e| corrupt(OPERATION, e))?,
            )
            .map_err(|e| corrupt(OPERATION, e))
        })
        .collect()
}

impl PostgresStore {
    /// Reads the order row and its items from one snapshot.
    async fn load_once(&self, id: &OrderId) -> StoreResult<Option<Order>> {
        const OPERATION: &str = "load_order";
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let Some(row) = query(
            "SELECT customer_id, status, created_at, updated_at, version FROM orders WHERE id = $1",
        )
        .bind(id.as_ref())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| map_sqlx_error(error, OPERATION))?
        else {
            return Ok(None);
        };

        let customer_id: String = column(&row, "customer_id")?;
        let status: String = column(&row, "status")?;
        let created_at: DateTime<Utc> = column(&row, "created_at")?;
        let updated_at: DateTime<Utc> = column(&row, "updated_at")?;
        let version: i64 = column(&row, "version")?;
        let items = load_items(&mut tx, id).await?;
        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let persisted = PersistedOrder {
            id: id.clone(),
            customer_id: CustomerId::try_new(customer_id).map_err(|e| corrupt(OPERATION, e))?,
            status: OrderStatus::from_str(&status).map_err(|e| corrupt(OPERATION, e))?,
            items,
            created_at: created_at.into(),
            updated_at: updated_at.into(),
            version: version_from_db(version, OPERATION)?,
        };
        Order::restore(persisted)
            .map(Some)
            .map_err(|e| corrupt(OPERATION, e))
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|error| map_sqlx_error(error, "decode_row"))
}

#[async_trait]
impl OrderRepository for PostgresStore {
    #[instrument(name = "postgres.insert_order", skip_all, fields(order_id = %order.id()))]
    async fn insert(&self, order: &Order, outbox: Vec<OutboundMessage>) -> StoreResult<u64> {
        const OPERATION: &str = "insert_order";
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        query(
            "INSERT INTO orders (id, customer_id, status, created_at, updated_at, version) \
             VALUES ($1, $2, $3, $4, $5, 1)",
        )
        .bind(order.id().as_ref())
        .bind(order.customer_id().as_ref())
        .bind(order.status().as_str())
        .bind(order.created_at().into_datetime())
        .bind(order.updated_at().into_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|error| match map_sqlx_error(error, OPERATION) {
            StoreError::AlreadyExists(_) => {
                StoreError::AlreadyExists(format!("order {}", order.id()))
            }
            other => other,
        })?;

        write_items(&mut tx, order, OPERATION).await?;
        append_outbox(&mut tx, outbox, OPERATION).await?;
        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        info!("[postgres.insert_order] order stored");
        Ok(1)
    }

    async fn load(&self, id: &OrderId) -> StoreResult<Option<Order>> {
        retry_transient(&self.retry, "load_order", || self.load_once(id)).await
    }

    #[instrument(
        name = "postgres.save_order",
        skip_all,
        fields(order_id = %order.id(), expected_version)
    )]
    async fn save(
        &self,
        order: &Order,
        expected_version: u64,
        outbox: Vec<OutboundMessage>,
    ) -> StoreResult<u64> {
        const OPERATION: &str = "save_order";
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let row = query(
            "UPDATE orders SET status = $2, updated_at = $3, version = version + 1 \
             WHERE id = $1 AND version = $4 \
             RETURNING version",
        )
        .bind(order.id().as_ref())
        .bind(order.status().as_str())
        .bind(order.updated_at().into_datetime())
        .bind(version_to_db(expected_version, OPERATION)?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| map_sqlx_error(error, OPERATION))?;

        let Some(row) = row else {
            debug!("[postgres.save_order] version check failed");
            return Err(StoreError::VersionConflict {
                key: order.id().to_string(),
                expected: expected_version,
            });
        };
        let version: i64 = column(&row, "version")?;

        query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order.id().as_ref())
            .execute(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;
        write_items(&mut tx, order, OPERATION).await?;
        append_outbox(&mut tx, outbox, OPERATION).await?;
        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))?;

        version_from_db(version, OPERATION)
    }
}

#[async_trait]
impl Outbox for PostgresStore {
    async fn pending(&self, limit: usize) -> StoreResult<Vec<OutboxEntry>> {
        const OPERATION: &str = "outbox_pending";
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = retry_transient(&self.retry, OPERATION, || async move {
            query(
                "SELECT message_id, topic, partition_key, payload, created_at FROM outbox \
                 WHERE published_at IS NULL ORDER BY id LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, OPERATION))
        })
        .await?;

        rows.iter()
            .map(|row| {
                let message_id: Uuid = column(row, "message_id")?;
                let topic: String = column(row, "topic")?;
                let partition_key: String = column(row, "partition_key")?;
                let Json(payload): Json<OutboundMessage> = column(row, "payload")?;
                let created_at: DateTime<Utc> = column(row, "created_at")?;

                Ok(OutboxEntry {
                    topic: Topic::from_str(&topic).map_err(|e| corrupt(OPERATION, e))?,
                    envelope: Envelope {
                        message_id: MessageId::try_new(message_id)
                            .map_err(|e| corrupt(OPERATION, e))?,
                        partition_key,
                        payload,
                    },
                    created_at: created_at.into(),
                })
            })
            .collect()
    }

    async fn mark_published(&self, ids: &[MessageId]) -> StoreResult<()> {
        const OPERATION: &str = "outbox_mark_published";
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_inner()).collect();
        retry_transient(&self.retry, OPERATION, || {
            let ids = &ids;
            async move {
                query(
                    "UPDATE outbox SET published_at = now() \
                     WHERE message_id = ANY($1) AND published_at IS NULL",
                )
                .bind(ids)
                .execute(&self.pool)
                .await
                .map_err(|error| map_sqlx_error(error, OPERATION))
            }
        })
        .await?;
        Ok(())
    }
}
