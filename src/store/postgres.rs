use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, TransactionManager};
use uuid::Uuid;

use crate::models::{
    Hold, HoldStatus, NewHold, NewOrder, NewPendingWebhook, NewProduct, NewWebhookLog, Order,
    PendingWebhook, Product, WebhookLog,
};
use crate::schema::{holds, orders, pending_webhooks, products, webhook_logs};
use crate::store::{Store, StoreError, StoreTx};

type DbPool = Pool<AsyncPgConnection>;
type TxManager = <AsyncPgConnection as AsyncConnection>::TransactionManager;

fn map_diesel(err: diesel::result::Error) -> StoreError {
    use diesel::result::{DatabaseErrorKind, Error};
    match err {
        Error::NotFound => StoreError::NotFound,
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::UniqueViolation,
        Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => StoreError::Conflict,
        other => StoreError::Storage(other.to_string()),
    }
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub struct PgStoreTx {
    conn: PooledConnection<'static, AsyncPgConnection>,
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgStoreTx;

    async fn begin(&self) -> Result<PgStoreTx, StoreError> {
        let mut conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        TxManager::begin_transaction(&mut *conn)
            .await
            .map_err(map_diesel)?;
        Ok(PgStoreTx { conn })
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        products::table
            .find(id)
            .first::<Product>(&mut *conn)
            .await
            .optional()
            .map_err(map_diesel)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        orders::table
            .find(id)
            .first::<Order>(&mut *conn)
            .await
            .optional()
            .map_err(map_diesel)
    }

    async fn get_webhook_log(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<WebhookLog>, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        webhook_logs::table
            .find(idempotency_key)
            .first::<WebhookLog>(&mut *conn)
            .await
            .optional()
            .map_err(map_diesel)
    }

    async fn expired_hold_ids(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        holds::table
            .filter(holds::status.eq(HoldStatus::Pending.as_str()))
            .filter(holds::expires_at.le(cutoff))
            .select(holds::id)
            .load::<Uuid>(&mut *conn)
            .await
            .map_err(map_diesel)
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn commit(mut self) -> Result<(), StoreError> {
        TxManager::commit_transaction(&mut *self.conn)
            .await
            .map_err(map_diesel)
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        TxManager::rollback_transaction(&mut *self.conn)
            .await
            .map_err(map_diesel)
    }

    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        products::table
            .find(id)
            .for_update()
            .first::<Product>(&mut *self.conn)
            .await
            .optional()
            .map_err(map_diesel)
    }

    async fn insert_product(&mut self, product: NewProduct) -> Result<Product, StoreError> {
        diesel::insert_into(products::table)
            .values(&product)
            .get_result::<Product>(&mut *self.conn)
            .await
            .map_err(map_diesel)
    }

    async fn adjust_product_stock(&mut self, id: Uuid, delta: i32) -> Result<(), StoreError> {
        let updated = diesel::update(products::table.find(id))
            .set((
                products::total_stock.eq(products::total_stock + delta),
                products::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel)?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn lock_hold(
        &mut self,
        id: Uuid,
        status: Option<HoldStatus>,
    ) -> Result<Option<Hold>, StoreError> {
        let row = match status {
            Some(wanted) => holds::table
                .find(id)
                .filter(holds::status.eq(wanted.as_str()))
                .for_update()
                .first::<Hold>(&mut *self.conn)
                .await
                .optional()
                .map_err(map_diesel)?,
            None => holds::table
                .find(id)
                .for_update()
                .first::<Hold>(&mut *self.conn)
                .await
                .optional()
                .map_err(map_diesel)?,
        };
        Ok(row)
    }

    async fn insert_hold(&mut self, hold: NewHold) -> Result<Hold, StoreError> {
        diesel::insert_into(holds::table)
            .values(&hold)
            .get_result::<Hold>(&mut *self.conn)
            .await
            .map_err(map_diesel)
    }

    async fn set_hold_status(&mut self, id: Uuid, status: HoldStatus) -> Result<(), StoreError> {
        let updated = diesel::update(holds::table.find(id))
            .set((
                holds::status.eq(status.as_str()),
                holds::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel)?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        diesel::insert_into(orders::table)
            .values(&order)
            .get_result::<Order>(&mut *self.conn)
            .await
            .map_err(map_diesel)
    }

    async fn order_for_hold(&mut self, hold_id: Uuid) -> Result<Option<Order>, StoreError> {
        orders::table
            .filter(orders::hold_id.eq(hold_id))
            .first::<Order>(&mut *self.conn)
            .await
            .optional()
            .map_err(map_diesel)
    }

    async fn set_order_status(&mut self, id: Uuid, status: &str) -> Result<(), StoreError> {
        let updated = diesel::update(orders::table.find(id))
            .set((
                orders::status.eq(status),
                orders::updated_at.eq(Some(Utc::now())),
            ))
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel)?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_pending_webhook(
        &mut self,
        hold_id: Uuid,
        status: &str,
    ) -> Result<PendingWebhook, StoreError> {
        let row = NewPendingWebhook {
            id: Uuid::new_v4(),
            hold_id,
            status: status.to_string(),
        };
        diesel::insert_into(pending_webhooks::table)
            .values(&row)
            .get_result::<PendingWebhook>(&mut *self.conn)
            .await
            .map_err(map_diesel)
    }

    async fn pending_webhook_for_hold(
        &mut self,
        hold_id: Uuid,
    ) -> Result<Option<PendingWebhook>, StoreError> {
        pending_webhooks::table
            .filter(pending_webhooks::hold_id.eq(hold_id))
            .first::<PendingWebhook>(&mut *self.conn)
            .await
            .optional()
            .map_err(map_diesel)
    }

    async fn delete_pending_webhook(&mut self, id: Uuid) -> Result<(), StoreError> {
        let deleted = diesel::delete(pending_webhooks::table.find(id))
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel)?;
        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_webhook_log(&mut self, log: NewWebhookLog) -> Result<(), StoreError> {
        diesel::insert_into(webhook_logs::table)
            .values(&log)
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel)?;
        Ok(())
    }
}
