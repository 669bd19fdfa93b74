pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Hold, HoldStatus, NewHold, NewOrder, NewProduct, NewWebhookLog, Order, PendingWebhook, Product,
    WebhookLog,
};

pub use memory::{MemState, MemStore};
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("unique constraint violated")]
    UniqueViolation,

    #[error("transaction conflict")]
    Conflict,

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Transactional persistence over the five checkout entities. All multi-row
/// mutations happen inside a [`StoreTx`] scope; the plain reads here never
/// take row locks.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn get_webhook_log(&self, idempotency_key: &str)
        -> Result<Option<WebhookLog>, StoreError>;

    /// Ids of holds still `pending` whose deadline has passed. The sweeper
    /// re-locks each one with the status filter before touching it.
    async fn expired_hold_ids(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}

/// One open transaction. `lock_*` reads take an exclusive row lock and hold
/// it until commit or rollback.
#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;

    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError>;

    async fn insert_product(&mut self, product: NewProduct) -> Result<Product, StoreError>;

    /// Adds `delta` (possibly negative) to `products.total_stock`.
    async fn adjust_product_stock(&mut self, id: Uuid, delta: i32) -> Result<(), StoreError>;

    async fn lock_hold(
        &mut self,
        id: Uuid,
        status: Option<HoldStatus>,
    ) -> Result<Option<Hold>, StoreError>;

    async fn insert_hold(&mut self, hold: NewHold) -> Result<Hold, StoreError>;

    async fn set_hold_status(&mut self, id: Uuid, status: HoldStatus) -> Result<(), StoreError>;

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError>;

    async fn order_for_hold(&mut self, hold_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn set_order_status(&mut self, id: Uuid, status: &str) -> Result<(), StoreError>;

    async fn insert_pending_webhook(
        &mut self,
        hold_id: Uuid,
        status: &str,
    ) -> Result<PendingWebhook, StoreError>;

    async fn pending_webhook_for_hold(
        &mut self,
        hold_id: Uuid,
    ) -> Result<Option<PendingWebhook>, StoreError>;

    async fn delete_pending_webhook(&mut self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_webhook_log(&mut self, log: NewWebhookLog) -> Result<(), StoreError>;
}
