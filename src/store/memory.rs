use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    Hold, HoldStatus, NewHold, NewOrder, NewProduct, NewWebhookLog, Order, PendingWebhook, Product,
    WebhookLog,
};
use crate::store::{Store, StoreError, StoreTx};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemState {
    pub products: HashMap<Uuid, Product>,
    pub holds: HashMap<Uuid, Hold>,
    pub orders: HashMap<Uuid, Order>,
    pub webhook_logs: HashMap<String, WebhookLog>,
    pub pending_webhooks: HashMap<Uuid, PendingWebhook>,
}

/// In-memory store. A transaction owns the single state mutex for its whole
/// lifetime, which makes every transaction serializable; rollback restores
/// the snapshot taken at `begin`.
#[derive(Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the whole state, for test assertions.
    pub async fn dump(&self) -> MemState {
        self.state.lock().await.clone()
    }
}

pub struct MemStoreTx {
    guard: OwnedMutexGuard<MemState>,
    undo: MemState,
}

#[async_trait]
impl Store for MemStore {
    type Tx = MemStoreTx;

    async fn begin(&self) -> Result<MemStoreTx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let undo = guard.clone();
        Ok(MemStoreTx { guard, undo })
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn get_webhook_log(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<WebhookLog>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .webhook_logs
            .get(idempotency_key)
            .cloned())
    }

    async fn expired_hold_ids(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .holds
            .values()
            .filter(|h| h.status == HoldStatus::Pending.as_str() && h.expires_at <= cutoff)
            .map(|h| h.id)
            .collect())
    }
}

#[async_trait]
impl StoreTx for MemStoreTx {
    async fn commit(self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        *self.guard = self.undo;
        Ok(())
    }

    async fn lock_product(&mut self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.guard.products.get(&id).cloned())
    }

    async fn insert_product(&mut self, product: NewProduct) -> Result<Product, StoreError> {
        let row = Product {
            id: product.id,
            name: product.name,
            total_stock: product.total_stock,
            price: product.price,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        };
        self.guard.products.insert(row.id, row.clone());
        Ok(row)
    }

    async fn adjust_product_stock(&mut self, id: Uuid, delta: i32) -> Result<(), StoreError> {
        let product = self.guard.products.get_mut(&id).ok_or(StoreError::NotFound)?;
        let next = product.total_stock + delta;
        if next < 0 {
            return Err(StoreError::Storage(
                "total_stock check constraint violated".to_string(),
            ));
        }
        product.total_stock = next;
        product.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn lock_hold(
        &mut self,
        id: Uuid,
        status: Option<HoldStatus>,
    ) -> Result<Option<Hold>, StoreError> {
        let hold = self.guard.holds.get(&id);
        Ok(hold
            .filter(|h| status.map_or(true, |s| h.status == s.as_str()))
            .cloned())
    }

    async fn insert_hold(&mut self, hold: NewHold) -> Result<Hold, StoreError> {
        let row = Hold {
            id: hold.id,
            product_id: hold.product_id,
            qty: hold.qty,
            status: hold.status,
            expires_at: hold.expires_at,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        };
        self.guard.holds.insert(row.id, row.clone());
        Ok(row)
    }

    async fn set_hold_status(&mut self, id: Uuid, status: HoldStatus) -> Result<(), StoreError> {
        let hold = self.guard.holds.get_mut(&id).ok_or(StoreError::NotFound)?;
        hold.status = status.as_str().to_string();
        hold.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        if self
            .guard
            .orders
            .values()
            .any(|o| o.hold_id == order.hold_id)
        {
            return Err(StoreError::UniqueViolation);
        }
        let row = Order {
            id: order.id,
            hold_id: order.hold_id,
            status: order.status,
            total_amount: order.total_amount,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        };
        self.guard.orders.insert(row.id, row.clone());
        Ok(row)
    }

    async fn order_for_hold(&mut self, hold_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self
            .guard
            .orders
            .values()
            .find(|o| o.hold_id == hold_id)
            .cloned())
    }

    async fn set_order_status(&mut self, id: Uuid, status: &str) -> Result<(), StoreError> {
        let order = self.guard.orders.get_mut(&id).ok_or(StoreError::NotFound)?;
        order.status = status.to_string();
        order.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_pending_webhook(
        &mut self,
        hold_id: Uuid,
        status: &str,
    ) -> Result<PendingWebhook, StoreError> {
        if self
            .guard
            .pending_webhooks
            .values()
            .any(|p| p.hold_id == hold_id)
        {
            return Err(StoreError::UniqueViolation);
        }
        let row = PendingWebhook {
            id: Uuid::new_v4(),
            hold_id,
            status: status.to_string(),
            created_at: Some(Utc::now()),
        };
        self.guard.pending_webhooks.insert(row.id, row.clone());
        Ok(row)
    }

    async fn pending_webhook_for_hold(
        &mut self,
        hold_id: Uuid,
    ) -> Result<Option<PendingWebhook>, StoreError> {
        Ok(self
            .guard
            .pending_webhooks
            .values()
            .find(|p| p.hold_id == hold_id)
            .cloned())
    }

    async fn delete_pending_webhook(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.guard
            .pending_webhooks
            .remove(&id)
            .ok_or(StoreError::NotFound)?;
        Ok(())
    }

    async fn insert_webhook_log(&mut self, log: NewWebhookLog) -> Result<(), StoreError> {
        if self.guard.webhook_logs.contains_key(&log.idempotency_key) {
            return Err(StoreError::UniqueViolation);
        }
        let row = WebhookLog {
            idempotency_key: log.idempotency_key.clone(),
            response_body: log.response_body,
            response_status_code: log.response_status_code,
            created_at: Some(Utc::now()),
        };
        self.guard.webhook_logs.insert(log.idempotency_key, row);
        Ok(())
    }
}
