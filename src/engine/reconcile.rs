use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::CacheInvalidator;
use crate::engine::restore_stock;
use crate::error::EngineError;
use crate::models::{Order, PaymentResult};
use crate::store::{Store, StoreTx};

const MAX_ATTEMPTS: u32 = 5;

pub fn reconcile_queue() -> (ReconcileQueue, UnboundedReceiver<Uuid>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ReconcileQueue { sender }, receiver)
}

/// After-commit handle the order engine pushes committed order ids into.
#[derive(Clone)]
pub struct ReconcileQueue {
    sender: UnboundedSender<Uuid>,
}

impl ReconcileQueue {
    pub fn enqueue(&self, order_id: Uuid) {
        if self.sender.send(order_id).is_err() {
            error!(%order_id, "reconcile worker is gone; parked webhook left unconsumed");
        }
    }
}

/// Consumes a parked payment result for a freshly created order. Idempotent:
/// if the webhook engine already applied the result there is no
/// `pending_webhooks` row and the task no-ops.
pub struct Reconciler<S> {
    store: Arc<S>,
    cache: Arc<dyn CacheInvalidator>,
}

impl<S: Store> Reconciler<S> {
    pub fn new(store: Arc<S>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { store, cache }
    }

    pub async fn run(self, mut jobs: UnboundedReceiver<Uuid>) {
        while let Some(order_id) = jobs.recv().await {
            self.reconcile_with_retry(order_id).await;
        }
    }

    async fn reconcile_with_retry(&self, order_id: Uuid) {
        let mut delay = Duration::from_millis(100);
        for attempt in 1..=MAX_ATTEMPTS {
            match self.reconcile_order(order_id).await {
                Ok(()) => return,
                Err(err) => {
                    warn!(%order_id, attempt, error = %err, "reconciliation failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        error!(%order_id, "reconciliation gave up after {MAX_ATTEMPTS} attempts");
    }

    pub async fn reconcile_order(&self, order_id: Uuid) -> Result<(), EngineError> {
        let Some(order) = self.store.get_order(order_id).await? else {
            warn!(%order_id, "order vanished before reconciliation");
            return Ok(());
        };

        let mut tx = self.store.begin().await?;
        match consume(&mut tx, &order).await {
            Ok(outcome) => {
                tx.commit().await?;
                if let Some(product_id) = outcome {
                    self.cache.invalidate(product_id);
                }
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed during reconciliation");
                }
                Err(err)
            }
        }
    }
}

async fn consume<T: StoreTx>(tx: &mut T, order: &Order) -> Result<Option<Uuid>, EngineError> {
    let Some(parked) = tx.pending_webhook_for_hold(order.hold_id).await? else {
        return Ok(None);
    };

    // The status must be read before the row is deleted.
    let result = PaymentResult::parse(&parked.status);
    tx.set_order_status(order.id, &parked.status).await?;
    tx.delete_pending_webhook(parked.id).await?;
    info!(order_id = %order.id, status = %parked.status, "applied parked payment result");

    if result == Some(PaymentResult::Failed) {
        let hold = tx
            .lock_hold(order.hold_id, None)
            .await?
            .ok_or_else(|| EngineError::Storage("hold row missing during reconciliation".to_string()))?;
        restore_stock(tx, hold.product_id, hold.qty).await?;
        return Ok(Some(hold.product_id));
    }
    Ok(None)
}
