use std::sync::Arc;

use bigdecimal::{BigDecimal, RoundingMode};
use tracing::warn;
use uuid::Uuid;

use crate::engine::reconcile::ReconcileQueue;
use crate::error::EngineError;
use crate::models::{HoldStatus, NewOrder, Order, OrderStatus};
use crate::store::{Store, StoreError, StoreTx};

/// Creates at most one order per pending hold. The pending-status hold lock
/// plus the unique constraint on `orders.hold_id` make the insert safe under
/// concurrent attempts; reconciliation is enqueued only after the
/// transaction commits.
pub struct OrderEngine<S> {
    store: Arc<S>,
    reconcile: ReconcileQueue,
}

impl<S: Store> OrderEngine<S> {
    pub fn new(store: Arc<S>, reconcile: ReconcileQueue) -> Self {
        Self { store, reconcile }
    }

    pub async fn create_order(&self, hold_id: Uuid) -> Result<Order, EngineError> {
        let mut tx = self.store.begin().await?;
        match place_order(&mut tx, hold_id).await {
            Ok(order) => {
                tx.commit().await?;
                self.reconcile.enqueue(order.id);
                Ok(order)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after order creation error");
                }
                Err(err)
            }
        }
    }
}

async fn place_order<T: StoreTx>(tx: &mut T, hold_id: Uuid) -> Result<Order, EngineError> {
    let hold = tx
        .lock_hold(hold_id, Some(HoldStatus::Pending))
        .await?
        .ok_or_else(|| EngineError::invalid("hold_id", "hold invalid or expired"))?;

    let product = tx
        .lock_product(hold.product_id)
        .await?
        .ok_or_else(|| EngineError::Storage("product row missing for hold".to_string()))?;

    let order = match tx
        .insert_order(NewOrder {
            id: Uuid::new_v4(),
            hold_id,
            status: OrderStatus::Pending.as_str().to_string(),
            total_amount: order_total(&product.price, hold.qty),
        })
        .await
    {
        Err(StoreError::UniqueViolation) => {
            return Err(EngineError::invalid(
                "hold_id",
                "an order already exists for this hold",
            ));
        }
        other => other?,
    };

    tx.set_hold_status(hold_id, HoldStatus::Completed).await?;
    Ok(order)
}

/// Price captured at order creation, rounded half-up to cents.
pub fn order_total(price: &BigDecimal, qty: i32) -> BigDecimal {
    (price * BigDecimal::from(qty)).with_scale_round(2, RoundingMode::HalfUp)
}
