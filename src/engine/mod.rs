pub mod holds;
pub mod orders;
pub mod reconcile;
pub mod sweeper;
pub mod webhooks;

pub use holds::{HoldEngine, HoldReceipt};
pub use orders::OrderEngine;
pub use reconcile::{reconcile_queue, ReconcileQueue, Reconciler};
pub use sweeper::Sweeper;
pub use webhooks::{WebhookEngine, WebhookResponse};

use uuid::Uuid;

use crate::error::EngineError;
use crate::store::StoreTx;

/// Returns `qty` units to the product under its row lock. Callers schedule a
/// cache invalidation for the product once their transaction commits.
pub(crate) async fn restore_stock<T: StoreTx>(
    tx: &mut T,
    product_id: Uuid,
    qty: i32,
) -> Result<(), EngineError> {
    tx.lock_product(product_id)
        .await?
        .ok_or_else(|| EngineError::Storage("product row missing during stock restore".to_string()))?;
    tx.adjust_product_stock(product_id, qty).await?;
    Ok(())
}
