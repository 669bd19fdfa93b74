use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::cache::CacheInvalidator;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::{HoldStatus, NewHold};
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Serialize)]
pub struct HoldReceipt {
    pub hold_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Reserves stock by creating a `pending` hold and decrementing the product
/// row inside one transaction. The exclusive product lock serializes every
/// writer that intends to mutate stock, so the check-then-decrement below
/// can never oversell.
pub struct HoldEngine<S> {
    store: Arc<S>,
    cache: Arc<dyn CacheInvalidator>,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
}

impl<S: Store> HoldEngine<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<dyn CacheInvalidator>,
        clock: Arc<dyn Clock>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            hold_ttl,
        }
    }

    pub async fn create_hold(
        &self,
        product_id: Uuid,
        qty: i32,
    ) -> Result<HoldReceipt, EngineError> {
        if qty <= 0 {
            return Err(EngineError::invalid("qty", "qty must be a positive integer"));
        }
        let expires_at = self.clock.now() + self.hold_ttl;

        let mut tx = self.store.begin().await?;
        match reserve(&mut tx, product_id, qty, expires_at).await {
            Ok(receipt) => {
                tx.commit().await?;
                self.cache.invalidate(product_id);
                Ok(receipt)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after hold creation error");
                }
                Err(err)
            }
        }
    }
}

async fn reserve<T: StoreTx>(
    tx: &mut T,
    product_id: Uuid,
    qty: i32,
    expires_at: DateTime<Utc>,
) -> Result<HoldReceipt, EngineError> {
    let product = tx
        .lock_product(product_id)
        .await?
        .ok_or_else(|| EngineError::invalid("product_id", "product does not exist"))?;

    if product.total_stock < qty {
        return Err(EngineError::invalid("qty", "insufficient stock"));
    }

    let hold = tx
        .insert_hold(NewHold {
            id: Uuid::new_v4(),
            product_id,
            qty,
            status: HoldStatus::Pending.as_str().to_string(),
            expires_at,
        })
        .await?;
    tx.adjust_product_stock(product_id, -qty).await?;

    Ok(HoldReceipt {
        hold_id: hold.id,
        expires_at: hold.expires_at,
    })
}
