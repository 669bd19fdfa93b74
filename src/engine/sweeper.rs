use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::CacheInvalidator;
use crate::clock::Clock;
use crate::engine::restore_stock;
use crate::error::EngineError;
use crate::models::HoldStatus;
use crate::store::{Store, StoreTx};

/// Periodically reclaims stock from `pending` holds whose deadline passed.
/// Each candidate is re-locked with the pending filter inside its own
/// transaction; a hold that an order or webhook won in the meantime is
/// skipped.
pub struct Sweeper<S> {
    store: Arc<S>,
    cache: Arc<dyn CacheInvalidator>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> Sweeper<S> {
    pub fn new(store: Arc<S>, cache: Arc<dyn CacheInvalidator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache,
            clock,
        }
    }

    pub async fn run(self, interval: Duration) {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_once().await {
                error!(error = %err, "expiration sweep failed");
            }
        }
    }

    /// One full pass. Returns the number of holds expired.
    pub async fn sweep_once(&self) -> Result<usize, EngineError> {
        let cutoff = self.clock.now();
        let candidates = self.store.expired_hold_ids(cutoff).await?;

        let mut expired = 0;
        for hold_id in candidates {
            if self.expire_hold(hold_id).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "reclaimed stock from expired holds");
        }
        Ok(expired)
    }

    async fn expire_hold(&self, hold_id: Uuid) -> Result<bool, EngineError> {
        let mut tx = self.store.begin().await?;
        match expire(&mut tx, hold_id).await {
            Ok(Some(product_id)) => {
                tx.commit().await?;
                self.cache.invalidate(product_id);
                Ok(true)
            }
            Ok(None) => {
                tx.rollback().await?;
                Ok(false)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed during expiration sweep");
                }
                Err(err)
            }
        }
    }
}

async fn expire<T: StoreTx>(tx: &mut T, hold_id: Uuid) -> Result<Option<Uuid>, EngineError> {
    let Some(hold) = tx.lock_hold(hold_id, Some(HoldStatus::Pending)).await? else {
        return Ok(None);
    };
    tx.set_hold_status(hold.id, HoldStatus::Expired).await?;
    restore_stock(tx, hold.product_id, hold.qty).await?;
    Ok(Some(hold.product_id))
}
