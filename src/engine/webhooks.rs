use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::CacheInvalidator;
use crate::engine::restore_stock;
use crate::error::EngineError;
use crate::models::{NewWebhookLog, OrderStatus, PaymentResult, WebhookLog};
use crate::store::{Store, StoreError, StoreTx};

/// Response prepared (or replayed) for a webhook delivery. The body and
/// status code are sealed in `webhook_logs` inside the same transaction as
/// the side effects, so retries with the same key observe byte-identical
/// responses and side effects apply at most once.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub body: serde_json::Value,
    pub status_code: u16,
}

impl WebhookResponse {
    fn sealed(log: WebhookLog) -> Self {
        Self {
            body: log.response_body,
            status_code: log.response_status_code as u16,
        }
    }
}

/// Idempotent processor of payment results. Applies the result to the hold's
/// order when one exists; otherwise parks it in `pending_webhooks` for the
/// reconciliation task to consume once the order is created.
pub struct WebhookEngine<S> {
    store: Arc<S>,
    cache: Arc<dyn CacheInvalidator>,
}

impl<S: Store> WebhookEngine<S> {
    pub fn new(store: Arc<S>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { store, cache }
    }

    pub async fn handle_webhook(
        &self,
        idempotency_key: &str,
        hold_id: Uuid,
        result: PaymentResult,
    ) -> Result<WebhookResponse, EngineError> {
        if let Some(log) = self.store.get_webhook_log(idempotency_key).await? {
            info!(idempotency_key, "replaying sealed webhook response");
            return Ok(WebhookResponse::sealed(log));
        }

        let mut tx = self.store.begin().await?;
        match apply(&mut tx, idempotency_key, hold_id, result).await {
            Ok((response, invalidate)) => {
                tx.commit().await?;
                if let Some(product_id) = invalidate {
                    self.cache.invalidate(product_id);
                }
                Ok(response)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after webhook error");
                }
                // A concurrent delivery with the same key may have sealed the
                // response first; replay it instead of surfacing the race.
                if let Some(log) = self.store.get_webhook_log(idempotency_key).await? {
                    return Ok(WebhookResponse::sealed(log));
                }
                Err(err)
            }
        }
    }
}

async fn apply<T: StoreTx>(
    tx: &mut T,
    idempotency_key: &str,
    hold_id: Uuid,
    result: PaymentResult,
) -> Result<(WebhookResponse, Option<Uuid>), EngineError> {
    let mut invalidate = None;

    let (body, status_code) = match tx.lock_hold(hold_id, None).await? {
        None => (json!({ "msg": "Hold not found" }), 404),
        Some(hold) => {
            match tx.order_for_hold(hold.id).await? {
                Some(order) => {
                    tx.set_order_status(order.id, result.as_str()).await?;
                    // Restoration is tied to applying a failed result; a
                    // result that only re-states `failed` must not restore
                    // the same units twice.
                    if result == PaymentResult::Failed
                        && order.status != OrderStatus::Failed.as_str()
                    {
                        restore_stock(tx, hold.product_id, hold.qty).await?;
                        invalidate = Some(hold.product_id);
                    }
                }
                None => match tx.insert_pending_webhook(hold.id, result.as_str()).await {
                    Err(StoreError::UniqueViolation) => {
                        return Err(EngineError::Conflict(
                            "a payment result is already pending for this hold".to_string(),
                        ));
                    }
                    other => {
                        other?;
                    }
                },
            }
            (
                json!({ "hold_id": hold.id, "status": result.as_str() }),
                200,
            )
        }
    };

    tx.insert_webhook_log(NewWebhookLog {
        idempotency_key: idempotency_key.to_string(),
        response_body: body.clone(),
        response_status_code: status_code,
    })
    .await?;

    Ok((
        WebhookResponse {
            body,
            status_code: status_code as u16,
        },
        invalidate,
    ))
}
