#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::Router;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use uuid::Uuid;

use checkout_service::api::{create_router, AppState};
use checkout_service::cache::{CacheInvalidator, ProductCache};
use checkout_service::clock::{Clock, ManualClock};
use checkout_service::engine::{
    reconcile_queue, HoldEngine, OrderEngine, Reconciler, Sweeper, WebhookEngine, WebhookResponse,
};
use checkout_service::error::EngineError;
use checkout_service::models::{Hold, NewProduct, Order, PaymentResult};
use checkout_service::store::{MemState, MemStore, Store, StoreTx};

pub const HOLD_TTL_MINUTES: i64 = 2;

/// Full engine wiring over the in-memory store with a pinned clock. The
/// reconcile queue is drained explicitly via `run_reconciliation` so tests
/// control exactly when the deferred task runs.
pub struct TestApp {
    pub store: Arc<MemStore>,
    pub clock: Arc<ManualClock>,
    pub cache: Arc<ProductCache>,
    pub holds: Arc<HoldEngine<MemStore>>,
    pub orders: Arc<OrderEngine<MemStore>>,
    pub webhooks: Arc<WebhookEngine<MemStore>>,
    pub reconciler: Reconciler<MemStore>,
    pub sweeper: Sweeper<MemStore>,
    jobs: Mutex<UnboundedReceiver<Uuid>>,
}

impl TestApp {
    pub fn new() -> Arc<TestApp> {
        let store = Arc::new(MemStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(ProductCache::new(StdDuration::from_secs(600)));
        let (queue, jobs) = reconcile_queue();

        let holds = Arc::new(HoldEngine::new(
            Arc::clone(&store),
            cache.clone() as Arc<dyn CacheInvalidator>,
            clock.clone() as Arc<dyn Clock>,
            Duration::minutes(HOLD_TTL_MINUTES),
        ));
        let orders = Arc::new(OrderEngine::new(Arc::clone(&store), queue));
        let webhooks = Arc::new(WebhookEngine::new(
            Arc::clone(&store),
            cache.clone() as Arc<dyn CacheInvalidator>,
        ));
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            cache.clone() as Arc<dyn CacheInvalidator>,
        );
        let sweeper = Sweeper::new(
            Arc::clone(&store),
            cache.clone() as Arc<dyn CacheInvalidator>,
            clock.clone() as Arc<dyn Clock>,
        );

        Arc::new(TestApp {
            store,
            clock,
            cache,
            holds,
            orders,
            webhooks,
            reconciler,
            sweeper,
            jobs: Mutex::new(jobs),
        })
    }

    pub fn router(&self) -> Router {
        create_router(AppState {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            holds: Arc::clone(&self.holds),
            orders: Arc::clone(&self.orders),
            webhooks: Arc::clone(&self.webhooks),
        })
    }

    pub async fn seed_product(&self, stock: i32, price: &str) -> Uuid {
        let mut tx = self.store.begin().await.expect("begin");
        let product = tx
            .insert_product(NewProduct {
                id: Uuid::new_v4(),
                name: "flash item".to_string(),
                total_stock: stock,
                price: BigDecimal::from_str(price).expect("price literal"),
            })
            .await
            .expect("insert product");
        tx.commit().await.expect("commit");
        product.id
    }

    /// Runs every reconciliation task enqueued so far, in order.
    pub async fn run_reconciliation(&self) {
        let mut jobs = self.jobs.lock().await;
        while let Ok(order_id) = jobs.try_recv() {
            self.reconciler
                .reconcile_order(order_id)
                .await
                .expect("reconciliation");
        }
    }

    pub async fn webhook(
        &self,
        key: &str,
        hold_id: Uuid,
        result: PaymentResult,
    ) -> Result<WebhookResponse, EngineError> {
        self.webhooks.handle_webhook(key, hold_id, result).await
    }

    pub async fn dump(&self) -> MemState {
        self.store.dump().await
    }

    pub async fn stock(&self, product_id: Uuid) -> i32 {
        self.dump().await.products[&product_id].total_stock
    }

    pub async fn hold(&self, hold_id: Uuid) -> Hold {
        self.dump().await.holds[&hold_id].clone()
    }

    pub async fn order_for_hold(&self, hold_id: Uuid) -> Option<Order> {
        self.dump()
            .await
            .orders
            .values()
            .find(|o| o.hold_id == hold_id)
            .cloned()
    }

    pub async fn pending_webhook_count(&self) -> usize {
        self.dump().await.pending_webhooks.len()
    }
}
