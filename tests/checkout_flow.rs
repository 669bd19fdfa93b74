//! End-to-end engine scenarios: contention on holds and orders, webhook
//! idempotency, early-webhook reconciliation, and expiration sweeps.

mod common;

use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;

use checkout_service::error::EngineError;
use checkout_service::models::{HoldStatus, OrderStatus, PaymentResult};
use common::TestApp;

#[tokio::test]
async fn concurrent_holds_never_oversell() {
    let app = TestApp::new();
    let product_id = app.seed_product(10, "25.00").await;

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let holds = Arc::clone(&app.holds);
            tokio::spawn(async move { holds.create_hold(product_id, 1).await })
        })
        .collect();
    let results = join_all(tasks).await;

    let mut created = 0;
    let mut rejected = 0;
    for result in results {
        match result.expect("task panicked") {
            Ok(_) => created += 1,
            Err(EngineError::InvalidInput { field, .. }) => {
                assert_eq!(field, "qty");
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 10);
    assert_eq!(rejected, 40);
    assert_eq!(app.stock(product_id).await, 0);
    assert_eq!(app.dump().await.holds.len(), 10);
}

#[tokio::test]
async fn concurrent_orders_create_exactly_one() {
    let app = TestApp::new();
    let product_id = app.seed_product(100, "10.00").await;
    let receipt = app.holds.create_hold(product_id, 10).await.unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let orders = Arc::clone(&app.orders);
            let hold_id = receipt.hold_id;
            tokio::spawn(async move { orders.create_order(hold_id).await })
        })
        .collect();
    let results = join_all(tasks).await;

    let mut created = 0;
    let mut rejected = 0;
    for result in results {
        match result.expect("task panicked") {
            Ok(_) => created += 1,
            Err(EngineError::InvalidInput { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(rejected, 9);
    let state = app.dump().await;
    assert_eq!(
        state
            .orders
            .values()
            .filter(|o| o.hold_id == receipt.hold_id)
            .count(),
        1
    );
    assert_eq!(
        app.hold(receipt.hold_id).await.status,
        HoldStatus::Completed.as_str()
    );
}

#[tokio::test]
async fn repeated_failed_webhook_restores_stock_once() {
    let app = TestApp::new();
    let product_id = app.seed_product(100, "10.00").await;
    let receipt = app.holds.create_hold(product_id, 5).await.unwrap();
    app.orders.create_order(receipt.hold_id).await.unwrap();
    assert_eq!(app.stock(product_id).await, 95);

    let first = app
        .webhook("k", receipt.hold_id, PaymentResult::Failed)
        .await
        .unwrap();
    assert_eq!(first.status_code, 200);

    for _ in 0..19 {
        let replay = app
            .webhook("k", receipt.hold_id, PaymentResult::Failed)
            .await
            .unwrap();
        assert_eq!(replay.status_code, first.status_code);
        assert_eq!(replay.body, first.body);
    }

    let order = app.order_for_hold(receipt.hold_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Failed.as_str());
    assert_eq!(app.stock(product_id).await, 100);
    assert_eq!(app.dump().await.webhook_logs.len(), 1);
}

#[tokio::test]
async fn early_webhook_is_applied_by_reconciliation() {
    let app = TestApp::new();
    let product_id = app.seed_product(100, "10.00").await;
    let receipt = app.holds.create_hold(product_id, 2).await.unwrap();

    let response = app
        .webhook("k1", receipt.hold_id, PaymentResult::Paid)
        .await
        .unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(app.pending_webhook_count().await, 1);

    app.orders.create_order(receipt.hold_id).await.unwrap();
    app.run_reconciliation().await;

    let order = app.order_for_hold(receipt.hold_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid.as_str());
    assert_eq!(app.pending_webhook_count().await, 0);
    assert_eq!(app.stock(product_id).await, 98);
}

#[tokio::test]
async fn sweeper_reclaims_expired_holds() {
    let app = TestApp::new();
    let product_id = app.seed_product(100, "10.00").await;
    let receipt = app.holds.create_hold(product_id, 10).await.unwrap();
    assert_eq!(app.stock(product_id).await, 90);

    app.clock.advance(Duration::minutes(5));
    let expired = app.sweeper.sweep_once().await.unwrap();
    assert_eq!(expired, 1);

    assert_eq!(
        app.hold(receipt.hold_id).await.status,
        HoldStatus::Expired.as_str()
    );
    assert_eq!(app.stock(product_id).await, 100);

    let result = app.orders.create_order(receipt.hold_id).await;
    assert!(matches!(result, Err(EngineError::InvalidInput { .. })));
}

#[tokio::test]
async fn serial_flow_conserves_stock() {
    let app = TestApp::new();
    let product_id = app.seed_product(5, "10.00").await;

    let h1 = app.holds.create_hold(product_id, 3).await.unwrap();
    let h2 = app.holds.create_hold(product_id, 2).await.unwrap();
    assert!(matches!(
        app.holds.create_hold(product_id, 1).await,
        Err(EngineError::InvalidInput { .. })
    ));

    app.orders.create_order(h1.hold_id).await.unwrap();
    app.orders.create_order(h2.hold_id).await.unwrap();

    let response = app
        .webhook("k-h2", h2.hold_id, PaymentResult::Failed)
        .await
        .unwrap();
    assert_eq!(response.status_code, 200);

    app.holds.create_hold(product_id, 1).await.unwrap();
    assert_eq!(app.stock(product_id).await, 1);
}

#[tokio::test]
async fn webhook_replay_leaves_state_untouched() {
    let app = TestApp::new();
    let product_id = app.seed_product(50, "19.99").await;
    let receipt = app.holds.create_hold(product_id, 3).await.unwrap();
    app.orders.create_order(receipt.hold_id).await.unwrap();

    let first = app
        .webhook("pay-1", receipt.hold_id, PaymentResult::Paid)
        .await
        .unwrap();
    let after_first = app.dump().await;

    for _ in 0..5 {
        let replay = app
            .webhook("pay-1", receipt.hold_id, PaymentResult::Paid)
            .await
            .unwrap();
        assert_eq!(replay.body, first.body);
        assert_eq!(replay.status_code, first.status_code);
    }

    assert_eq!(app.dump().await, after_first);
}

#[tokio::test]
async fn webhook_order_is_commutative() {
    for result in [PaymentResult::Paid, PaymentResult::Failed] {
        // Webhook after the order exists.
        let late = TestApp::new();
        let product_id = late.seed_product(100, "10.00").await;
        let receipt = late.holds.create_hold(product_id, 4).await.unwrap();
        late.orders.create_order(receipt.hold_id).await.unwrap();
        late.run_reconciliation().await;
        late.webhook("k", receipt.hold_id, result).await.unwrap();
        let late_order = late.order_for_hold(receipt.hold_id).await.unwrap();
        let late_stock = late.stock(product_id).await;
        let late_pending = late.pending_webhook_count().await;

        // Webhook before the order exists.
        let early = TestApp::new();
        let product_id = early.seed_product(100, "10.00").await;
        let receipt = early.holds.create_hold(product_id, 4).await.unwrap();
        early.webhook("k", receipt.hold_id, result).await.unwrap();
        early.orders.create_order(receipt.hold_id).await.unwrap();
        early.run_reconciliation().await;
        let early_order = early.order_for_hold(receipt.hold_id).await.unwrap();

        assert_eq!(early_order.status, late_order.status);
        assert_eq!(early.stock(product_id).await, late_stock);
        assert_eq!(early.pending_webhook_count().await, late_pending);
    }
}

#[tokio::test]
async fn second_early_webhook_with_new_key_conflicts() {
    let app = TestApp::new();
    let product_id = app.seed_product(100, "10.00").await;
    let receipt = app.holds.create_hold(product_id, 2).await.unwrap();

    app.webhook("k1", receipt.hold_id, PaymentResult::Paid)
        .await
        .unwrap();
    let second = app
        .webhook("k2", receipt.hold_id, PaymentResult::Failed)
        .await;
    assert!(matches!(second, Err(EngineError::Conflict(_))));

    // The conflicting delivery must not seal a response.
    assert_eq!(app.dump().await.webhook_logs.len(), 1);
    assert_eq!(app.pending_webhook_count().await, 1);
}

#[tokio::test]
async fn webhook_for_unknown_hold_seals_not_found() {
    let app = TestApp::new();
    let missing = uuid::Uuid::new_v4();

    let first = app.webhook("k", missing, PaymentResult::Paid).await.unwrap();
    assert_eq!(first.status_code, 404);
    assert_eq!(first.body["msg"], "Hold not found");

    let replay = app.webhook("k", missing, PaymentResult::Paid).await.unwrap();
    assert_eq!(replay.status_code, 404);
    assert_eq!(replay.body, first.body);
    assert_eq!(app.dump().await.webhook_logs.len(), 1);
}

#[tokio::test]
async fn sweeper_skips_holds_that_lost_the_race() {
    let app = TestApp::new();
    let product_id = app.seed_product(10, "10.00").await;
    let receipt = app.holds.create_hold(product_id, 4).await.unwrap();
    app.orders.create_order(receipt.hold_id).await.unwrap();

    app.clock.advance(Duration::minutes(5));
    let expired = app.sweeper.sweep_once().await.unwrap();

    assert_eq!(expired, 0);
    assert_eq!(
        app.hold(receipt.hold_id).await.status,
        HoldStatus::Completed.as_str()
    );
    assert_eq!(app.stock(product_id).await, 6);
}

#[tokio::test]
async fn failed_webhook_for_expired_hold_does_not_restore_twice() {
    let app = TestApp::new();
    let product_id = app.seed_product(100, "10.00").await;
    let receipt = app.holds.create_hold(product_id, 2).await.unwrap();

    app.clock.advance(Duration::minutes(5));
    assert_eq!(app.sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(app.stock(product_id).await, 100);

    let response = app
        .webhook("k", receipt.hold_id, PaymentResult::Failed)
        .await
        .unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(app.stock(product_id).await, 100);
    assert_eq!(app.pending_webhook_count().await, 1);
}

#[tokio::test]
async fn reconciliation_noops_when_webhook_already_applied() {
    let app = TestApp::new();
    let product_id = app.seed_product(100, "10.00").await;
    let receipt = app.holds.create_hold(product_id, 5).await.unwrap();
    app.orders.create_order(receipt.hold_id).await.unwrap();

    app.webhook("k", receipt.hold_id, PaymentResult::Paid)
        .await
        .unwrap();
    let before = app.dump().await;

    app.run_reconciliation().await;
    assert_eq!(app.dump().await, before);
}
