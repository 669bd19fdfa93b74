use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use tower_http::timeout::TimeoutLayer;
use uuid::Uuid;

use crate::cache::ProductCache;
use crate::engine::{HoldEngine, HoldReceipt, OrderEngine, WebhookEngine};
use crate::error::EngineError;
use crate::models::{Order, PaymentResult, Product};
use crate::store::Store;

const REQUEST_DEADLINE: Duration = Duration::from_secs(10);

pub struct AppState<S> {
    pub store: Arc<S>,
    pub cache: Arc<ProductCache>,
    pub holds: Arc<HoldEngine<S>>,
    pub orders: Arc<OrderEngine<S>>,
    pub webhooks: Arc<WebhookEngine<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            holds: Arc::clone(&self.holds),
            orders: Arc::clone(&self.orders),
            webhooks: Arc::clone(&self.webhooks),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DataBody<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ProductBody {
    pub id: Uuid,
    pub name: String,
    pub total_stock: i32,
    pub price: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Product> for ProductBody {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            total_stock: product.total_stock,
            price: product.price.to_f64().unwrap_or_default(),
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderBody {
    pub id: Uuid,
    pub hold_id: Uuid,
    pub status: String,
    pub total_amount: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Order> for OrderBody {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            hold_id: order.hold_id,
            status: order.status,
            total_amount: order.total_amount.to_f64().unwrap_or_default(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    pub product_id: Uuid,
    pub qty: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub hold_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub idempotency_key: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub hold_id: Uuid,
    pub status: PaymentResult,
}

pub fn create_router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/products/:id", get(get_product::<S>))
        .route("/api/holds", post(create_hold::<S>))
        .route("/api/orders", post(create_order::<S>))
        .route("/api/payments/webhook", post(payment_webhook::<S>))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TimeoutLayer::new(REQUEST_DEADLINE))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn get_product<S: Store>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DataBody<ProductBody>>, EngineError> {
    if let Some(product) = state.cache.get(id) {
        return Ok(Json(DataBody {
            data: product.into(),
        }));
    }

    let product = state
        .store
        .get_product(id)
        .await?
        .ok_or_else(|| EngineError::NotFound("Product not found".to_string()))?;
    state.cache.put(product.clone());

    Ok(Json(DataBody {
        data: product.into(),
    }))
}

async fn create_hold<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<CreateHoldRequest>,
) -> Result<(StatusCode, Json<DataBody<HoldReceipt>>), EngineError> {
    let receipt = state
        .holds
        .create_hold(request.product_id, request.qty)
        .await?;
    Ok((StatusCode::CREATED, Json(DataBody { data: receipt })))
}

async fn create_order<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<DataBody<OrderBody>>), EngineError> {
    let order = state.orders.create_order(request.hold_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataBody { data: order.into() }),
    ))
}

async fn payment_webhook<S: Store>(
    State(state): State<AppState<S>>,
    Json(request): Json<WebhookRequest>,
) -> Result<Response, EngineError> {
    let response = state
        .webhooks
        .handle_webhook(
            &request.idempotency_key,
            request.data.hold_id,
            request.data.status,
        )
        .await?;
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(response.body)).into_response())
}

async fn health_check() -> &'static str {
    "OK"
}
