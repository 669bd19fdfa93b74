use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub total_stock: i32,
    pub price: BigDecimal,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct NewProduct {
    pub id: Uuid,
    pub name: String,
    pub total_stock: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::holds)]
pub struct Hold {
    pub id: Uuid,
    pub product_id: Uuid,
    pub qty: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::holds)]
pub struct NewHold {
    pub id: Uuid,
    pub product_id: Uuid,
    pub qty: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub hold_id: Uuid,
    pub status: String,
    pub total_amount: BigDecimal,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub hold_id: Uuid,
    pub status: String,
    pub total_amount: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::webhook_logs)]
pub struct WebhookLog {
    pub idempotency_key: String,
    pub response_body: serde_json::Value,
    pub response_status_code: i32,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::webhook_logs)]
pub struct NewWebhookLog {
    pub idempotency_key: String,
    pub response_body: serde_json::Value,
    pub response_status_code: i32,
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::pending_webhooks)]
pub struct PendingWebhook {
    pub id: Uuid,
    pub hold_id: Uuid,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::pending_webhooks)]
pub struct NewPendingWebhook {
    pub id: Uuid,
    pub hold_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldStatus {
    Pending,
    Completed,
    Expired,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Pending => "pending",
            HoldStatus::Completed => "completed",
            HoldStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }
}

/// Outcome reported by the payment provider. Anything outside this set is
/// rejected before it reaches the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentResult {
    Paid,
    Failed,
}

impl PaymentResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentResult::Paid => "paid",
            PaymentResult::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<PaymentResult> {
        match s {
            "paid" => Some(PaymentResult::Paid),
            "failed" => Some(PaymentResult::Failed),
            _ => None,
        }
    }
}
