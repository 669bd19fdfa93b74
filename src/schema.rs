diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        total_stock -> Int4,
        price -> Numeric,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    holds (id) {
        id -> Uuid,
        product_id -> Uuid,
        qty -> Int4,
        status -> Varchar,
        expires_at -> Timestamptz,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        hold_id -> Uuid,
        status -> Varchar,
        total_amount -> Numeric,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    webhook_logs (idempotency_key) {
        idempotency_key -> Varchar,
        response_body -> Jsonb,
        response_status_code -> Int4,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    pending_webhooks (id) {
        id -> Uuid,
        hold_id -> Uuid,
        status -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    products,
    holds,
    orders,
    webhook_logs,
    pending_webhooks,
);
