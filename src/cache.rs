use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::models::Product;

/// Narrow hook the engines call on every stock mutation. Invalidation is
/// fire-and-forget; it must never fail a request.
pub trait CacheInvalidator: Send + Sync + 'static {
    fn invalidate(&self, product_id: Uuid);
}

/// Invalidator for contexts with no cache attached (one-shot CLI runs).
pub struct NullInvalidator;

impl CacheInvalidator for NullInvalidator {
    fn invalidate(&self, product_id: Uuid) {
        debug!(%product_id, "stock changed (no cache attached)");
    }
}

struct CacheEntry {
    product: Product,
    fresh_until: Instant,
}

/// Read-through cache for the product detail endpoint.
pub struct ProductCache {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
}

impl ProductCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, product_id: Uuid) -> Option<Product> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(&product_id)?;
        if entry.fresh_until <= Instant::now() {
            return None;
        }
        Some(entry.product.clone())
    }

    pub fn put(&self, product: Product) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            product.id,
            CacheEntry {
                product,
                fresh_until: Instant::now() + self.ttl,
            },
        );
    }
}

impl CacheInvalidator for ProductCache {
    fn invalidate(&self, product_id: Uuid) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&product_id);
        debug!(%product_id, "product cache invalidated");
    }
}
