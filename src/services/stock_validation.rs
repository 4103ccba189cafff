use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::ConnectionTrait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::ServiceError;
use crate::services::ledger;

/// Outcome of a pre-commit stock check for one (material, workshop) pair.
#[derive(Debug, Clone)]
pub struct StockValidation {
    pub valid: bool,
    pub current_stock: Decimal,
    pub message: String,
}

/// Checks whether applying `proposed_delta` to the pair's balance would
/// drive it negative. Exactly zero is allowed.
///
/// This is a check-then-act step; callers must hold the pair's
/// [`StockGuard`] lock from before this check until their write commits.
pub async fn validate_movement<C: ConnectionTrait>(
    conn: &C,
    material_id: i64,
    workshop_id: i64,
    proposed_delta: Decimal,
) -> Result<StockValidation, ServiceError> {
    let current_stock = ledger::current_stock(conn, material_id, workshop_id).await?;
    let new_stock = current_stock + proposed_delta;

    if new_stock < Decimal::ZERO {
        return Ok(StockValidation {
            valid: false,
            current_stock,
            message: format!(
                "stock of material {} in workshop {} would become negative: \
                 current {}, change {}, result {}",
                material_id, workshop_id, current_stock, proposed_delta, new_stock
            ),
        });
    }

    Ok(StockValidation {
        valid: true,
        current_stock,
        message: "OK".to_string(),
    })
}

/// [`validate_movement`] mapped onto the error channel, for `?`-style use in
/// document services. Returns the current stock on success.
pub async fn ensure_stock_available<C: ConnectionTrait>(
    conn: &C,
    material_id: i64,
    workshop_id: i64,
    proposed_delta: Decimal,
) -> Result<Decimal, ServiceError> {
    let validation = validate_movement(conn, material_id, workshop_id, proposed_delta).await?;
    if !validation.valid {
        return Err(ServiceError::InsufficientStock(validation.message));
    }
    Ok(validation.current_stock)
}

/// Per-(material, workshop) serialization point.
///
/// Two concurrent consumers of the same pair could otherwise both observe a
/// sufficient balance and both commit, driving stock negative. Every
/// validate-then-append path takes the pair's lock before reading the
/// balance and releases it after its transaction commits.
#[derive(Debug, Default)]
pub struct StockGuard {
    locks: DashMap<(i64, i64), Arc<Mutex<()>>>,
}

impl StockGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks a single (material, workshop) pair.
    pub async fn lock_pair(&self, material_id: i64, workshop_id: i64) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry((material_id, workshop_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Locks several pairs at once. Keys are sorted and deduplicated first
    /// so concurrent multi-line documents acquire in one global order and
    /// cannot deadlock.
    pub async fn lock_pairs(&self, mut pairs: Vec<(i64, i64)>) -> Vec<OwnedMutexGuard<()>> {
        pairs.sort_unstable();
        pairs.dedup();

        let mut guards = Vec::with_capacity(pairs.len());
        for (material_id, workshop_id) in pairs {
            guards.push(self.lock_pair(material_id, workshop_id).await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_pairs_deduplicates() {
        let guard = StockGuard::new();
        let guards = guard
            .lock_pairs(vec![(1, 1), (2, 1), (1, 1), (2, 1)])
            .await;
        assert_eq!(guards.len(), 2);
    }

    #[tokio::test]
    async fn pair_lock_is_exclusive() {
        let guard = Arc::new(StockGuard::new());
        let held = guard.lock_pair(7, 3).await;

        let contender = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.lock_pair(7, 3).await })
        };

        // The contender cannot finish while the first guard is held.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.expect("lock task panicked");
    }

    #[tokio::test]
    async fn distinct_pairs_do_not_contend() {
        let guard = StockGuard::new();
        let _a = guard.lock_pair(1, 1).await;
        let _b = guard.lock_pair(1, 2).await;
        let _c = guard.lock_pair(2, 1).await;
    }
}
