//! Transactions over any backend that supports them.
//!
//! Executors that can group commands atomically implement
//! [`SupportsTransactions`]. Transactions do not nest: a second `begin` on the
//! same executor fails with [`OrmError::Transaction`].
//!
//! For ergonomic commit/rollback handling, use the [`transaction!`] macro.
//!
//! # Example
//!
//! ```ignore
//! use bridgeorm::{Builder, OrmResult, record};
//!
//! # async fn demo(conn: &bridgeorm::Connection) -> OrmResult<()> {
//! bridgeorm::transaction!(conn, {
//!     Builder::new("accounts")
//!         .update(record! { "balance" => 0 })
//!         .eq("id", 1)
//!         .execute(conn)
//!         .await?;
//!     Ok(())
//! })?;
//! # Ok(()) }
//! ```

use crate::error::{OrmError, OrmResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// Optional capability: atomic groups of commands.
pub trait SupportsTransactions: Send + Sync {
    fn begin(&self) -> impl Future<Output = OrmResult<()>> + Send;

    fn commit(&self) -> impl Future<Output = OrmResult<()>> + Send;

    fn rollback(&self) -> impl Future<Output = OrmResult<()>> + Send;

    fn in_transaction(&self) -> bool;
}

/// Runs the given block inside a transaction on `$executor`.
///
/// - Begins via [`SupportsTransactions::begin`].
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`.
///
/// The block must evaluate to `bridgeorm::OrmResult<T>`.
#[macro_export]
macro_rules! transaction {
    ($executor:expr, $body:block) => {{
        let __bridgeorm_executor = $executor;
        $crate::SupportsTransactions::begin(__bridgeorm_executor).await?;

        let __bridgeorm_tx_body_result = async { $body }.await;
        match __bridgeorm_tx_body_result {
            Ok(value) => {
                $crate::SupportsTransactions::commit(__bridgeorm_executor).await?;
                Ok(value)
            }
            Err(error) => match $crate::SupportsTransactions::rollback(__bridgeorm_executor).await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::OrmError::Transaction(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}

/// Tracks whether an executor has an open transaction.
#[derive(Debug, Default)]
pub struct TransactionState {
    active: AtomicBool,
}

impl TransactionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a transaction as started; fails if one is already open.
    pub fn enter(&self) -> OrmResult<()> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| OrmError::Transaction("transaction already in progress".into()))
    }

    /// Mark the open transaction as finished; fails if none is open.
    pub fn leave(&self) -> OrmResult<()> {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| OrmError::Transaction("no transaction in progress".into()))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_twice_fails() {
        let state = TransactionState::new();
        state.enter().unwrap();
        assert!(state.is_active());
        assert!(matches!(state.enter(), Err(OrmError::Transaction(_))));
        state.leave().unwrap();
        assert!(!state.is_active());
    }

    #[test]
    fn leave_without_enter_fails() {
        let state = TransactionState::new();
        assert!(state.leave().is_err());
    }
}
