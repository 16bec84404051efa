//! Per-item transaction boundary.
//!
//! The engine hands the processing of every connector object to
//! [`TransactionRunner::run_in_new_transaction`]. A failed item is reported
//! in its outcome and never undoes items committed before it.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

use crate::executor::ItemOutcome;

/// Boxed unit of work run inside one transaction.
pub type ItemWork<'a> = Pin<Box<dyn Future<Output = ItemOutcome> + Send + 'a>>;

/// Runs item processing in its own transaction.
#[async_trait]
pub trait TransactionRunner: Send + Sync {
    async fn run_in_new_transaction<'a>(&self, work: ItemWork<'a>) -> ItemOutcome;
}

/// Runner for stores that commit every write on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateTransactionRunner;

#[async_trait]
impl TransactionRunner for ImmediateTransactionRunner {
    async fn run_in_new_transaction<'a>(&self, work: ItemWork<'a>) -> ItemOutcome {
        work.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OperationResult, SyncActionType};

    #[tokio::test]
    async fn test_immediate_runner_returns_outcome() {
        let runner = ImmediateTransactionRunner;
        let outcome = runner
            .run_in_new_transaction(Box::pin(async {
                let mut outcome = ItemOutcome::new(SyncActionType::Ignore);
                outcome.result = OperationResult::Ignore;
                outcome
            }))
            .await;
        assert_eq!(outcome.action, SyncActionType::Ignore);
        assert_eq!(outcome.result, OperationResult::Ignore);
    }
}
