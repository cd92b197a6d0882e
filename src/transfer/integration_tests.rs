//! Integration Tests for Funds Transfer
//!
//! Full service stack (TransferService -> TxCoordinator -> store) on the
//! in-memory adapter, so no database is needed.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::account::{AccountService, CreateAccountParams};
    use crate::coordinator::TxCoordinator;
    use crate::error::LedgerError;
    use crate::models::Currency;
    use crate::store::{FailPoint, MemoryLedgerStore};
    use crate::transfer::{TransferParams, TransferService};

    struct TestHarness {
        store: Arc<MemoryLedgerStore>,
        accounts: AccountService<MemoryLedgerStore>,
        transfers: TransferService<MemoryLedgerStore>,
    }

    impl TestHarness {
        fn new() -> Self {
            let store = Arc::new(MemoryLedgerStore::new());
            let coordinator = TxCoordinator::new(Arc::clone(&store));
            Self {
                store,
                accounts: AccountService::new(coordinator.clone()),
                transfers: TransferService::new(coordinator),
            }
        }

        async fn open(&self, owner: &str, currency: Currency, balance: i64) -> i64 {
            self.accounts
                .create_account(CreateAccountParams::new(owner, currency, balance))
                .await
                .unwrap()
                .id
        }

        async fn balance(&self, id: i64) -> i64 {
            self.store.committed_account(id).await.unwrap().balance
        }

        async fn assert_reconciled(&self, ids: &[i64]) {
            for &id in ids {
                let report = self.accounts.reconcile(id).await.unwrap();
                assert!(report.is_balanced(), "account {} out of balance: {:?}", id, report);
            }
        }
    }

    // ========================================================================
    // Happy Path
    // ========================================================================

    #[tokio::test]
    async fn test_simple_transfer() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Usd, 100).await;
        let b = h.open("bob", Currency::Usd, 50).await;

        let result = h.transfers.transfer(TransferParams::new(a, b, 30)).await.unwrap();

        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);
        assert_eq!(h.balance(a).await, 70);
        assert_eq!(h.balance(b).await, 80);

        let stored = h.accounts.get_transfer(result.transfer.id).await.unwrap();
        assert_eq!(stored, result.transfer);
        h.assert_reconciled(&[a, b]).await;
    }

    #[tokio::test]
    async fn test_ledger_symmetry() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Eur, 500).await;
        let b = h.open("bob", Currency::Eur, 0).await;

        let result = h.transfers.transfer(TransferParams::new(a, b, 125)).await.unwrap();
        let transfer_id = result.transfer.id;

        let debits: Vec<_> = h
            .accounts
            .list_entries(a)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.transfer_id == Some(transfer_id))
            .collect();
        let credits: Vec<_> = h
            .accounts
            .list_entries(b)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.transfer_id == Some(transfer_id))
            .collect();

        assert_eq!(debits.len(), 1);
        assert_eq!(credits.len(), 1);
        assert_eq!(debits[0].amount, -125);
        assert_eq!(credits[0].amount, 125);
    }

    #[tokio::test]
    async fn test_transfer_whole_balance() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Cad, 40).await;
        let b = h.open("bob", Currency::Cad, 0).await;

        h.transfers.transfer(TransferParams::new(a, b, 40)).await.unwrap();

        assert_eq!(h.balance(a).await, 0);
        assert_eq!(h.balance(b).await, 40);
    }

    #[tokio::test]
    async fn test_list_transfers_both_sides() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Usd, 100).await;
        let b = h.open("bob", Currency::Usd, 100).await;

        h.transfers.transfer(TransferParams::new(a, b, 10)).await.unwrap();
        h.transfers.transfer(TransferParams::new(b, a, 5)).await.unwrap();

        let for_a = h.accounts.list_transfers(a).await.unwrap();
        let for_b = h.accounts.list_transfers(b).await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a, for_b);
        assert!(for_a[0].id < for_a[1].id);
    }

    // ========================================================================
    // Rejections
    // ========================================================================

    #[tokio::test]
    async fn test_insufficient_funds_leaves_state_unchanged() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Usd, 10).await;
        let b = h.open("bob", Currency::Usd, 0).await;

        let err = h.transfers.transfer(TransferParams::new(a, b, 50)).await.unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientFunds { amount: 50, .. }));
        assert_eq!(h.balance(a).await, 10);
        assert_eq!(h.balance(b).await, 0);
        assert_eq!(h.store.transfer_count().await, 0);
        assert!(h.accounts.list_transfers(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_account_rejected_before_transaction() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Usd, 100).await;
        h.store.inject_failure(FailPoint::Begin);

        // Validation runs before begin, so the injected failure stays armed
        let err = h.transfers.transfer(TransferParams::new(a, a, 10)).await.unwrap_err();
        assert!(matches!(err, LedgerError::SameAccount));

        let err = h.transfers.transfer(TransferParams::new(a, 2, 0)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount));

        let err = h.accounts.get_account(a).await.unwrap_err();
        assert!(matches!(err, LedgerError::BeginFailed(_)));
    }

    #[tokio::test]
    async fn test_currency_mismatch() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Usd, 100).await;
        let b = h.open("bob", Currency::Eur, 100).await;

        let err = h.transfers.transfer(TransferParams::new(a, b, 10)).await.unwrap_err();

        assert_eq!(err.code(), "CURRENCY_MISMATCH");
        assert_eq!(h.balance(a).await, 100);
        assert_eq!(h.balance(b).await, 100);
        assert_eq!(h.store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Usd, 100).await;

        let err = h.transfers.transfer(TransferParams::new(a, 999, 10)).await.unwrap_err();

        assert!(matches!(err, LedgerError::AccountNotFound(999)));
        assert_eq!(h.balance(a).await, 100);
    }

    // ========================================================================
    // Atomicity under storage failures
    // ========================================================================

    async fn assert_failure_rolls_back(point: FailPoint) {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Usd, 100).await;
        let b = h.open("bob", Currency::Usd, 50).await;
        let entries_before = h.store.entry_count().await;

        h.store.inject_failure(point);
        let err = h.transfers.transfer(TransferParams::new(a, b, 30)).await.unwrap_err();

        assert!(err.is_retryable(), "{:?} should be retryable", err);
        assert_eq!(h.balance(a).await, 100, "{:?}", point);
        assert_eq!(h.balance(b).await, 50, "{:?}", point);
        assert_eq!(h.store.transfer_count().await, 0, "{:?}", point);
        assert_eq!(h.store.entry_count().await, entries_before, "{:?}", point);
        assert_eq!(h.store.open_transactions(), 0);
        h.assert_reconciled(&[a, b]).await;

        // The failure was one-shot; the same request now succeeds
        h.transfers.transfer(TransferParams::new(a, b, 30)).await.unwrap();
        assert_eq!(h.balance(a).await, 70);
        assert_eq!(h.balance(b).await, 80);
    }

    #[tokio::test]
    async fn test_transfer_record_failure_rolls_back() {
        assert_failure_rolls_back(FailPoint::CreateTransfer).await;
    }

    #[tokio::test]
    async fn test_entry_failure_rolls_back() {
        assert_failure_rolls_back(FailPoint::CreateEntry).await;
    }

    #[tokio::test]
    async fn test_balance_update_failure_rolls_back() {
        assert_failure_rolls_back(FailPoint::AddBalance).await;
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        assert_failure_rolls_back(FailPoint::Commit).await;
    }

    #[tokio::test]
    async fn test_rollback_failure_reports_both() {
        let h = TestHarness::new();
        let a = h.open("alice", Currency::Usd, 10).await;
        let b = h.open("bob", Currency::Usd, 0).await;

        h.store.inject_failure(FailPoint::Rollback);
        let err = h.transfers.transfer(TransferParams::new(a, b, 50)).await.unwrap_err();

        assert_eq!(err.code(), "ROLLBACK_FAILED");
        assert!(matches!(err.root(), LedgerError::InsufficientFunds { .. }));
        assert_eq!(h.balance(a).await, 10);
    }

    // ========================================================================
    // Concurrency
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_transfers_do_not_deadlock() {
        let h = Arc::new(TestHarness::new());
        let a = h.open("alice", Currency::Usd, 100).await;
        let b = h.open("bob", Currency::Usd, 100).await;

        let mut handles = Vec::new();
        // Five each way: no interleaving can drain either side below zero
        for i in 0..10 {
            let h = Arc::clone(&h);
            let params = if i % 2 == 0 {
                TransferParams::new(a, b, 20)
            } else {
                TransferParams::new(b, a, 20)
            };
            handles.push(tokio::spawn(async move { h.transfers.transfer(params).await }));
        }

        let all = futures::future::join_all(handles);
        let results = tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("transfers deadlocked");
        for result in results {
            result.unwrap().unwrap();
        }

        assert_eq!(h.balance(a).await, 100);
        assert_eq!(h.balance(b).await, 100);
        assert_eq!(h.store.transfer_count().await, 10);
        h.assert_reconciled(&[a, b]).await;
    }
}
