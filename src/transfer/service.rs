//! Transfer Service
//!
//! Entry point for callers that want to move funds. Validates the request,
//! then runs [`execute_transfer`] as one unit of work on the coordinator.

use tracing::{info, warn};

use super::operation::execute_transfer;
use super::types::{TransferParams, TransferResult};
use crate::coordinator::TxCoordinator;
use crate::error::Result;
use crate::store::LedgerStore;

pub struct TransferService<S: LedgerStore> {
    coordinator: TxCoordinator<S>,
}

impl<S: LedgerStore> Clone for TransferService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: LedgerStore> TransferService<S> {
    pub fn new(coordinator: TxCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Atomically move `params.amount` between two accounts.
    ///
    /// Either the transfer record, both entries and both balance updates are
    /// committed together, or nothing is.
    pub async fn transfer(&self, params: TransferParams) -> Result<TransferResult> {
        if let Err(e) = params.validate() {
            warn!(
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                error = %e,
                "Transfer rejected"
            );
            return Err(e);
        }

        let result = self
            .coordinator
            .run(move |tx| Box::pin(execute_transfer(tx, params)))
            .await;

        match &result {
            Ok(done) => info!(
                transfer_id = done.transfer.id,
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                from_balance = done.from_account.balance,
                to_balance = done.to_account.balance,
                "Transfer committed"
            ),
            Err(e) => warn!(
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                code = e.code(),
                error = %e,
                "Transfer failed"
            ),
        }
        result
    }
}
