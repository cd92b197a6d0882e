//! Funds Transfer
//!
//! Moves money between two accounts of the same currency inside a single
//! storage transaction.
//!
//! # Flow
//!
//! ```text
//! TransferService::transfer
//!   ├─ validate (amount > 0, from != to)
//!   └─ TxCoordinator::run
//!        └─ execute_transfer
//!             read from/to ─▶ transfer record ─▶ debit entry ─▶ credit entry
//!             ─▶ balance updates (lower account id first)
//! ```
//!
//! # Invariants
//!
//! 1. **All or nothing**: a failure at any step leaves no trace of the transfer
//! 2. **Conservation**: the two balance deltas sum to zero
//! 3. **Ledger symmetry**: every transfer owns exactly one debit and one credit entry
//! 4. **No overdraft**: a committed balance is never negative

pub mod operation;
pub mod service;
pub mod types;

mod integration_tests;

pub use operation::{balance_update_order, execute_transfer};
pub use service::TransferService;
pub use types::{TransferParams, TransferResult};
