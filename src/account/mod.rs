//! Account management
//!
//! Opening accounts and read access to the ledger: accounts, transfers,
//! entries and per-account reconciliation.

pub mod models;
pub mod service;

pub use models::{CreateAccountParams, MAX_OWNER_LEN, Reconciliation};
pub use service::AccountService;
