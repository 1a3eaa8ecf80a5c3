//! SimpleBank Ledger Engine
//!
//! Double-entry ledger with a concurrent money-transfer engine. Every transfer
//! records one transfer row and two balancing entries and moves both balances
//! inside a single atomic unit of the underlying store.

pub mod account;
pub mod config;
pub mod engine;
pub mod executor;
pub mod journal;
pub mod lock_order;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod transfer;

pub use account::{Account, NewAccount};
pub use config::{LedgerConfig, StoreBackend, StoreConfig, TransferConfig};
pub use engine::{TransferEngine, TransferRequest, TransferResult};
pub use executor::AtomicExecutor;
pub use journal::{Entry, EntryKind};
pub use lock_order::{lock_order, ordered_pair, LockOrder};
pub use memory::{MemoryStore, MemoryUnit};
pub use postgres::{PgStore, PgUnit};
pub use store::{IsolationLevel, LedgerStore, LedgerUnit, Page, TransferFilter, UnitOptions};
pub use transfer::Transfer;
