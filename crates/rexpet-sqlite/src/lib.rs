//! # rexpet-sqlite
//!
//! Durable [`Store`](rexpet_core::Store) and [`JobQueue`](rexpet_core::JobQueue)
//! implementations on SQLite.
//!
//! ```text
//! Database::connect(DATABASE_URL)
//!     │  WAL, foreign keys, embedded migrations
//!     ├── store() ─▶ SqliteStore     accounts, ledger, generations, audit
//!     └── queue() ─▶ SqliteJobQueue  jobs (lease + locked_until)
//! ```
//!
//! All statements run on tokio-rusqlite's single connection thread.

pub mod database;
mod error;
mod migrations;
pub mod queue;
mod row;
pub mod store;

pub use database::Database;
pub use queue::SqliteJobQueue;
pub use store::SqliteStore;
