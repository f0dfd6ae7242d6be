//! # Repositories
//!
//! One repository per table. Each holds a cloned `SqlitePool`.

pub mod backup;
