//! Persistent task database (SQLite via sqlx).
//!
//! Stores admitted requests until they finish, results until they are
//! delivered, a history of finished tasks, and rate-limit marks with expiry.

mod db;
mod rates;
mod tasks;

pub use db::TaskDb;
pub use rates::RateStore;
pub use tasks::SiteStat;

#[cfg(test)]
pub(crate) use db::open_memory;
