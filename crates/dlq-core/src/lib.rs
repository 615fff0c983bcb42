pub mod config;
pub mod error;
pub mod logging;

pub mod control;
pub mod notify;
pub mod proxy;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod task;
pub mod worker;
