//! Task requests and the messages workers send back about them.

mod message;
mod request;

pub use message::{ResultMessage, StatusMessage, TaskStatus, WorkerMessage};
pub use request::{Route, TaskId, TaskRequest, UserId};
