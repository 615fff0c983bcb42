//! Task registries (waiting, running) and the site-to-group router.

mod router;
mod running;
mod waiting;

pub use router::SiteRouter;
pub use running::{RunningRegistry, RunningTask, RunningView, INITIAL_STATUS};
pub use waiting::{WaitingRegistry, WaitingTask};
