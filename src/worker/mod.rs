//! The task execution engine.
//!
//! Five cooperating pieces handle one task at a time:
//!
//! - [`ActivityPoller`]: registers the activity and feeds acquired tasks to
//!   the runner, one in flight at most
//! - [`heartbeat`]: keeps the coordinator convinced the task is alive
//! - [`TaskRunner`]: input validation, work directory, child process,
//!   outcome classification, terminal report
//! - [`child`]: process launch and bounded output capture
//! - [`signals`]: signal forwarding and the graceful-stop discipline
//!
//! They share nothing but the per-task cancellation token (and the bridge's
//! graceful-stop flag, read only after the child exits).

pub mod child;
pub mod heartbeat;
pub mod poller;
pub mod runner;
pub mod signals;

pub use poller::{tags_from_env, ActivityPoller};
pub use runner::TaskRunner;
