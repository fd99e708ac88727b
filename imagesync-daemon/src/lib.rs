//! imagesync daemon: hosts one orchestrator behind a Unix socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    cancel_task, configure_credentials, fetch_task, list_tasks, request_capabilities,
    request_config, request_status, request_stop, send_request, submit_sync, CancelOutcome,
    ConfigView, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, serve, start_blocking};
