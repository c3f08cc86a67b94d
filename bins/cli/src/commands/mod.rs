//! Local CLI command handlers.

pub mod info;
pub mod init;
pub mod jobs;
pub mod orchestrate;
pub mod search;
pub mod serve_storage;
pub mod status;
pub mod worker;

pub use info::run_info;
pub use init::run_init;
pub use jobs::run_jobs;
pub use orchestrate::run_orchestrate;
pub use search::run_search;
pub use serve_storage::run_serve_storage;
pub use status::run_status;
pub use worker::{WorkerRoleArg, run_worker};
