pub mod process;
pub mod registry;

pub use process::{run_cli, ChatRequest, CliInvocation, CliSettings, HOOK_TIMEOUT_ENV};
pub use registry::{ProcessHandle, ProcessRegistry, RunningProcess};
