mod auth;
mod runner;
mod secrets;
mod sender;
mod store;

pub use auth::authorization_header;
pub use runner::{RunnerOptions, ScriptRunner, DEFAULT_SCRIPT_TIMEOUT};
pub use secrets::{interpolate_secrets, replace_secrets};
pub use sender::{
    EchoTransport, PreparedRequest, RequestSender, SenderOptions, Transport, EXEC_LOOP,
    MAX_EXEC_DEPTH,
};
pub use store::{record_result, SharedWorkspace, Workspace, WorkspaceEnv, WorkspaceFile};
