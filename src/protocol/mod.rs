//! The automation protocols driven against the remote console.

pub mod command;
pub mod context;
pub mod login;
pub mod types;

pub use context::{DebugOptions, RunContext};
pub use types::{CancelToken, LoginState, ProtocolError, ProtocolResult, StepResult};
