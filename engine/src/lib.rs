//! Diagnostic orchestration for Drover.
//!
//! - [`LanguageServer`]: the facade a transport drives
//! - [`DiagnosticCoordinator`]: debounced, supersedable per-document runs
//! - [`ExternalValidator`]: the out-of-process analysis seam, implemented by
//!   [`ToolchainValidator`]
//! - [`DiagnosticsPublisher`]: where results go

mod coordinator;
mod publisher;
mod server;
mod validator;

pub use coordinator::{CoordinatorConfig, DEFAULT_DEBOUNCE, DiagnosticCoordinator, RunState};
pub use publisher::{ChannelPublisher, DiagnosticsPublisher, Publication};
pub use server::LanguageServer;
pub use validator::{
    ExternalValidator, SourceError, ToolchainValidator, ValidationRequest, ValidatorFut,
};
