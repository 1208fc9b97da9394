//! External process execution for Drover.
//!
//! - [`ProcessRunner`]: spawn a tool with an environment overlay, a timeout,
//!   and a cancellation token
//! - [`EnvironmentResolver`]: pick the Python interpreter and build the
//!   overlay every tool run inherits
//! - [`ContainerRuntime`]: run tools inside an execution-environment image

mod container;
mod environment;
mod guard;
mod runner;

pub use container::ContainerRuntime;
pub use environment::{
    AmbientEnv, EnvironmentResolutionError, EnvironmentResolver, EnvironmentSource,
    ResolvedEnvironment,
};
pub use runner::{
    DEFAULT_MAX_OUTPUT_BYTES, ProcessError, ProcessOutput, ProcessRequest, ProcessRunner,
};
