//! Integration test modules.

#[cfg(unix)]
mod pipeline;
