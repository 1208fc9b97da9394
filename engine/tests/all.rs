//! Integration test aggregator
//!
//! Individual test modules are declared in `suite/mod.rs`.

#[cfg(unix)]
mod common;
mod suite;
