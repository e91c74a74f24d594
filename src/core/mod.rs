//! Core domain models for a deployment run
//!
//! This module defines the manifest, resource specs, host groups, the
//! append-only pipeline context, stage state and the host operations.

pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod operation;
pub mod resource;
pub mod state;

pub use context::*;
pub use error::*;
pub use host::*;
pub use operation::*;
pub use resource::*;
pub use state::*;
