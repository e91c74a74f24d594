//! Deployment pipeline execution

pub mod coordinator;
pub mod stages;

pub use coordinator::{Coordinator, Deployment, EventHandler, ExecutionEvent};
pub use stages::{plan, StagePlan};
