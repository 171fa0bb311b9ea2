//! Runbook API Module
//!
//! The API module provides HTTP endpoints for the run engine, allowing
//! plans to be generated, executed, resumed, and rolled back from
//! dashboards and other tooling.

pub mod handlers;
pub mod models;
pub mod server;

pub use handlers::ApiState;
pub use models::{
    ApiConfig, CreatePlanRequest, ResumeRequest, RollbackRequest, StartRunRequest,
};
pub use server::ApiServer;
