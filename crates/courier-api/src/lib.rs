//! HTTP API for the courier service.
//!
//! All endpoints live under `/api`. Every route except `/api/health`
//! requires the shared-secret auth header; every request is recorded as
//! an `api_request` audit event.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use error::ApiError;
pub use router::{api_router, ApiState};
