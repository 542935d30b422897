//! Router assembly and shared handler state.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use sqlx::PgPool;

use courier_dispatch::{AuditEmitter, DispatchScheduler, MessageCache, MessageService};

use crate::handlers::{audit, control, health, messages};
use crate::middleware::audit::audit_api_request;
use crate::middleware::auth::require_auth_key;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub service: Arc<MessageService>,
    pub scheduler: Arc<DispatchScheduler>,
    pub audit: AuditEmitter,
    pub cache: Option<MessageCache>,
    pub auth_key: String,
}

/// Build the `/api` router.
///
/// `/api/health` is open; everything else sits behind the shared-secret
/// auth middleware. The request-audit middleware wraps all routes.
pub fn api_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/messages", post(messages::create_message_handler))
        .route("/messages/sent", get(messages::sent_messages_handler))
        .route(
            "/messages/dead-letter",
            get(messages::dead_letter_messages_handler),
        )
        .route("/control", post(control::control_handler))
        .route("/audit", get(audit::list_audit_logs_handler))
        .route("/audit/stats", get(audit::audit_stats_handler))
        .route("/audit/cleanup", delete(audit::audit_cleanup_handler))
        .route("/audit/batch/:batch_id", get(audit::batch_audit_logs_handler))
        .route(
            "/audit/message/:message_id",
            get(audit::message_audit_logs_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth_key,
        ));

    let api = Router::new()
        .route("/health", get(health::health_handler))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            audit_api_request,
        ))
        .with_state(state);

    Router::new().nest("/api", api)
}
