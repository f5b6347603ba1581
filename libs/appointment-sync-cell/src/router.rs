use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::signature_middleware;

use crate::handlers::{health, list_failed_operations, receive_webhook, run_recovery, webhook_stats, SyncState};

pub fn sync_routes(state: Arc<SyncState>) -> Router {
    let signed_routes = Router::new()
        .route("/webhooks", post(receive_webhook))
        .layer(middleware::from_fn_with_state(state.config.clone(), signature_middleware));

    let operational_routes = Router::new()
        .route("/", get(health))
        .route("/webhooks/stats", get(webhook_stats))
        .route("/recovery/operations", get(list_failed_operations))
        .route("/recovery/run", post(run_recovery));

    Router::new()
        .merge(signed_routes)
        .merge(operational_routes)
        .with_state(state)
}
