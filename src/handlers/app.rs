use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::health::HealthRegistry;
use crate::overrides::OverrideStore;

/// Shared state for the admin HTTP API. Writes always go through
/// `override_store` and never mutate anything the reconciler reads
/// directly -- the store is the only state shared across the task
/// boundary.
pub struct AppContext {
    pub override_store: Arc<dyn OverrideStore>,
    pub health: HealthRegistry,
}

async fn index() -> &'static str {
    "autothrottle"
}

async fn liveness(State(context): State<Arc<AppContext>>) -> Response {
    context.health.get_status().into_response()
}

pub fn app(context: Arc<AppContext>, metrics_enabled: bool) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(liveness))
        .merge(super::overrides::router());

    let router = if metrics_enabled {
        crate::metrics::setup_metrics_routes(router)
    } else {
        router
    };

    router.with_state(context)
}
