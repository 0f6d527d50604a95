use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::AppContext;
use crate::overrides::{BrokerOverride, OverrideConfig};
use crate::state::BrokerId;

pub fn router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/overrides/global", get(get_global).post(set_global))
        .route(
            "/overrides/brokers/:id",
            get(get_broker).post(set_broker).delete(delete_broker),
        )
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn internal_error(context: &'static str, err: impl std::fmt::Display) -> Response {
    warn!("{context}: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            error: format!("{context}: {err}"),
        }),
    )
        .into_response()
}

async fn get_global(State(context): State<Arc<AppContext>>) -> Response {
    match context.override_store.get_global().await {
        Ok(Some(config)) => Json(config).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error("failed to read global override", e),
    }
}

async fn set_global(State(context): State<Arc<AppContext>>, Json(config): Json<OverrideConfig>) -> Response {
    match context.override_store.set_global(config).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => internal_error("failed to write global override", e),
    }
}

async fn get_broker(State(context): State<Arc<AppContext>>, Path(id): Path<BrokerId>) -> Response {
    match context.override_store.list_broker_overrides().await {
        Ok(overrides) => match overrides.into_iter().find(|o| o.broker_id == id) {
            Some(o) => Json(o).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Err(e) => internal_error("failed to read broker overrides", e),
    }
}

#[derive(Debug, Deserialize)]
struct SetBrokerOverrideBody {
    #[serde(default)]
    reassignment_participant: bool,
    config: OverrideConfig,
}

async fn set_broker(
    State(context): State<Arc<AppContext>>,
    Path(id): Path<BrokerId>,
    Json(body): Json<SetBrokerOverrideBody>,
) -> Response {
    let broker_override = BrokerOverride {
        broker_id: id,
        reassignment_participant: body.reassignment_participant,
        config: body.config,
    };
    match context.override_store.set_broker_override(broker_override).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => internal_error("failed to write broker override", e),
    }
}

async fn delete_broker(State(context): State<Arc<AppContext>>, Path(id): Path<BrokerId>) -> Response {
    match context.override_store.delete_broker_override(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_error("failed to delete broker override", e),
    }
}
