use crate::query::QueryService;
use axum::{
    body::{Body, Bytes},
    http::{Response as HttpResponse, StatusCode},
    response::Response,
    routing::{get, post},
    Router,
};
use feedrag_indexer::{Capabilities, IngestHealth, IngestionHandle};
use feedrag_protocol::{
    codes, serialize_json, ErrorEnvelope, RetrieveRequest, HEALTH_ROUTE, INPUTS_ROUTE,
    RETRIEVE_ROUTE, STATISTICS_ROUTE,
};
use serde::Serialize;
use std::sync::Arc;

pub struct AppState {
    pub query: QueryService,
    pub ingestion: IngestionHandle,
    pub capabilities: Capabilities,
}

#[derive(Serialize)]
struct HealthReport<'a> {
    status: &'static str,
    model: &'a str,
    ingestion: IngestHealth,
    capabilities: &'a Capabilities,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            RETRIEVE_ROUTE,
            post({
                let state = state.clone();
                move |body| http_retrieve(body, state.clone())
            }),
        )
        .route(
            STATISTICS_ROUTE,
            post({
                let state = state.clone();
                move || http_statistics(state.clone())
            }),
        )
        .route(
            INPUTS_ROUTE,
            post({
                let state = state.clone();
                move || http_inputs(state.clone())
            }),
        )
        .route(
            HEALTH_ROUTE,
            get({
                let state = state.clone();
                move || http_health(state.clone())
            }),
        )
}

async fn http_retrieve(body: Bytes, state: Arc<AppState>) -> Result<Response, StatusCode> {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            let envelope =
                error_response(codes::INVALID_REQUEST, format!("Invalid JSON request: {err}"));
            return build_response(StatusCode::BAD_REQUEST, &envelope);
        }
    };
    let request = match RetrieveRequest::from_value(&value) {
        Ok(request) => request,
        Err(envelope) => return build_response(StatusCode::BAD_REQUEST, &envelope),
    };

    log::debug!("retrieve k={} filter={:?}", request.k, request.metadata_filter);
    match state.query.retrieve(&request).await {
        Ok(hits) => build_response(StatusCode::OK, &hits),
        Err(envelope) => build_response(status_for(&envelope), &envelope),
    }
}

async fn http_statistics(state: Arc<AppState>) -> Result<Response, StatusCode> {
    match state.query.statistics() {
        Ok(stats) => build_response(StatusCode::OK, &stats),
        Err(envelope) => build_response(status_for(&envelope), &envelope),
    }
}

async fn http_inputs(state: Arc<AppState>) -> Result<Response, StatusCode> {
    match state.query.inputs() {
        Ok(inputs) => build_response(StatusCode::OK, &inputs),
        Err(envelope) => build_response(status_for(&envelope), &envelope),
    }
}

async fn http_health(state: Arc<AppState>) -> Result<Response, StatusCode> {
    let ingestion = state.ingestion.health_snapshot();
    let report = HealthReport {
        status: if ingestion.source_available { "ok" } else { "degraded" },
        model: state.query.model_id(),
        ingestion,
        capabilities: &state.capabilities,
    };
    build_response(StatusCode::OK, &report)
}

fn status_for(envelope: &ErrorEnvelope) -> StatusCode {
    match envelope.code.as_str() {
        codes::INVALID_REQUEST => StatusCode::BAD_REQUEST,
        codes::EMBEDDING_FAILED => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(code: &str, message: String) -> ErrorEnvelope {
    let hint = match code {
        codes::INVALID_REQUEST => {
            "Send a JSON object body; see the route documentation for its fields."
        }
        _ => "Retry the request; check the server log if it keeps failing.",
    };
    ErrorEnvelope::new(code, message).with_hint(hint)
}

pub(crate) fn build_response<T: Serialize>(
    status: StatusCode,
    body: &T,
) -> Result<Response, StatusCode> {
    let bytes = serialize_json(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_bytes();

    HttpResponse::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
