use super::protocol::*;
use crate::context::types::ContextValue;
use crate::engine::engine::CommandEngine;
use crate::error::EngineError;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

pub async fn handle_submit<C: ContextValue>(
    Extension(engine): Extension<Arc<CommandEngine<C>>>,
    Json(req): Json<SubmitEnvelopeRequest>,
) -> (StatusCode, Json<SubmitEnvelopeResponse>) {
    tracing::debug!("Received forwarded {} for {}", req.envelope.name, req.context_id);

    match engine.accept_submission(req.context_id, req.envelope, req.allow_missing_context) {
        Ok(key) => (
            StatusCode::OK,
            Json(SubmitEnvelopeResponse {
                key: Some(key),
                rejected: false,
                error: None,
            }),
        ),
        Err(e @ (EngineError::SubmissionRejected { .. } | EngineError::UnknownCommand { .. })) => (
            StatusCode::OK,
            Json(SubmitEnvelopeResponse {
                key: None,
                rejected: true,
                error: Some(e.to_string()),
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to queue forwarded submission: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitEnvelopeResponse {
                    key: None,
                    rejected: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_cancel<C: ContextValue>(
    Extension(engine): Extension<Arc<CommandEngine<C>>>,
    Json(req): Json<CancelRequest>,
) -> (StatusCode, Json<CancelResponse>) {
    let cancelled = engine.cancel_local(&req.key).await;
    (StatusCode::OK, Json(CancelResponse { cancelled }))
}

pub async fn handle_register_context<C: ContextValue>(
    Extension(engine): Extension<Arc<CommandEngine<C>>>,
    Json(req): Json<RegisterContextRequest>,
) -> (StatusCode, Json<RegisterContextResponse>) {
    let value: C = match engine.registry().codec().decode(&req.value) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("Failed to decode value for context {}: {}", req.context_id, e);
            return (
                StatusCode::BAD_REQUEST,
                Json(RegisterContextResponse {
                    created: false,
                    error: Some(e.to_string()),
                }),
            );
        }
    };

    let created = engine.register_local(req.context_id, value, req.strategy);
    (
        StatusCode::OK,
        Json(RegisterContextResponse { created, error: None }),
    )
}

pub async fn handle_remove_context<C: ContextValue>(
    Extension(engine): Extension<Arc<CommandEngine<C>>>,
    Json(req): Json<RemoveContextRequest>,
) -> (StatusCode, Json<RemoveContextResponse>) {
    let removed = engine.remove_local(&req.context_id).await;
    (StatusCode::OK, Json(RemoveContextResponse { removed }))
}

/// A worker on another node finished a functor submitted here.
pub async fn handle_deliver_result<C: ContextValue>(
    Extension(engine): Extension<Arc<CommandEngine<C>>>,
    Json(req): Json<DeliverResultRequest>,
) -> (StatusCode, Json<DeliverResultResponse>) {
    let accepted = engine.publisher().store(req.result);
    (StatusCode::OK, Json(DeliverResultResponse { accepted }))
}
