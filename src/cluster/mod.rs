//! Cluster Networking
//!
//! HTTP plumbing between nodes: the retrying transport, the request/response
//! types of the engine's internal endpoints, their axum handlers, and the
//! router that mounts them next to the store endpoints.

pub mod handlers;
pub mod protocol;
pub mod transport;

use crate::command::types::{ContextId, ResultId};
use crate::context::types::{ContextRecord, ContextValue};
use crate::engine::engine::{CONTEXTS_BASE_PATH, CommandEngine, RESULTS_BASE_PATH};
use crate::functor::types::FunctorResult;
use crate::storage::handlers::handle_get_internal;
use crate::storage::protocol::ENDPOINT_GET_INTERNAL;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use handlers::*;
use protocol::*;
use std::sync::Arc;

/// Every internal endpoint a node serves to its peers.
pub fn router<C: ContextValue>(engine: Arc<CommandEngine<C>>) -> Router {
    let context_get = format!("{}{}/:key", CONTEXTS_BASE_PATH, ENDPOINT_GET_INTERNAL);
    let result_get = format!("{}{}/:key", RESULTS_BASE_PATH, ENDPOINT_GET_INTERNAL);

    Router::new()
        .route(ENDPOINT_SUBMIT, post(handle_submit::<C>))
        .route(ENDPOINT_CANCEL, post(handle_cancel::<C>))
        .route(ENDPOINT_REGISTER_CONTEXT, post(handle_register_context::<C>))
        .route(ENDPOINT_REMOVE_CONTEXT, post(handle_remove_context::<C>))
        .route(ENDPOINT_DELIVER_RESULT, post(handle_deliver_result::<C>))
        .route(&context_get, get(handle_get_internal::<ContextId, ContextRecord<C>>))
        .route(&result_get, get(handle_get_internal::<ResultId, FunctorResult>))
        .layer(Extension(engine.contexts().clone()))
        .layer(Extension(engine.results().clone()))
        .layer(Extension(engine))
}
