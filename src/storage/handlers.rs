use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use serde::{Serialize, de::DeserializeOwned};
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

use super::memory::DistributedMap;
use super::protocol::GetResponse;

pub async fn handle_get_internal<K, V>(
    Extension(map): Extension<Arc<DistributedMap<K, V>>>,
    Path(key_str): Path<String>,
) -> (StatusCode, Json<GetResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let key: K = match key_str.parse() {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to parse key: {}", e);
            return (StatusCode::BAD_REQUEST, Json(GetResponse { value_json: None }));
        }
    };

    let Some(value) = map.get_local(&key) else {
        return (StatusCode::NOT_FOUND, Json(GetResponse { value_json: None }));
    };

    match serde_json::to_string(&value) {
        Ok(value_json) => (
            StatusCode::OK,
            Json(GetResponse {
                value_json: Some(value_json),
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to serialize value for {}: {}", key_str, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GetResponse { value_json: None }),
            )
        }
    }
}
