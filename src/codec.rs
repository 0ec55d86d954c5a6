//! Serialization Codec
//!
//! Commands, functors, context values and functor results cross node boundaries
//! as opaque byte payloads. The codec used for those payloads is chosen once per
//! node (see `EngineConfig::codec`); type identity travels separately as the
//! envelope's type tag, so any self-describing or positional format works.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode codec error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Wire format used for command payloads and results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    Bincode,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(value)?),
            Codec::Bincode => Ok(bincode::serialize(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
            Codec::Bincode => Ok(bincode::deserialize(bytes)?),
        }
    }
}
