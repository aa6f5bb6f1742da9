//! Payload (de)serialization between rows and typed tasks

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload conversion errors
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("payload error: {0}")]
    Other(String),
}

/// Converts the raw row payload to the consumer's type and back
pub trait PayloadTransformer<T>: Send + Sync {
    fn to_object(&self, payload: Option<&str>) -> Result<Option<T>, TransformError>;

    fn from_object(&self, payload: Option<&T>) -> Result<Option<String>, TransformError>;
}

/// Passes string payloads through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct StringPayloadTransformer;

impl PayloadTransformer<String> for StringPayloadTransformer {
    fn to_object(&self, payload: Option<&str>) -> Result<Option<String>, TransformError> {
        Ok(payload.map(str::to_string))
    }

    fn from_object(&self, payload: Option<&String>) -> Result<Option<String>, TransformError> {
        Ok(payload.cloned())
    }
}

/// JSON payloads via serde
pub struct JsonPayloadTransformer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonPayloadTransformer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonPayloadTransformer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PayloadTransformer<T> for JsonPayloadTransformer<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_object(&self, payload: Option<&str>) -> Result<Option<T>, TransformError> {
        payload
            .map(|raw| serde_json::from_str(raw).map_err(TransformError::from))
            .transpose()
    }

    fn from_object(&self, payload: Option<&T>) -> Result<Option<String>, TransformError> {
        payload
            .map(|value| serde_json::to_string(value).map_err(TransformError::from))
            .transpose()
    }
}
