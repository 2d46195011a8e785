//! Value ↔ bytes codecs.
//!
//! A [`Codec`] is chosen per file by its [`FileConfiguration`](crate::FileConfiguration).
//! The engine only calls `encode`/`decode`; what the bytes look like is up to
//! the codec.
//!
//! | Codec            | Format                    | Extension |
//! |------------------|---------------------------|-----------|
//! | [`JsonCodec`]    | JSON (`serde_json`)       | `json`    |
//! | [`RonCodec`]     | RON (`ron`)               | `ron`     |
//! | [`PostcardCodec`]| postcard binary           | `bin`     |
//! | [`TextCodec`]    | raw UTF-8, `String` only  | `txt`     |
//!
//! [`SharedCodec`] lifts any of them to `Arc<T>`, for values kept in a
//! [`WeakCache`](crate::WeakCache).

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("RON: {0}")]
    Ron(String),

    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Turns a typed value into bytes and back.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// File extension (without the dot) conventionally used with this codec.
    fn extension(&self) -> &'static str;
}

/// JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    /// Indented output, friendlier to external editors.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

/// RON via `ron`, pretty-printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RonCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for RonCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())
            .map(String::into_bytes)
            .map_err(|e| CodecError::Ron(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let text = std::str::from_utf8(bytes)?;
        ron::from_str(text).map_err(|e| CodecError::Ron(e.to_string()))
    }

    fn extension(&self) -> &'static str {
        "ron"
    }
}

/// Compact binary via `postcard`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for PostcardCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(postcard::to_stdvec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(postcard::from_bytes(bytes)?)
    }

    fn extension(&self) -> &'static str {
        "bin"
    }
}

/// Plain text: the file contents are the string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec<String> for TextCodec {
    fn encode(&self, value: &String) -> Result<Vec<u8>, CodecError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    fn extension(&self) -> &'static str {
        "txt"
    }
}

/// Encodes `Arc<T>` with the codec for `T`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedCodec<C>(pub C);

impl<T, C: Codec<T>> Codec<Arc<T>> for SharedCodec<C> {
    fn encode(&self, value: &Arc<T>) -> Result<Vec<u8>, CodecError> {
        self.0.encode(value)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Arc<T>, CodecError> {
        self.0.decode(bytes).map(Arc::new)
    }

    fn extension(&self) -> &'static str {
        self.0.extension()
    }
}
