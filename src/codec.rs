use bytes::Bytes;

use crate::error::{DispatchError, Result};
use crate::value::{EncodedBuf, Value};

/// Serializes user values into argument buffers. Three distinct encoders so
/// map keys and map values can use different representations than plain
/// values. The dispatch core never inspects the encoded bytes.
pub trait Codec: Send + Sync {
    fn encode_value(&self, value: &Value) -> Result<EncodedBuf>;
    fn encode_map_key(&self, value: &Value) -> Result<EncodedBuf>;
    fn encode_map_value(&self, value: &Value) -> Result<EncodedBuf>;
}

/// Optional hook converting user objects into persistent references before
/// encoding. When it yields a reference, the reference is encoded instead of
/// the original value.
pub trait ReferenceBuilder: Send + Sync {
    fn to_reference(&self, value: &Value) -> Option<Value>;
}

/// Identity codec: scalar values pass through as their natural byte form.
/// Used for commands whose replies and arguments are plain strings, such as
/// SCRIPT LOAD.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl Codec for PlainCodec {
    fn encode_value(&self, value: &Value) -> Result<EncodedBuf> {
        let bytes = match value {
            Value::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Value::Bytes(bytes) => bytes.clone(),
            Value::Int(n) => Bytes::from(n.to_string().into_bytes()),
            Value::Null | Value::List(_) => {
                return Err(DispatchError::InvalidArgument(format!(
                    "plain codec cannot encode {:?}",
                    value
                )))
            }
        };
        Ok(EncodedBuf::new(bytes))
    }

    fn encode_map_key(&self, value: &Value) -> Result<EncodedBuf> {
        self.encode_value(value)
    }

    fn encode_map_value(&self, value: &Value) -> Result<EncodedBuf> {
        self.encode_value(value)
    }
}
