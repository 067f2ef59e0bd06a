use std::collections::HashMap;
use std::fmt;

use crate::codec::Codec;
use crate::error::{CodecError, RegistryError};
use crate::message::{AnyMessage, Message};

type DecodeFn = fn(Codec, &[u8]) -> Result<Box<dyn AnyMessage>, CodecError>;

fn decode_as<M: Message>(codec: Codec, payload: &[u8]) -> Result<Box<dyn AnyMessage>, CodecError> {
    let message: M = codec.decode(payload)?;
    Ok(Box::new(message))
}

/// Explicit `event_type` to schema table.
///
/// Built once at startup and shared (behind an `Arc`) by the outbox
/// middleware, which refuses to stage rows it could not decode later, and by
/// the relay, which decodes rows back into messages.
pub struct TypeRegistry {
    codec: Codec,
    entries: HashMap<&'static str, DecodeFn>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.entries.keys().collect();
        types.sort();
        f.debug_struct("TypeRegistry")
            .field("codec", &self.codec)
            .field("types", &types)
            .finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_codec(Codec::default())
    }

    pub fn with_codec(codec: Codec) -> Self {
        Self {
            codec,
            entries: HashMap::new(),
        }
    }

    /// Builder-style registration.
    pub fn register<M: Message>(mut self) -> Result<Self, RegistryError> {
        self.insert::<M>()?;
        Ok(self)
    }

    pub fn insert<M: Message>(&mut self) -> Result<(), RegistryError> {
        if self.entries.contains_key(M::NAME) {
            return Err(RegistryError::Duplicate(M::NAME));
        }
        self.entries.insert(M::NAME, decode_as::<M>);
        Ok(())
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize a message for the outbox. Unregistered types are refused.
    pub fn encode(&self, message: &dyn AnyMessage) -> Result<Vec<u8>, RegistryError> {
        let event_type = message.message_type();
        if !self.contains(event_type) {
            return Err(RegistryError::Unresolved(event_type.to_string()));
        }
        message
            .encode(self.codec)
            .map_err(|source| RegistryError::Encode { event_type, source })
    }

    /// Rebuild the concrete message stored under `event_type`.
    pub fn decode(
        &self,
        event_type: &str,
        payload: &[u8],
    ) -> Result<Box<dyn AnyMessage>, RegistryError> {
        let decode = self
            .entries
            .get(event_type)
            .ok_or_else(|| RegistryError::Unresolved(event_type.to_string()))?;
        decode(self.codec, payload).map_err(|source| RegistryError::Decode {
            event_type: event_type.to_string(),
            source,
        })
    }
}
