//! Message traits: commands, queries and domain events.
//!
//! Every message carries a stable `NAME`. That name is the `event_type`
//! discriminator written to outbox rows and resolved by the
//! [`TypeRegistry`](crate::TypeRegistry) at relay time, so it must not change
//! when the Rust type is renamed or moved.

use std::any::Any;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::Codec;
use crate::error::CodecError;

/// The routing category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Command,
    Query,
    Event,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Command => write!(f, "command"),
            MessageKind::Query => write!(f, "query"),
            MessageKind::Event => write!(f, "event"),
        }
    }
}

/// An immutable request or fact that can flow through the dispatcher.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable discriminator (e.g. `"CreateOrder"`, `"OrderCreated"`).
    const NAME: &'static str;
    /// Which routing table this message belongs to.
    const KIND: MessageKind;
    /// What a handler returns for this message.
    type Output: Send + 'static;
}

/// A state-changing request with exactly one handler.
pub trait Command: Message {}

/// A read-only request with exactly one handler.
pub trait Query: Message {}

/// A fact raised by an aggregate; zero or more handlers react to it.
pub trait DomainEvent: Message<Output = ()> {}

/// Type-erased view of a message, used by middleware and the relay.
pub trait AnyMessage: Send + Sync + 'static {
    fn message_type(&self) -> &'static str;
    fn kind(&self) -> MessageKind;
    fn encode(&self, codec: Codec) -> Result<Vec<u8>, CodecError>;
    fn as_any(&self) -> &dyn Any;
}

impl<M: Message> AnyMessage for M {
    fn message_type(&self) -> &'static str {
        M::NAME
    }

    fn kind(&self) -> MessageKind {
        M::KIND
    }

    fn encode(&self, codec: Codec) -> Result<Vec<u8>, CodecError> {
        codec.encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyMessage {
    /// Downcast to the concrete message type.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

impl fmt::Debug for dyn AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("message_type", &self.message_type())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Message for Ping {
        const NAME: &'static str = "Ping";
        const KIND: MessageKind = MessageKind::Command;
        type Output = u32;
    }

    impl Command for Ping {}

    #[test]
    fn erased_view_exposes_name_and_kind() {
        let ping = Ping { seq: 7 };
        let erased: &dyn AnyMessage = &ping;
        assert_eq!(erased.message_type(), "Ping");
        assert_eq!(erased.kind(), MessageKind::Command);
        assert_eq!(erased.downcast_ref::<Ping>(), Some(&ping));
    }

    #[test]
    fn erased_encode_uses_codec() {
        let erased: &dyn AnyMessage = &Ping { seq: 3 };
        let bytes = erased.encode(Codec::Json).unwrap();
        assert_eq!(bytes, br#"{"seq":3}"#);
    }
}
