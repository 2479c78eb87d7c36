//! Wire protocol: framing, value codec, and outbound messages.

pub mod codec;
pub mod framing;
pub mod outbound;

pub use codec::{decode, decode_all, encode, DecodeError, Value};
pub use framing::{CommandKind, Framer, FramingError, Message};
pub use outbound::OutboundMessage;
