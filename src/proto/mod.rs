//! Wire protocol: envelope schema, length-prefixed framing, and the
//! dispatcher that routes decoded messages to handlers.

pub mod dispatcher;
pub mod framing;
pub mod handlers;
pub mod message;

pub use dispatcher::{Dispatcher, MessageHandler, Session};
pub use framing::{encode_frame, DecodeOutcome, FrameDecoder};
pub use message::{Envelope, MessageType, PeerAddr};
