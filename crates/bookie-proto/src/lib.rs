//! Bookie V2 wire protocol
//!
//! Frame codecs for the ledger storage node and the glue that turns decoded
//! requests into `bookie_core::Storage` calls.
//!
//! # Architecture
//!
//! - **Framing**: `take_frame` splits length-prefixed bodies off a receive buffer
//! - **Server**: `ServerCodec` decodes requests and encodes responses
//! - **Client**: `ClientCodec` is the mirror image, used by clients and tests
//! - **Dispatch**: `RequestHandler` answers add requests only once the entry is durable
//!
//! Codecs hold no state beyond their `CodecConfig` and can be shared freely.
//! A decode error means the connection must be closed; nothing is sent back.

pub mod client;
pub mod error;
pub mod frame;
pub mod handler;
pub mod header;
pub mod server;
pub mod types;

pub use client::ClientCodec;
pub use error::{FrameError, FrameResult};
pub use frame::{take_frame, CodecConfig};
pub use handler::{PendingResponse, RequestHandler};
pub use header::{OpCode, PacketHeader, CURRENT_PROTOCOL_VERSION, FLAG_FENCING};
pub use server::ServerCodec;
pub use types::{ErrorCode, Request, Response};
