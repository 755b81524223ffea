pub mod codec;
mod message;

pub use message::{ChannelRequest, ChannelResponse, FetchMode, TransferHeader};

/// Raw byte frames accompanying a transfer header. IPC transfers carry
/// none; normal transfers carry exactly one with the staged host copy.
pub type Frame = Vec<u8>;
