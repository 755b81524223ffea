//! Columnar device buffers with peer-to-peer transfer between GPU workers.
//!
//! The crate has two halves. [`DeviceBuffer`] is a typed, sized window into
//! device memory with append-in-place semantics and zero-copy slicing.
//! [`TransferBroker`] moves buffers between worker processes, choosing per
//! transfer between handing over a CUDA IPC memory handle (same machine,
//! the payload never leaves the device) and staging a copy through host
//! memory. Each worker runs one background [`TransferChannel`] that serves
//! peers' fetch requests; [`TransferNode`] wires the pieces together.
//!
//! Without the `cuda` feature the crate runs against [`HostAdapter`], a
//! heap-backed stand-in that lets the full protocol execute on machines
//! with no GPU.

pub mod broker;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod node;
pub mod protocol;
pub mod transferable;
pub mod types;

pub use broker::{ExportCache, ImportCache, TransferBroker};
pub use buffer::DeviceBuffer;
pub use channel::TransferChannel;
pub use config::TransferConfig;
pub use context::{ContextId, TransferContext};
#[cfg(feature = "cuda")]
pub use device::CudaAdapter;
pub use device::{DeviceAdapter, HostAdapter, IpcMemHandle, OpenedHandle};
pub use error::{CudexError, Result};
pub use node::TransferNode;
pub use protocol::{ChannelRequest, ChannelResponse, FetchMode, Frame, TransferHeader};
pub use transferable::Transferable;
pub use types::{DType, Element, PROTOCOL_VERSION};
