use crate::context::ContextId;
use crate::device::IpcMemHandle;
use crate::types::DType;

/// Delivery path an importer asks the exporting channel for.
#[derive(
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
)]
pub enum FetchMode {
    /// Hand over an IPC memory handle; the payload never leaves the device.
    Ipc,
    /// Stage the payload through host memory and send the bytes.
    Net,
}

/// Per-buffer transfer header, produced by `serialize` and carried to the
/// importer by whatever transport the caller uses for headers.
#[derive(
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Debug,
    Clone,
    PartialEq,
)]
pub enum TransferHeader {
    /// Deferred transfer: the data stays device-resident with the exporter
    /// and the importer fetches it through the exporter's channel.
    Ipc {
        /// Identity of the exporting device context.
        context: ContextId,
        /// Export-cache key the channel will be asked for.
        key: u64,
        /// Host the exporting channel is reachable on.
        host: String,
        /// Port of the exporting channel.
        port: u16,
        dtype: DType,
        /// Element count of the transfer.
        len: u64,
    },
    /// Self-contained transfer: the single accompanying frame holds a host
    /// copy of exactly `len` elements.
    Normal { dtype: DType, len: u64 },
}

impl TransferHeader {
    pub fn dtype(&self) -> DType {
        match self {
            TransferHeader::Ipc { dtype, .. } | TransferHeader::Normal { dtype, .. } => *dtype,
        }
    }

    /// Element count of the transfer.
    pub fn len(&self) -> u64 {
        match self {
            TransferHeader::Ipc { len, .. } | TransferHeader::Normal { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One fetch request. A connection carries exactly one of these and gets
/// exactly one [`ChannelResponse`] back.
#[derive(
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
)]
pub struct ChannelRequest {
    pub mode: FetchMode,
    /// Export-cache key from the transfer header.
    pub key: u64,
}

/// Channel reply to a [`ChannelRequest`].
#[derive(
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Debug,
    Clone,
    PartialEq,
)]
pub enum ChannelResponse {
    /// IPC fetch: a handle the importer can map into its own context.
    Handle { handle: IpcMemHandle },
    /// Network fetch: the staged host copy itself.
    Bytes { data: Vec<u8> },
    /// The requested key was never exported here.
    NotExported { key: u64 },
    /// The key exists but serving it failed on the exporting side.
    Failed { reason: String },
}
