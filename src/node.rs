//! Per-worker assembly of the transfer machinery.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::broker::{ExportCache, ImportCache, TransferBroker};
use crate::channel::TransferChannel;
use crate::config::TransferConfig;
use crate::device::DeviceAdapter;
use crate::error::Result;

/// One worker's transfer state: the process-scoped caches, the background
/// channel serving peers, and the broker the worker calls directly.
pub struct TransferNode {
    broker: TransferBroker,
    channel: TransferChannel,
}

impl TransferNode {
    /// Bind a channel on `config.bind_host` and wire a broker to it. The
    /// channel starts serving before this returns; its port is OS-assigned
    /// and available from [`endpoint`](Self::endpoint).
    pub fn start(adapter: Arc<dyn DeviceAdapter>, config: TransferConfig) -> Result<Self> {
        let exports = Arc::new(ExportCache::new());
        let imports = Arc::new(ImportCache::new());
        let channel = TransferChannel::bind(
            &config.bind_host,
            Arc::clone(&adapter),
            Arc::clone(&exports),
        )?;
        let broker = TransferBroker::new(adapter, config, exports, imports, channel.port())?;
        tracing::info!(
            context = %broker.context(),
            endpoint = %channel.local_addr(),
            "transfer node started"
        );
        Ok(Self { broker, channel })
    }

    pub fn broker(&self) -> &TransferBroker {
        &self.broker
    }

    pub fn channel(&self) -> &TransferChannel {
        &self.channel
    }

    /// Local address of this worker's transfer channel.
    pub fn endpoint(&self) -> SocketAddr {
        self.channel.local_addr()
    }
}
