//! Background transfer channel.
//!
//! Every worker runs exactly one of these: a TCP endpoint on an OS-assigned
//! port, served by a single loop on a dedicated thread. A connection
//! carries one fetch request and one response, then closes. Requests are
//! served in arrival order; there is no worker pool, which keeps the export
//! cache access pattern trivially ordered.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::broker::ExportCache;
use crate::device::DeviceAdapter;
use crate::error::{CudexError, Result};
use crate::protocol::codec;
use crate::protocol::{ChannelRequest, ChannelResponse, FetchMode};

pub struct TransferChannel {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TransferChannel {
    /// Bind on an OS-assigned port of `bind_host` and start the service
    /// thread. The thread binds the device context before serving.
    pub fn bind(
        bind_host: &str,
        adapter: Arc<dyn DeviceAdapter>,
        exports: Arc<ExportCache>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CudexError::transport_with_source("failed to build channel runtime", e))?;
        let listener = runtime
            .block_on(TcpListener::bind((bind_host, 0)))
            .map_err(|e| {
                CudexError::transport_with_source(format!("failed to bind {bind_host}"), e)
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CudexError::transport_with_source("failed to read local address", e))?;
        let shutdown = Arc::new(Notify::new());
        let loop_shutdown = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("cudex-channel".to_string())
            .spawn(move || {
                if let Err(e) = adapter.bind_to_thread() {
                    tracing::error!("channel: failed to bind device context: {e}");
                    return;
                }
                runtime.block_on(serve_loop(listener, adapter, exports, loop_shutdown));
            })?;
        tracing::debug!(%local_addr, "transfer channel listening");
        Ok(Self {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Address the channel is reachable on locally.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// OS-assigned port of the channel.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for TransferChannel {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve_loop(
    listener: TcpListener,
    adapter: Arc<dyn DeviceAdapter>,
    exports: Arc<ExportCache>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::debug!("channel: shutdown requested, loop exiting");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = serve_one(stream, &adapter, &exports).await {
                            tracing::warn!(%peer, "channel: request failed: {e}");
                        }
                    }
                    Err(e) => {
                        tracing::debug!("channel: accept failed, loop exiting: {e}");
                        return;
                    }
                }
            }
        }
    }
}

async fn serve_one(
    mut stream: TcpStream,
    adapter: &Arc<dyn DeviceAdapter>,
    exports: &Arc<ExportCache>,
) -> Result<()> {
    let frame = codec::read_frame(&mut stream).await?;
    let request = codec::decode_request(&frame)?;
    let response = answer(request, adapter, exports);
    let encoded = codec::encode_response(&response)?;
    codec::write_frame(&mut stream, &encoded).await
}

fn answer(
    request: ChannelRequest,
    adapter: &Arc<dyn DeviceAdapter>,
    exports: &Arc<ExportCache>,
) -> ChannelResponse {
    match try_answer(request, adapter, exports) {
        Ok(response) => response,
        Err(CudexError::KeyNotExported { key }) => {
            tracing::warn!(key, "channel: request for a key never exported here");
            ChannelResponse::NotExported { key }
        }
        Err(e) => {
            tracing::warn!(key = request.key, "channel: failed to serve request: {e}");
            ChannelResponse::Failed {
                reason: e.to_string(),
            }
        }
    }
}

fn try_answer(
    request: ChannelRequest,
    adapter: &Arc<dyn DeviceAdapter>,
    exports: &Arc<ExportCache>,
) -> Result<ChannelResponse> {
    match request.mode {
        FetchMode::Ipc => {
            if let Some(handle) = exports.cached_handle(request.key)? {
                tracing::debug!(key = request.key, "channel: reusing cached IPC handle");
                return Ok(ChannelResponse::Handle { handle });
            }
            let buffer = exports.buffer(request.key)?;
            let len_bytes = buffer.size() * buffer.dtype().size_in_bytes();
            let handle = unsafe { adapter.ipc_export(buffer.device_ptr(), len_bytes)? };
            exports.store_handle(request.key, handle.clone())?;
            tracing::debug!(
                key = request.key,
                len_bytes,
                "channel: minted IPC handle for export"
            );
            Ok(ChannelResponse::Handle { handle })
        }
        FetchMode::Net => {
            let buffer = exports.buffer(request.key)?;
            let data = buffer.to_host()?;
            tracing::debug!(
                key = request.key,
                bytes = data.len(),
                "channel: staged export through host memory"
            );
            Ok(ChannelResponse::Bytes { data })
        }
    }
}
