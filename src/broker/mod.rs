//! Transfer broker.
//!
//! One broker per worker decides, buffer by buffer, whether a transfer
//! ships as a zero-copy IPC offer or as a host-staged byte copy, and
//! performs the importing side's rebuild. The broker owns no background
//! work itself; deferred fetches go through the exporting worker's
//! [`TransferChannel`](crate::channel::TransferChannel).

mod cache;

pub use cache::{ExportCache, ImportCache};

use std::sync::Arc;

use tokio::net::TcpStream;

use crate::buffer::DeviceBuffer;
use crate::config::TransferConfig;
use crate::context::{ContextId, TransferContext};
use crate::device::{DeviceAdapter, OpenedHandle};
use crate::error::{CudexError, Result};
use crate::protocol::codec;
use crate::protocol::{ChannelRequest, ChannelResponse, FetchMode, Frame, TransferHeader};

pub struct TransferBroker {
    adapter: Arc<dyn DeviceAdapter>,
    config: TransferConfig,
    context: ContextId,
    channel_port: u16,
    exports: Arc<ExportCache>,
    imports: Arc<ImportCache>,
    /// Outbound fetches run on this single-threaded runtime, one at a time.
    runtime: tokio::runtime::Runtime,
}

impl TransferBroker {
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        config: TransferConfig,
        exports: Arc<ExportCache>,
        imports: Arc<ImportCache>,
        channel_port: u16,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CudexError::transport_with_source("failed to build broker runtime", e))?;
        let context = ContextId::current(adapter.as_ref());
        Ok(Self {
            adapter,
            config,
            context,
            channel_port,
            exports,
            imports,
            runtime,
        })
    }

    /// Identity of this worker's device context.
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn exports(&self) -> &Arc<ExportCache> {
        &self.exports
    }

    pub fn imports(&self) -> &Arc<ImportCache> {
        &self.imports
    }

    /// Turn a buffer into a header plus frames.
    ///
    /// With IPC enabled and both endpoints of `ctx` on one host, the buffer
    /// is pinned in the export cache and only a claim ticket leaves this
    /// worker; the entry is in the cache before this returns, so the header
    /// can be published the moment it exists. Otherwise the live contents
    /// are staged through host memory and shipped in a single frame.
    pub fn serialize(
        &self,
        buffer: &DeviceBuffer,
        ctx: Option<&TransferContext>,
    ) -> Result<(TransferHeader, Vec<Frame>)> {
        let deferred = self.config.use_ipc && ctx.is_some_and(TransferContext::same_host);
        if deferred {
            let contiguous = buffer.as_contiguous()?;
            let key = self.export_key(&contiguous);
            let exported = contiguous.compact_for_export()?;
            self.exports.insert(key, exported)?;
            tracing::debug!(
                key,
                size = buffer.size(),
                dtype = %buffer.dtype(),
                pinned = self.exports.len(),
                "transfer offered over IPC"
            );
            Ok((
                TransferHeader::Ipc {
                    context: self.context,
                    key,
                    host: self.config.advertise_host.clone(),
                    port: self.channel_port,
                    dtype: buffer.dtype(),
                    len: buffer.size() as u64,
                },
                Vec::new(),
            ))
        } else {
            let data = buffer.to_host()?;
            tracing::debug!(
                bytes = data.len(),
                dtype = %buffer.dtype(),
                "transfer staged through host memory"
            );
            Ok((
                TransferHeader::Normal {
                    dtype: buffer.dtype(),
                    len: buffer.size() as u64,
                },
                vec![data],
            ))
        }
    }

    /// Materialize a received transfer into a buffer in this context.
    ///
    /// Normal transfers upload their frame. IPC transfers first reject a
    /// rebuild inside the producing context, then consult the import cache,
    /// and only then fetch from the exporter, over shared device memory
    /// when the header's host is this worker's own and over the network
    /// otherwise. Either way the result is an independent allocation that
    /// later appends to the source cannot touch.
    pub fn rebuild(&self, header: &TransferHeader, frames: &[Frame]) -> Result<DeviceBuffer> {
        match header {
            TransferHeader::Normal { dtype, len } => {
                let data = frames.first().ok_or_else(|| {
                    CudexError::DecodeFailed(
                        "normal-mode transfer carries exactly one frame, got none".to_string(),
                    )
                })?;
                let expected = *len as usize * dtype.size_in_bytes();
                if data.len() != expected {
                    return Err(CudexError::DecodeFailed(format!(
                        "normal-mode frame holds {} bytes, header promises {expected}",
                        data.len()
                    )));
                }
                DeviceBuffer::from_host_bytes(&self.adapter, data, *dtype)
            }
            TransferHeader::Ipc {
                context,
                key,
                host,
                port,
                dtype,
                len,
            } => {
                if *context == self.context {
                    return Err(CudexError::SameContext { context: *context });
                }
                let import_key = import_identity(context, *key);
                if let Some(hit) = self.imports.get(import_key)? {
                    tracing::debug!(key, "transfer served from import cache");
                    return Ok(hit);
                }
                let mode = self.choose_mode(host);
                tracing::debug!(key, ?mode, %host, port, len, "fetching deferred transfer");
                let response = self.fetch(host, *port, ChannelRequest { mode, key: *key })?;
                let len = *len as usize;
                let built = match response {
                    ChannelResponse::Handle { handle } => {
                        let expected = (len * dtype.size_in_bytes()) as u64;
                        if handle.len != expected {
                            return Err(CudexError::HandleOpen {
                                reason: format!(
                                    "handle covers {} bytes, header promises {expected}",
                                    handle.len
                                ),
                            });
                        }
                        let opened = OpenedHandle::open(self.adapter.as_ref(), &handle)?;
                        DeviceBuffer::copy_from_device(&self.adapter, opened.ptr(), len, *dtype)?
                    }
                    ChannelResponse::Bytes { data } => {
                        let expected = len * dtype.size_in_bytes();
                        if data.len() != expected {
                            return Err(CudexError::DecodeFailed(format!(
                                "peer staged {} bytes, header promises {expected}",
                                data.len()
                            )));
                        }
                        DeviceBuffer::from_host_bytes(&self.adapter, &data, *dtype)?
                    }
                    ChannelResponse::NotExported { key } => {
                        return Err(CudexError::KeyNotExported { key });
                    }
                    ChannelResponse::Failed { reason } => {
                        return Err(CudexError::transport(format!(
                            "peer failed to serve transfer: {reason}"
                        )));
                    }
                };
                let built = self.imports.insert(import_key, built)?;
                tracing::debug!(key, imports = self.imports.len(), "transfer materialized");
                Ok(built)
            }
        }
    }

    /// Host-address comparison is the whole of path selection: the header
    /// names the exporter's host, and if it is this worker's own advertised
    /// host the device memory is reachable by IPC.
    fn choose_mode(&self, exporter_host: &str) -> FetchMode {
        if exporter_host == self.config.advertise_host {
            FetchMode::Ipc
        } else {
            FetchMode::Net
        }
    }

    /// Export identity: producing context plus the buffer's allocation
    /// base, window and dtype. Serializing the same buffer twice yields the
    /// same key, so re-exports collapse onto one cache entry.
    fn export_key(&self, buffer: &DeviceBuffer) -> u64 {
        fnv1a([
            self.context.to_key_bytes().as_slice(),
            &buffer.alloc_base().to_le_bytes(),
            &(buffer.element_offset() as u64).to_le_bytes(),
            &(buffer.size() as u64).to_le_bytes(),
            &[buffer.dtype() as u8],
        ])
    }

    /// One request, one response, one connection.
    fn fetch(&self, host: &str, port: u16, request: ChannelRequest) -> Result<ChannelResponse> {
        self.runtime.block_on(async {
            let mut stream = TcpStream::connect((host, port)).await.map_err(|e| {
                CudexError::transport_with_source(format!("failed to connect {host}:{port}"), e)
            })?;
            stream
                .set_nodelay(true)
                .map_err(|e| CudexError::transport_with_source("failed to set nodelay", e))?;
            let encoded = codec::encode_request(&request)?;
            codec::write_frame(&mut stream, &encoded).await?;
            let frame = codec::read_frame(&mut stream).await?;
            codec::decode_response(&frame)
        })
    }
}

/// Import-cache identity of a transfer: the producing context plus its
/// export key. Derivable from the header alone, so the cache can be probed
/// before any fetch.
fn import_identity(context: &ContextId, key: u64) -> u64 {
    fnv1a([context.to_key_bytes().as_slice(), &key.to_le_bytes()])
}

/// FNV-1a over a sequence of byte slices. Never returns zero so a key can
/// double as a "present" marker in logs.
fn fnv1a<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for part in parts {
        for &byte in part {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    if hash == 0 {
        hash = OFFSET_BASIS;
    }
    hash
}
