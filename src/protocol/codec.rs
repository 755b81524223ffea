//! Wire encoding for channel traffic.
//!
//! Every message travels as one length-prefixed frame: a `u64` little-endian
//! byte count followed by an rkyv-encoded payload. Oversized length prefixes
//! are rejected before any allocation happens.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CudexError, Result};
use crate::types::PROTOCOL_VERSION;

use super::message::{ChannelRequest, ChannelResponse, TransferHeader};

/// Upper bound on a single frame. Covers a staged host copy of the largest
/// buffer a single transfer is expected to carry.
pub const MAX_FRAME_SIZE: u64 = 4 * 1024 * 1024 * 1024;

pub fn encode_request(req: &ChannelRequest) -> Result<Vec<u8>> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(req)
        .map_err(|e| CudexError::EncodeFailed(format!("channel request: {e}")))?;
    Ok(bytes.to_vec())
}

pub fn decode_request(buf: &[u8]) -> Result<ChannelRequest> {
    rkyv::from_bytes::<ChannelRequest, rkyv::rancor::Error>(buf)
        .map_err(|e| CudexError::DecodeFailed(format!("channel request: {e}")))
}

pub fn encode_response(resp: &ChannelResponse) -> Result<Vec<u8>> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(resp)
        .map_err(|e| CudexError::EncodeFailed(format!("channel response: {e}")))?;
    Ok(bytes.to_vec())
}

pub fn decode_response(buf: &[u8]) -> Result<ChannelResponse> {
    rkyv::from_bytes::<ChannelResponse, rkyv::rancor::Error>(buf)
        .map_err(|e| CudexError::DecodeFailed(format!("channel response: {e}")))
}

/// Headers are normally carried by the caller's own transport; these two
/// exist for callers that want a ready-made byte encoding for them. The
/// encoding is a [`PROTOCOL_VERSION`] prefix followed by the rkyv payload,
/// so a header from an incompatible release fails loudly instead of
/// misparsing.
pub fn encode_header(header: &TransferHeader) -> Result<Vec<u8>> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(header)
        .map_err(|e| CudexError::EncodeFailed(format!("transfer header: {e}")))?;
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode_header(buf: &[u8]) -> Result<TransferHeader> {
    if buf.len() < 2 {
        return Err(CudexError::DecodeFailed(
            "transfer header shorter than its version prefix".to_string(),
        ));
    }
    let version = u16::from_le_bytes([buf[0], buf[1]]);
    if version != PROTOCOL_VERSION {
        return Err(CudexError::DecodeFailed(format!(
            "transfer header carries protocol version {version}, this build speaks {PROTOCOL_VERSION}"
        )));
    }
    // The prefix shifts the payload off rkyv's alignment, re-home it.
    let mut payload = rkyv::util::AlignedVec::<16>::new();
    payload.extend_from_slice(&buf[2..]);
    rkyv::from_bytes::<TransferHeader, rkyv::rancor::Error>(&payload)
        .map_err(|e| CudexError::DecodeFailed(format!("transfer header: {e}")))
}

/// Write one `[len][payload]` frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&(payload.len() as u64).to_le_bytes())
        .await
        .map_err(|e| CudexError::transport_with_source("failed to write frame length", e))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| CudexError::transport_with_source("failed to write frame payload", e))?;
    writer
        .flush()
        .await
        .map_err(|e| CudexError::transport_with_source("failed to flush frame", e))?;
    Ok(())
}

/// Read one `[len][payload]` frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 8];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| CudexError::transport_with_source("failed to read frame length", e))?;
    let len = u64::from_le_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(CudexError::transport(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| CudexError::transport_with_source("failed to read frame payload", e))?;
    Ok(payload)
}
