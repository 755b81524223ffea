//! Host-memory adapter.
//!
//! Backs device pointers with ordinary heap allocations so the buffer and
//! transfer machinery can run on machines without a GPU. Every instance
//! poses as a distinct device context, which lets two workers share one OS
//! process in tests while still looking like separate contexts to the
//! transfer protocol. Its IPC handles are process-local: real cross-process
//! sharing is what [`CudaAdapter`](super::CudaAdapter) is for.

use std::alloc::Layout;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CudexError, Result};

use super::adapter::{DeviceAdapter, IpcMemHandle};

const HANDLE_MAGIC: &[u8; 4] = b"HMEM";
const HANDLE_LEN: usize = 16;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Heap-backed stand-in for a device context.
pub struct HostAdapter {
    token: u64,
    allocs: AtomicU64,
}

impl HostAdapter {
    pub fn new() -> Self {
        Self {
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            allocs: AtomicU64::new(0),
        }
    }

    /// Number of allocations made through this adapter so far.
    pub fn alloc_count(&self) -> u64 {
        self.allocs.load(Ordering::Relaxed)
    }

    fn layout(len: usize) -> Result<Layout> {
        // Zero-length buffers still get a real pointer to hang a handle on.
        Layout::from_size_align(len.max(1), 8)
            .map_err(|e| CudexError::device(format!("invalid allocation of {len} bytes: {e}")))
    }
}

impl Default for HostAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAdapter for HostAdapter {
    fn alloc(&self, len: usize) -> Result<u64> {
        let ptr = unsafe { std::alloc::alloc_zeroed(Self::layout(len)?) };
        if ptr.is_null() {
            return Err(CudexError::device(format!(
                "host allocation of {len} bytes failed"
            )));
        }
        self.allocs.fetch_add(1, Ordering::Relaxed);
        Ok(ptr as u64)
    }

    unsafe fn free(&self, ptr: u64, len: usize) {
        // A len that never produced a layout never produced an allocation.
        if let Ok(layout) = Self::layout(len) {
            unsafe { std::alloc::dealloc(ptr as *mut u8, layout) };
        }
    }

    unsafe fn copy_htod(&self, src: &[u8], dst: u64) -> Result<()> {
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len()) };
        Ok(())
    }

    unsafe fn copy_dtoh(&self, src: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        unsafe { std::ptr::copy_nonoverlapping(src as *const u8, out.as_mut_ptr(), len) };
        Ok(out)
    }

    unsafe fn copy_dtod(&self, src: u64, dst: u64, len: usize) -> Result<()> {
        unsafe { std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len) };
        Ok(())
    }

    unsafe fn ipc_export(&self, ptr: u64, len: usize) -> Result<IpcMemHandle> {
        let mut bytes = Vec::with_capacity(HANDLE_LEN);
        bytes.extend_from_slice(HANDLE_MAGIC);
        bytes.extend_from_slice(&std::process::id().to_le_bytes());
        bytes.extend_from_slice(&ptr.to_le_bytes());
        Ok(IpcMemHandle {
            bytes,
            len: len as u64,
        })
    }

    fn ipc_open(&self, handle: &IpcMemHandle) -> Result<u64> {
        if handle.bytes.len() != HANDLE_LEN || &handle.bytes[..4] != HANDLE_MAGIC {
            return Err(CudexError::HandleOpen {
                reason: format!("not a host memory handle ({} bytes)", handle.bytes.len()),
            });
        }
        let mut pid_bytes = [0u8; 4];
        pid_bytes.copy_from_slice(&handle.bytes[4..8]);
        let pid = u32::from_le_bytes(pid_bytes);
        if pid != std::process::id() {
            return Err(CudexError::HandleOpen {
                reason: format!(
                    "host memory handles are process-local (exported by pid {pid}, this is pid {})",
                    std::process::id()
                ),
            });
        }
        let mut ptr_bytes = [0u8; 8];
        ptr_bytes.copy_from_slice(&handle.bytes[8..16]);
        Ok(u64::from_le_bytes(ptr_bytes))
    }

    unsafe fn ipc_close(&self, _ptr: u64) -> Result<()> {
        // The exporter keeps ownership; host mappings have nothing to unmap.
        Ok(())
    }

    fn context_token(&self) -> u64 {
        self.token
    }

    fn device_ordinal(&self) -> u32 {
        0
    }

    fn bind_to_thread(&self) -> Result<()> {
        Ok(())
    }
}
