//! CUDA device adapter.
//!
//! Thin wrapper over the CUDA driver API via cudarc. Requires a working
//! driver at runtime; the crate builds without it unless the `cuda` feature
//! is enabled. IPC handles produced here are real `cuIpcGetMemHandle` blobs
//! and stay valid for any process on the same machine while the exporting
//! allocation lives.

use std::sync::Arc;

use cudarc::driver::{result, sys, CudaContext};

use crate::error::{CudexError, Result};

use super::adapter::{DeviceAdapter, IpcMemHandle, CUDA_IPC_HANDLE_SIZE};

pub struct CudaAdapter {
    ctx: Arc<CudaContext>,
    ordinal: u32,
}

impl CudaAdapter {
    /// Retain the primary context on `device_ordinal`.
    pub fn new(device_ordinal: u32) -> Result<Self> {
        let ctx = CudaContext::new(device_ordinal as usize)
            .map_err(|e| CudexError::device(format!("failed to open CUDA device {device_ordinal}: {e}")))?;
        Ok(Self {
            ctx,
            ordinal: device_ordinal,
        })
    }

    fn bind(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| CudexError::device(format!("cuCtxSetCurrent failed: {e}")))
    }
}

impl DeviceAdapter for CudaAdapter {
    fn alloc(&self, len: usize) -> Result<u64> {
        self.bind()?;
        let mut dptr: sys::CUdeviceptr = 0;
        let rc = unsafe { sys::cuMemAlloc_v2(&mut dptr, len.max(1)) };
        if rc != sys::CUresult::CUDA_SUCCESS {
            return Err(CudexError::device(format!(
                "cuMemAlloc of {len} bytes failed: {rc:?}"
            )));
        }
        Ok(dptr)
    }

    unsafe fn free(&self, ptr: u64, _len: usize) {
        if self.bind().is_err() {
            return;
        }
        let rc = unsafe { sys::cuMemFree_v2(ptr) };
        if rc != sys::CUresult::CUDA_SUCCESS {
            tracing::warn!(ptr, "cuMemFree failed: {rc:?}");
        }
    }

    unsafe fn copy_htod(&self, src: &[u8], dst: u64) -> Result<()> {
        self.bind()?;
        unsafe { result::memcpy_htod_sync(dst as sys::CUdeviceptr, src) }
            .map_err(|e| CudexError::device(format!("cuMemcpyHtoD failed: {e}")))
    }

    unsafe fn copy_dtoh(&self, src: u64, len: usize) -> Result<Vec<u8>> {
        self.bind()?;
        let mut out = vec![0u8; len];
        unsafe { result::memcpy_dtoh_sync(&mut out, src as sys::CUdeviceptr) }
            .map_err(|e| CudexError::device(format!("cuMemcpyDtoH failed: {e}")))?;
        Ok(out)
    }

    unsafe fn copy_dtod(&self, src: u64, dst: u64, len: usize) -> Result<()> {
        self.bind()?;
        let rc = unsafe { sys::cuMemcpyDtoD_v2(dst, src, len) };
        if rc != sys::CUresult::CUDA_SUCCESS {
            return Err(CudexError::device(format!("cuMemcpyDtoD failed: {rc:?}")));
        }
        let rc = unsafe { sys::cuCtxSynchronize() };
        if rc != sys::CUresult::CUDA_SUCCESS {
            return Err(CudexError::device(format!("cuCtxSynchronize failed: {rc:?}")));
        }
        Ok(())
    }

    unsafe fn ipc_export(&self, ptr: u64, len: usize) -> Result<IpcMemHandle> {
        self.bind()?;
        let mut blob = [0u8; CUDA_IPC_HANDLE_SIZE];
        let rc =
            unsafe { sys::cuIpcGetMemHandle(blob.as_mut_ptr() as *mut sys::CUipcMemHandle, ptr) };
        if rc != sys::CUresult::CUDA_SUCCESS {
            return Err(CudexError::device(format!("cuIpcGetMemHandle failed: {rc:?}")));
        }
        Ok(IpcMemHandle {
            bytes: blob.to_vec(),
            len: len as u64,
        })
    }

    fn ipc_open(&self, handle: &IpcMemHandle) -> Result<u64> {
        self.bind().map_err(|e| CudexError::HandleOpen {
            reason: e.to_string(),
        })?;
        if handle.bytes.len() != CUDA_IPC_HANDLE_SIZE {
            return Err(CudexError::HandleOpen {
                reason: format!(
                    "expected a {CUDA_IPC_HANDLE_SIZE} byte CUDA handle, got {}",
                    handle.bytes.len()
                ),
            });
        }
        let raw = unsafe {
            std::ptr::read_unaligned(handle.bytes.as_ptr() as *const sys::CUipcMemHandle)
        };
        let mut dptr: sys::CUdeviceptr = 0;
        let rc = unsafe {
            sys::cuIpcOpenMemHandle(
                &mut dptr,
                raw,
                sys::CUipcMem_flags::CU_IPC_MEM_LAZY_ENABLE_PEER_ACCESS as u32,
            )
        };
        if rc != sys::CUresult::CUDA_SUCCESS {
            return Err(CudexError::HandleOpen {
                reason: format!("cuIpcOpenMemHandle failed: {rc:?}"),
            });
        }
        Ok(dptr)
    }

    unsafe fn ipc_close(&self, ptr: u64) -> Result<()> {
        self.bind()?;
        let rc = unsafe { sys::cuIpcCloseMemHandle(ptr) };
        if rc != sys::CUresult::CUDA_SUCCESS {
            return Err(CudexError::device(format!("cuIpcCloseMemHandle failed: {rc:?}")));
        }
        Ok(())
    }

    fn context_token(&self) -> u64 {
        self.ctx.cu_ctx() as usize as u64
    }

    fn device_ordinal(&self) -> u32 {
        self.ordinal
    }

    fn bind_to_thread(&self) -> Result<()> {
        self.bind()
    }
}
