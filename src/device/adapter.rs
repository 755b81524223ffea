use crate::error::Result;

/// Size in bytes of a CUDA IPC memory handle blob.
pub const CUDA_IPC_HANDLE_SIZE: usize = 64;

/// Opaque shareable reference to a device allocation.
///
/// The blob format is adapter-specific; peers only ever hand it back to an
/// adapter of the same kind. `len` is the byte length of the referenced
/// region so the importer can size its copy without touching the mapping.
#[derive(
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
)]
pub struct IpcMemHandle {
    /// Opaque handle bytes as produced by the exporting driver.
    pub bytes: Vec<u8>,
    /// Byte length of the referenced region.
    pub len: u64,
}

/// Uniform access to one device context: allocation, copies in all three
/// directions and the IPC handle lifecycle.
///
/// Implementations hand out raw device pointers as `u64`. The pointer
/// contracts mirror the driver API: callers must only pass pointers obtained
/// from the same adapter (or its `ipc_open`) and must respect region bounds.
pub trait DeviceAdapter: Send + Sync {
    /// Allocate `len` bytes of device memory and return its base pointer.
    fn alloc(&self, len: usize) -> Result<u64>;

    /// Release an allocation previously returned by [`alloc`](Self::alloc).
    ///
    /// # Safety
    /// `ptr` must come from this adapter's `alloc` with the same `len` and
    /// must not be freed twice or used afterwards.
    unsafe fn free(&self, ptr: u64, len: usize);

    /// Copy `src` into device memory at `dst`.
    ///
    /// # Safety
    /// `dst` must reference at least `src.len()` bytes of live allocation.
    unsafe fn copy_htod(&self, src: &[u8], dst: u64) -> Result<()>;

    /// Copy `len` bytes of device memory at `src` back to the host.
    ///
    /// # Safety
    /// `src` must reference at least `len` bytes of live allocation.
    unsafe fn copy_dtoh(&self, src: u64, len: usize) -> Result<Vec<u8>>;

    /// Copy `len` bytes between two device regions.
    ///
    /// # Safety
    /// Both regions must be live, at least `len` bytes, and must not overlap.
    unsafe fn copy_dtod(&self, src: u64, dst: u64, len: usize) -> Result<()>;

    /// Produce a shareable handle for the `len` bytes at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be the base pointer of a live allocation from this adapter.
    unsafe fn ipc_export(&self, ptr: u64, len: usize) -> Result<IpcMemHandle>;

    /// Map a peer's handle into this context and return the local pointer.
    fn ipc_open(&self, handle: &IpcMemHandle) -> Result<u64>;

    /// Unmap a pointer previously returned by [`ipc_open`](Self::ipc_open).
    ///
    /// # Safety
    /// `ptr` must come from this adapter's `ipc_open` and must not be used
    /// after the call.
    unsafe fn ipc_close(&self, ptr: u64) -> Result<()>;

    /// Opaque token identifying the underlying driver context. Stable for
    /// the adapter's lifetime and distinct between live contexts in one
    /// process.
    fn context_token(&self) -> u64;

    /// Ordinal of the device this context is bound to.
    fn device_ordinal(&self) -> u32;

    /// Bind the context to the calling thread. Service threads call this
    /// once before touching device memory.
    fn bind_to_thread(&self) -> Result<()>;
}

/// A peer handle mapped into the local context, unmapped on drop whether or
/// not the copy out of it succeeded.
pub struct OpenedHandle<'a> {
    adapter: &'a dyn DeviceAdapter,
    ptr: u64,
}

impl<'a> OpenedHandle<'a> {
    pub fn open(adapter: &'a dyn DeviceAdapter, handle: &IpcMemHandle) -> Result<Self> {
        let ptr = adapter.ipc_open(handle)?;
        Ok(Self { adapter, ptr })
    }

    /// Local device pointer to the mapped region.
    pub fn ptr(&self) -> u64 {
        self.ptr
    }
}

impl Drop for OpenedHandle<'_> {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.adapter.ipc_close(self.ptr) } {
            tracing::warn!(ptr = self.ptr, "failed to close imported IPC handle: {e}");
        }
    }
}
