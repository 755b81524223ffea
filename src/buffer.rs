//! Typed, sized device buffers.
//!
//! A [`DeviceBuffer`] is a 1-D region of device memory holding `size` live
//! elements inside a reservation of `capacity` elements. Buffers append in
//! place up to their capacity and never reallocate; running out of room is
//! an error, not a grow. Slices are zero-copy views sharing the parent
//! allocation, so the backing memory lives until the last view drops.

use std::sync::Arc;

use crate::device::DeviceAdapter;
use crate::error::{CudexError, Result};
use crate::types::{convert_slice, DType, Element};

/// One owned device allocation. Freed when the last buffer viewing it drops.
pub(crate) struct DeviceAlloc {
    adapter: Arc<dyn DeviceAdapter>,
    ptr: u64,
    len_bytes: usize,
}

impl DeviceAlloc {
    fn new(adapter: Arc<dyn DeviceAdapter>, len_bytes: usize) -> Result<Arc<Self>> {
        let ptr = adapter.alloc(len_bytes)?;
        Ok(Arc::new(Self {
            adapter,
            ptr,
            len_bytes,
        }))
    }
}

impl Drop for DeviceAlloc {
    fn drop(&mut self) {
        unsafe { self.adapter.free(self.ptr, self.len_bytes) };
    }
}

/// A typed window into device memory.
#[derive(Clone)]
pub struct DeviceBuffer {
    alloc: Arc<DeviceAlloc>,
    /// Element offset of this window inside the allocation.
    offset: usize,
    /// Live elements.
    size: usize,
    /// Reserved elements, counted from `offset`.
    capacity: usize,
    dtype: DType,
}

fn as_bytes<T: Element>(values: &[T]) -> &[u8] {
    // Element types are primitive scalars with no padding.
    unsafe {
        std::slice::from_raw_parts(
            values.as_ptr() as *const u8,
            std::mem::size_of_val(values),
        )
    }
}

/// Element count check applied to every incoming byte payload.
fn sentry_element_count(len_bytes: usize, dtype: DType) -> Result<usize> {
    let esize = dtype.size_in_bytes();
    if len_bytes % esize != 0 {
        return Err(CudexError::Sentry(format!(
            "{len_bytes} bytes is not a whole number of {dtype} elements"
        )));
    }
    Ok(len_bytes / esize)
}

impl DeviceBuffer {
    /// Upload a host slice; the result is full (`size == capacity`).
    pub fn from_slice<T: Element>(adapter: &Arc<dyn DeviceAdapter>, values: &[T]) -> Result<Self> {
        Self::from_host_bytes(adapter, as_bytes(values), T::DTYPE)
    }

    /// Upload raw little-endian host bytes as `dtype` elements.
    pub fn from_host_bytes(
        adapter: &Arc<dyn DeviceAdapter>,
        bytes: &[u8],
        dtype: DType,
    ) -> Result<Self> {
        let n = sentry_element_count(bytes.len(), dtype)?;
        let buf = Self::with_capacity(adapter, dtype, n)?;
        unsafe { buf.alloc.adapter.copy_htod(bytes, buf.alloc.ptr)? };
        Ok(Self { size: n, ..buf })
    }

    /// Reserve room for `capacity` elements with nothing in it yet.
    pub fn with_capacity(
        adapter: &Arc<dyn DeviceAdapter>,
        dtype: DType,
        capacity: usize,
    ) -> Result<Self> {
        let alloc = DeviceAlloc::new(Arc::clone(adapter), capacity * dtype.size_in_bytes())?;
        Ok(Self {
            alloc,
            offset: 0,
            size: 0,
            capacity,
            dtype,
        })
    }

    /// An empty buffer with no reservation.
    pub fn null(adapter: &Arc<dyn DeviceAdapter>, dtype: DType) -> Result<Self> {
        Self::with_capacity(adapter, dtype, 0)
    }

    /// Materialize `elems` elements from another device region into a fresh
    /// full buffer.
    pub(crate) fn copy_from_device(
        adapter: &Arc<dyn DeviceAdapter>,
        src_ptr: u64,
        elems: usize,
        dtype: DType,
    ) -> Result<Self> {
        let buf = Self::with_capacity(adapter, dtype, elems)?;
        unsafe {
            buf.alloc
                .adapter
                .copy_dtod(src_ptr, buf.alloc.ptr, elems * dtype.size_in_bytes())?
        };
        Ok(Self { size: elems, ..buf })
    }

    /// Live element count.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Reserved element count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Elements that can still be appended.
    pub fn avail_space(&self) -> usize {
        self.capacity - self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Byte footprint of this buffer's reservation, for memory accounting.
    pub fn byte_size(&self) -> usize {
        self.capacity * self.dtype.size_in_bytes()
    }

    /// Device pointer to the first element of this window.
    pub(crate) fn device_ptr(&self) -> u64 {
        self.alloc.ptr + (self.offset * self.dtype.size_in_bytes()) as u64
    }

    /// Base pointer of the backing allocation, part of the export identity.
    pub(crate) fn alloc_base(&self) -> u64 {
        self.alloc.ptr
    }

    pub(crate) fn element_offset(&self) -> usize {
        self.offset
    }

    /// Buffers are 1-D unit-stride windows by construction, so this always
    /// holds; it is the guarantee transfer code asserts before exporting.
    pub fn is_contiguous(&self) -> bool {
        true
    }

    /// Append one element. Fails with the same capacity rule as `extend`.
    pub fn append<T: Element>(&mut self, value: T) -> Result<()> {
        self.extend(std::slice::from_ref(&value))
    }

    /// Append a host slice in place, converting to this buffer's dtype.
    ///
    /// Fails with a capacity error exactly when `values.len()` exceeds
    /// [`avail_space`](Self::avail_space), and in that case writes nothing.
    pub fn extend<T: Element>(&mut self, values: &[T]) -> Result<()> {
        let needed = values.len();
        let available = self.avail_space();
        if needed > available {
            return Err(CudexError::Capacity { needed, available });
        }
        let converted = convert_slice(as_bytes(values), T::DTYPE, self.dtype)?;
        let dst = self.device_ptr() + (self.size * self.dtype.size_in_bytes()) as u64;
        unsafe { self.alloc.adapter.copy_htod(&converted, dst)? };
        self.size += needed;
        Ok(())
    }

    /// Zero-copy view of elements `[start, stop)`.
    ///
    /// Negative indices wrap against `size`; indices outside `[0, size]`
    /// after wrapping are an error. A reversed range yields an empty view.
    /// The view is full: its size and capacity both equal its length, so it
    /// cannot be appended to.
    pub fn slice(&self, start: isize, stop: isize) -> Result<DeviceBuffer> {
        let start = self.normalize_bound(start)?;
        let stop = self.normalize_bound(stop)?;
        let len = stop.saturating_sub(start);
        Ok(DeviceBuffer {
            alloc: Arc::clone(&self.alloc),
            offset: self.offset + start,
            size: len,
            capacity: len,
            dtype: self.dtype,
        })
    }

    /// Copy a single element back to the host. Negative indices wrap.
    pub fn get<T: Element>(&self, index: isize) -> Result<T> {
        if T::DTYPE != self.dtype {
            return Err(CudexError::Sentry(format!(
                "requested a {} element from a {} buffer",
                T::DTYPE,
                self.dtype
            )));
        }
        let idx = self.normalize_index(index)?;
        let esize = self.dtype.size_in_bytes();
        let src = self.device_ptr() + (idx * esize) as u64;
        let bytes = unsafe { self.alloc.adapter.copy_dtoh(src, esize)? };
        Ok(unsafe { (bytes.as_ptr() as *const T).read_unaligned() })
    }

    /// Download the live contents (`size` elements, never the reserve).
    pub fn to_host(&self) -> Result<Vec<u8>> {
        unsafe {
            self.alloc
                .adapter
                .copy_dtoh(self.device_ptr(), self.size * self.dtype.size_in_bytes())
        }
    }

    /// Download the live contents as typed values.
    pub fn to_host_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(CudexError::Sentry(format!(
                "requested {} elements from a {} buffer",
                T::DTYPE,
                self.dtype
            )));
        }
        let bytes = self.to_host()?;
        let base = bytes.as_ptr() as *const T;
        let mut out = Vec::with_capacity(self.size);
        for i in 0..self.size {
            out.push(unsafe { base.add(i).read_unaligned() });
        }
        Ok(out)
    }

    /// A buffer guaranteed contiguous, copying only if it ever has to.
    pub fn as_contiguous(&self) -> Result<DeviceBuffer> {
        let out = self.clone();
        debug_assert!(out.is_contiguous());
        Ok(out)
    }

    /// Convert to `dtype`, staging through the host. Same-dtype conversion
    /// shares the allocation instead of copying.
    pub fn astype(&self, dtype: DType) -> Result<DeviceBuffer> {
        if dtype == self.dtype {
            return Ok(self.clone());
        }
        let converted = convert_slice(&self.to_host()?, self.dtype, dtype)?;
        Self::from_host_bytes(&self.alloc.adapter, &converted, dtype)
    }

    /// Deep copy preserving both size and capacity.
    pub fn copy(&self) -> Result<DeviceBuffer> {
        let esize = self.dtype.size_in_bytes();
        let out = Self::with_capacity(&self.alloc.adapter, self.dtype, self.capacity)?;
        unsafe {
            self.alloc
                .adapter
                .copy_dtod(self.device_ptr(), out.alloc.ptr, self.capacity * esize)?
        };
        Ok(Self {
            size: self.size,
            ..out
        })
    }

    /// The buffer to actually export: base-aligned and exactly `size`
    /// elements, so its handle covers the live contents and nothing else.
    /// Already-compact buffers are shared rather than copied.
    pub(crate) fn compact_for_export(&self) -> Result<DeviceBuffer> {
        if self.offset == 0 && self.size == self.capacity {
            return Ok(self.clone());
        }
        Self::copy_from_device(
            &self.alloc.adapter,
            self.device_ptr(),
            self.size,
            self.dtype,
        )
    }

    fn normalize_bound(&self, bound: isize) -> Result<usize> {
        let wrapped = if bound < 0 {
            bound + self.size as isize
        } else {
            bound
        };
        if wrapped < 0 || wrapped > self.size as isize {
            return Err(CudexError::IndexOutOfBounds {
                index: bound,
                len: self.size,
            });
        }
        Ok(wrapped as usize)
    }

    fn normalize_index(&self, index: isize) -> Result<usize> {
        let wrapped = if index < 0 {
            index + self.size as isize
        } else {
            index
        };
        if wrapped < 0 || wrapped >= self.size as isize {
            return Err(CudexError::IndexOutOfBounds {
                index,
                len: self.size,
            });
        }
        Ok(wrapped as usize)
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("dtype", &self.dtype)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("offset", &self.offset)
            .finish()
    }
}
