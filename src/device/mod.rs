mod adapter;
#[cfg(feature = "cuda")]
mod cuda;
mod host;

pub use adapter::{DeviceAdapter, IpcMemHandle, OpenedHandle, CUDA_IPC_HANDLE_SIZE};
#[cfg(feature = "cuda")]
pub use cuda::CudaAdapter;
pub use host::HostAdapter;
