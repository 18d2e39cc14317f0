// Camera domain: sensor access, buffer ring, and session lifecycle.

pub mod api;
pub mod error;
pub mod mock;
pub mod pool;
pub mod session;
pub mod types;
#[cfg(feature = "ueye")]
pub mod ueye;
