//! IDS uEye sensor backend.
//!
//! The FFI and its safe wrapper are behind `#[cfg(feature = "ueye")]`;
//! everything else in the crate is tested against `MockSensor`.

pub mod ffi;
pub mod sdk;

pub use sdk::UeyeSdk;
