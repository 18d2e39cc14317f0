//! Raw uEye API declarations.
//!
//! Only compiled when the `ueye` feature is enabled and `libueye_api` is
//! available for linking. All access goes through the safe `UeyeSdk`
//! wrapper.

#![allow(non_snake_case, non_camel_case_types)]

use std::ffi::{c_char, c_void};

pub type HIDS = u32;
pub type INT = i32;
pub type UINT = u32;

pub const IS_SUCCESS: INT = 0;
pub const IS_TIMED_OUT: INT = 122;

pub const IS_USE_DEVICE_ID: HIDS = 0x8000;
pub const IS_GET_COLOR_MODE: INT = 0x8000;
pub const IS_CM_MONO8: INT = 6;

pub const IS_AOI_IMAGE_GET_AOI: UINT = 0x0002;

pub const IS_DONT_WAIT: INT = 0;
pub const IS_WAIT: INT = 1;
pub const IS_IGNORE_PARAMETER: INT = -1;

pub const IS_SET_EVENT_FRAME: INT = 2;

/// Rectangle used by `is_AOI`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct IS_RECT {
    pub s32X: INT,
    pub s32Y: INT,
    pub s32Width: INT,
    pub s32Height: INT,
}

#[link(name = "ueye_api")]
extern "C" {
    /// Claim a camera. `phCam` carries the device id in, the handle out.
    pub fn is_InitCamera(phCam: *mut HIDS, hWnd: *mut c_void) -> INT;

    /// Release a camera and every image memory allocated on it.
    pub fn is_ExitCamera(hCam: HIDS) -> INT;

    /// Set the colour mode, or query it with `IS_GET_COLOR_MODE`.
    pub fn is_SetColorMode(hCam: HIDS, Mode: INT) -> INT;

    pub fn is_AOI(hCam: HIDS, nCommand: UINT, pParam: *mut c_void, SizeOfParam: UINT) -> INT;

    pub fn is_AllocImageMem(
        hCam: HIDS,
        width: INT,
        height: INT,
        bitspixel: INT,
        ppcImgMem: *mut *mut c_char,
        pid: *mut INT,
    ) -> INT;

    pub fn is_FreeImageMem(hCam: HIDS, pcMem: *mut c_char, id: INT) -> INT;

    pub fn is_InquireImageMem(
        hCam: HIDS,
        pcMem: *mut c_char,
        nID: INT,
        pnX: *mut INT,
        pnY: *mut INT,
        pnBits: *mut INT,
        pnPitch: *mut INT,
    ) -> INT;

    pub fn is_AddToSequence(hCam: HIDS, pcMem: *mut c_char, nID: INT) -> INT;

    pub fn is_ClearSequence(hCam: HIDS) -> INT;

    /// Report the buffer being written and the last one completed.
    pub fn is_GetActSeqBuf(
        hCam: HIDS,
        pnNum: *mut INT,
        ppcMem: *mut *mut c_char,
        ppcMemLast: *mut *mut c_char,
    ) -> INT;

    pub fn is_LockSeqBuf(hCam: HIDS, nNum: INT, pcMem: *mut c_char) -> INT;

    pub fn is_UnlockSeqBuf(hCam: HIDS, nNum: INT, pcMem: *mut c_char) -> INT;

    pub fn is_CaptureVideo(hCam: HIDS, Wait: INT) -> INT;

    pub fn is_StopLiveVideo(hCam: HIDS, Wait: INT) -> INT;

    pub fn is_EnableEvent(hCam: HIDS, which: INT) -> INT;

    pub fn is_DisableEvent(hCam: HIDS, which: INT) -> INT;

    /// Block until `which` is signalled or `nTimeout` milliseconds pass.
    pub fn is_WaitEvent(hCam: HIDS, which: INT, nTimeout: INT) -> INT;
}
