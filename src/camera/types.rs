use serde::Serialize;
use std::fmt;

/// Number of image buffers registered with the device as its capture ring.
pub const BUFFER_COUNT: usize = 3;

/// Opaque sensor handle issued by a `SensorApi` implementation.
///
/// For the uEye SDK this wraps the camera's `HIDS`; for the mock it is the
/// device index the handle was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorHandle(pub u32);

/// Stable integer identity of one image buffer, assigned by the driver at
/// allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferId(pub i32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pixel formats the pipeline knows about. Only `Mono8` is ever configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    Mono8,
}

impl PixelFormat {
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Mono8 => 8,
        }
    }

    /// Bytes per image row, rounded up to whole bytes.
    pub fn stride(self, width: u32) -> u32 {
        (width * self.bits_per_pixel()).div_ceil(8)
    }
}

/// Area of interest reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Aoi {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Per-buffer capture information reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Bytes per row in device memory, including any row padding.
    pub stride: u32,
}

/// Geometry and format a session settled on after reading them back from
/// the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl SensorGeometry {
    pub fn bits_per_pixel(&self) -> u32 {
        self.pixel_format.bits_per_pixel()
    }

    pub fn stride(&self) -> u32 {
        self.pixel_format.stride(self.width)
    }

    /// Size in bytes of one full frame.
    pub fn frame_len(&self) -> usize {
        self.stride() as usize * self.height as usize
    }
}

/// Lifecycle of a `CameraSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uninitialized,
    Configured,
    Capturing,
    Stopped,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Configured => "configured",
            Self::Capturing => "capturing",
            Self::Stopped => "stopped",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono8_stride_is_width() {
        assert_eq!(PixelFormat::Mono8.stride(640), 640);
        assert_eq!(PixelFormat::Mono8.bits_per_pixel(), 8);
    }

    #[test]
    fn geometry_frame_len() {
        let geometry = SensorGeometry {
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Mono8,
        };
        assert_eq!(geometry.frame_len(), 307_200);
    }

    #[test]
    fn buffer_id_display_format() {
        assert_eq!(BufferId(7).to_string(), "#7");
    }

    #[test]
    fn geometry_serialises_to_camelcase() {
        let geometry = SensorGeometry {
            width: 16,
            height: 8,
            pixel_format: PixelFormat::Mono8,
        };
        let json = serde_json::to_value(geometry).unwrap();
        assert_eq!(json["width"], 16);
        assert_eq!(json["pixelFormat"], "Mono8");
    }
}
