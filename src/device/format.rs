//! Stream type, pixel format and resolution definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::format::fourcc;

/// Kind of data a sensor stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Depth,
    Color,
    Infrared,
    Gyro,
    Accel,
}

impl StreamType {
    /// Wire identifier, also used as the data channel label for the stream
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Depth => "depth",
            StreamType::Color => "color",
            StreamType::Infrared => "infrared",
            StreamType::Gyro => "gyro",
            StreamType::Accel => "accel",
        }
    }

    /// Numeric tag used in the binary frame header
    pub fn tag(&self) -> u8 {
        match self {
            StreamType::Depth => 1,
            StreamType::Color => 2,
            StreamType::Infrared => 3,
            StreamType::Gyro => 4,
            StreamType::Accel => 5,
        }
    }

    pub fn all() -> &'static [StreamType] {
        &[
            StreamType::Depth,
            StreamType::Color,
            StreamType::Infrared,
            StreamType::Gyro,
            StreamType::Accel,
        ]
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "depth" => Ok(StreamType::Depth),
            "color" | "rgb" => Ok(StreamType::Color),
            "infrared" | "ir" => Ok(StreamType::Infrared),
            "gyro" => Ok(StreamType::Gyro),
            "accel" => Ok(StreamType::Accel),
            _ => Err(format!("Unknown stream type: {}", s)),
        }
    }
}

/// Pixel formats produced by RealSense-class sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamFormat {
    /// 16-bit linear depth
    Z16,
    /// 8-bit luminance (infrared)
    Y8,
    /// 16-bit luminance (calibration infrared)
    Y16,
    /// 24-bit RGB
    Rgb8,
    /// 24-bit BGR
    Bgr8,
    /// 32-bit RGBA
    Rgba8,
    /// 32-bit BGRA
    Bgra8,
    /// YUYV 4:2:2 packed
    Yuyv,
    /// UYVY 4:2:2 packed
    Uyvy,
    /// Motion-JPEG compressed
    Mjpeg,
    /// Three 32-bit floats per sample (motion sensors)
    MotionXyz32f,
}

impl StreamFormat {
    /// Convert to V4L2 FourCC
    ///
    /// Returns None for formats that only exist on the HID motion interface.
    pub fn to_fourcc(&self) -> Option<fourcc::FourCC> {
        let code: &[u8; 4] = match self {
            StreamFormat::Z16 => b"Z16 ",
            StreamFormat::Y8 => b"GREY",
            StreamFormat::Y16 => b"Y16 ",
            StreamFormat::Rgb8 => b"RGB3",
            StreamFormat::Bgr8 => b"BGR3",
            StreamFormat::Rgba8 => b"AB24",
            StreamFormat::Bgra8 => b"AR24",
            StreamFormat::Yuyv => b"YUYV",
            StreamFormat::Uyvy => b"UYVY",
            StreamFormat::Mjpeg => b"MJPG",
            StreamFormat::MotionXyz32f => return None,
        };
        Some(fourcc::FourCC::new(code))
    }

    /// Try to convert from V4L2 FourCC
    pub fn from_fourcc(fourcc: fourcc::FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"Z16 " => Some(StreamFormat::Z16),
            b"GREY" | b"Y8  " => Some(StreamFormat::Y8),
            b"Y16 " => Some(StreamFormat::Y16),
            b"RGB3" => Some(StreamFormat::Rgb8),
            b"BGR3" => Some(StreamFormat::Bgr8),
            b"AB24" => Some(StreamFormat::Rgba8),
            b"AR24" => Some(StreamFormat::Bgra8),
            b"YUYV" => Some(StreamFormat::Yuyv),
            b"UYVY" => Some(StreamFormat::Uyvy),
            b"MJPG" => Some(StreamFormat::Mjpeg),
            _ => None,
        }
    }

    /// Numeric tag used in the binary frame header
    pub fn tag(&self) -> u8 {
        match self {
            StreamFormat::Z16 => 1,
            StreamFormat::Y8 => 2,
            StreamFormat::Y16 => 3,
            StreamFormat::Rgb8 => 4,
            StreamFormat::Bgr8 => 5,
            StreamFormat::Rgba8 => 6,
            StreamFormat::Bgra8 => 7,
            StreamFormat::Yuyv => 8,
            StreamFormat::Uyvy => 9,
            StreamFormat::Mjpeg => 10,
            StreamFormat::MotionXyz32f => 11,
        }
    }

    /// Stream type a format naturally belongs to
    pub fn natural_stream_type(&self) -> StreamType {
        match self {
            StreamFormat::Z16 => StreamType::Depth,
            StreamFormat::Y8 | StreamFormat::Y16 => StreamType::Infrared,
            StreamFormat::MotionXyz32f => StreamType::Gyro,
            _ => StreamType::Color,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, StreamFormat::Mjpeg)
    }

    /// Get bytes per pixel for uncompressed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            StreamFormat::Mjpeg | StreamFormat::MotionXyz32f => None,
            StreamFormat::Y8 => Some(1),
            StreamFormat::Z16 | StreamFormat::Y16 | StreamFormat::Yuyv | StreamFormat::Uyvy => {
                Some(2)
            }
            StreamFormat::Rgb8 | StreamFormat::Bgr8 => Some(3),
            StreamFormat::Rgba8 | StreamFormat::Bgra8 => Some(4),
        }
    }

    /// Calculate expected frame size for a given resolution
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        self.bytes_per_pixel()
            .map(|bpp| resolution.pixels() as usize * bpp)
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamFormat::Z16 => "Z16",
            StreamFormat::Y8 => "Y8",
            StreamFormat::Y16 => "Y16",
            StreamFormat::Rgb8 => "RGB8",
            StreamFormat::Bgr8 => "BGR8",
            StreamFormat::Rgba8 => "RGBA8",
            StreamFormat::Bgra8 => "BGRA8",
            StreamFormat::Yuyv => "YUYV",
            StreamFormat::Uyvy => "UYVY",
            StreamFormat::Mjpeg => "MJPEG",
            StreamFormat::MotionXyz32f => "MOTION_XYZ32F",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "Z16" => Ok(StreamFormat::Z16),
            "Y8" | "GREY" | "GRAY" => Ok(StreamFormat::Y8),
            "Y16" => Ok(StreamFormat::Y16),
            "RGB8" | "RGB24" => Ok(StreamFormat::Rgb8),
            "BGR8" | "BGR24" => Ok(StreamFormat::Bgr8),
            "RGBA8" => Ok(StreamFormat::Rgba8),
            "BGRA8" => Ok(StreamFormat::Bgra8),
            "YUYV" => Ok(StreamFormat::Yuyv),
            "UYVY" => Ok(StreamFormat::Uyvy),
            "MJPEG" | "MJPG" => Ok(StreamFormat::Mjpeg),
            "MOTION_XYZ32F" | "MOTIONXYZ32F" => Ok(StreamFormat::MotionXyz32f),
            _ => Err(format!("Unknown stream format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const WVGA: Resolution = Resolution {
        width: 848,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        let fourcc = StreamFormat::Z16.to_fourcc().unwrap();
        assert_eq!(StreamFormat::from_fourcc(fourcc), Some(StreamFormat::Z16));
        assert_eq!(
            StreamFormat::from_fourcc(fourcc::FourCC::new(b"GREY")),
            Some(StreamFormat::Y8)
        );
        assert!(StreamFormat::MotionXyz32f.to_fourcc().is_none());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("z16".parse::<StreamFormat>(), Ok(StreamFormat::Z16));
        assert_eq!("rgb8".parse::<StreamFormat>(), Ok(StreamFormat::Rgb8));
        assert!("H264".parse::<StreamFormat>().is_err());
    }

    #[test]
    fn test_format_serde_matches_display() {
        let json = serde_json::to_string(&StreamFormat::Z16).unwrap();
        assert_eq!(json, "\"Z16\"");
        let ty: StreamType = serde_json::from_str("\"depth\"").unwrap();
        assert_eq!(ty, StreamType::Depth);
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(
            StreamFormat::Z16.frame_size(Resolution::VGA),
            Some(640 * 480 * 2)
        );
        assert_eq!(StreamFormat::Mjpeg.frame_size(Resolution::VGA), None);
    }
}
