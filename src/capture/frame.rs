//! Captured frame and its wire chunking

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Instant;

use crate::device::{Resolution, StreamFormat, StreamType};

/// Wire header version
pub const FRAME_HEADER_VERSION: u8 = 1;
/// Size of the header prepended to every chunk
pub const FRAME_HEADER_LEN: usize = 24;
/// Default payload size per chunk (fits common SCTP message limits)
pub const DEFAULT_CHUNK_PAYLOAD: usize = 16 * 1024 - FRAME_HEADER_LEN;

/// What a frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Image data from one stream
    Video,
    /// Packed little-endian f32 xyz triples
    PointCloud,
}

impl FrameKind {
    fn tag(&self) -> u8 {
        match self {
            FrameKind::Video => 1,
            FrameKind::PointCloud => 2,
        }
    }
}

/// A frame produced by a capture pipeline
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    pub stream_type: StreamType,
    pub format: StreamFormat,
    /// For point clouds: point count x 1
    pub resolution: Resolution,
    pub sequence: u64,
    pub capture_ts: Instant,
    pub kind: FrameKind,
}

impl Frame {
    pub fn new(
        data: Bytes,
        stream_type: StreamType,
        format: StreamFormat,
        resolution: Resolution,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            stream_type,
            format,
            resolution,
            sequence,
            capture_ts: Instant::now(),
            kind: FrameKind::Video,
        }
    }

    /// Create a point cloud frame from xyz triples
    pub fn point_cloud(points: &[[f32; 3]], sequence: u64) -> Self {
        let mut buf = BytesMut::with_capacity(points.len() * 12);
        for p in points {
            buf.put_f32_le(p[0]);
            buf.put_f32_le(p[1]);
            buf.put_f32_le(p[2]);
        }
        Self {
            data: buf.freeze(),
            stream_type: StreamType::Depth,
            format: StreamFormat::Z16,
            resolution: Resolution::new(points.len() as u32, 1),
            sequence,
            capture_ts: Instant::now(),
            kind: FrameKind::PointCloud,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_point_cloud(&self) -> bool {
        self.kind == FrameKind::PointCloud
    }

    /// Data channel label frames of this kind are sent on
    pub fn channel_label(&self) -> &'static str {
        match self.kind {
            FrameKind::PointCloud => "pointcloud",
            FrameKind::Video => self.stream_type.as_str(),
        }
    }

    /// Split the frame into header-prefixed chunks of at most
    /// `max_payload` data bytes each.
    ///
    /// Header layout (little-endian):
    /// `version u8 | kind u8 | stream u8 | format u8 | sequence u32 |
    ///  chunk_index u16 | chunk_count u16 | width u32 | height u32 | total_len u32`
    pub fn chunks(&self, max_payload: usize) -> Vec<Bytes> {
        let total = self.data.len();
        // chunk_count is a u16
        let min_payload = total.div_ceil(u16::MAX as usize).max(1);
        let payload = max_payload.max(min_payload);
        let count = total.div_ceil(payload).max(1);

        let mut out = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * payload;
            let end = (start + payload).min(total);
            let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + end - start);
            buf.put_u8(FRAME_HEADER_VERSION);
            buf.put_u8(self.kind.tag());
            buf.put_u8(self.stream_type.tag());
            buf.put_u8(self.format.tag());
            buf.put_u32_le(self.sequence as u32);
            buf.put_u16_le(index as u16);
            buf.put_u16_le(count as u16);
            buf.put_u32_le(self.resolution.width);
            buf.put_u32_le(self.resolution.height);
            buf.put_u32_le(total as u32);
            buf.extend_from_slice(&self.data[start..end]);
            out.push(buf.freeze());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_header_layout() {
        let frame = Frame::new(
            Bytes::from(vec![7u8; 10]),
            StreamType::Depth,
            StreamFormat::Z16,
            Resolution::new(5, 1),
            42,
        );
        let chunks = frame.chunks(4);
        assert_eq!(chunks.len(), 3);

        let first = &chunks[0];
        assert_eq!(first.len(), FRAME_HEADER_LEN + 4);
        assert_eq!(first[0], FRAME_HEADER_VERSION);
        assert_eq!(first[1], 1);
        assert_eq!(first[2], StreamType::Depth.tag());
        assert_eq!(u32::from_le_bytes(first[4..8].try_into().unwrap()), 42);
        assert_eq!(u16::from_le_bytes(first[10..12].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(first[12..16].try_into().unwrap()), 5);
        assert_eq!(u32::from_le_bytes(first[20..24].try_into().unwrap()), 10);

        let last = &chunks[2];
        assert_eq!(u16::from_le_bytes(last[8..10].try_into().unwrap()), 2);
        assert_eq!(last.len(), FRAME_HEADER_LEN + 2);
    }

    #[test]
    fn test_empty_frame_still_has_one_chunk() {
        let frame = Frame::new(
            Bytes::new(),
            StreamType::Color,
            StreamFormat::Rgb8,
            Resolution::VGA,
            0,
        );
        let chunks = frame.chunks(DEFAULT_CHUNK_PAYLOAD);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), FRAME_HEADER_LEN);
    }

    #[test]
    fn test_point_cloud_frame() {
        let frame = Frame::point_cloud(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], 1);
        assert!(frame.is_point_cloud());
        assert_eq!(frame.len(), 24);
        assert_eq!(frame.channel_label(), "pointcloud");
        assert_eq!(frame.resolution.width, 2);
        assert_eq!(f32::from_le_bytes(frame.data()[12..16].try_into().unwrap()), 4.0);
    }
}
