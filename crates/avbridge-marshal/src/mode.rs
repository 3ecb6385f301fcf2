use std::str::FromStr;

use avbridge_engine::Handle;
use serde::{Deserialize, Serialize};

use crate::error::MarshalError;
use crate::frame::Frame;
use crate::packet::Packet;

/// A native engine handle passed by reference instead of by copy.
///
/// Not `Clone`: handing one to copy-in consumes it, and the engine-side
/// object it named is freed once its contents are re-wrapped.
#[derive(Debug, PartialEq, Eq)]
pub struct NativeRef(Handle);

impl NativeRef {
    pub fn new(handle: Handle) -> Self {
        Self(handle)
    }

    pub fn handle(&self) -> Handle {
        self.0
    }

    pub fn into_handle(self) -> Handle {
        self.0
    }
}

/// Frame input to copy-in: an owned host record or a native reference.
#[derive(Debug)]
pub enum FrameRef {
    Owned(Frame),
    Native(NativeRef),
}

/// Packet input to copy-in: an owned host record or a native reference.
#[derive(Debug)]
pub enum PacketRef {
    Owned(Packet),
    Native(NativeRef),
}

impl From<Frame> for FrameRef {
    fn from(frame: Frame) -> Self {
        Self::Owned(frame)
    }
}

impl From<Packet> for PacketRef {
    fn from(packet: Packet) -> Self {
        Self::Owned(packet)
    }
}

/// How frames leave the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameCopyout {
    /// Audio as planar/packed buffers, video with an explicit plane layout.
    #[default]
    #[serde(rename = "default")]
    Default,
    /// Video with an explicit plane layout.
    #[serde(rename = "video")]
    Video,
    /// Video de-interleaved into tightly packed planes.
    #[serde(rename = "video_packed")]
    VideoPacked,
    /// Video as an RGBA pixel buffer.
    #[serde(rename = "ImageData")]
    ImageData,
    /// A new native reference; no host copy.
    #[serde(rename = "ptr")]
    Ptr,
}

/// How packets leave the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PacketCopyout {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "ptr")]
    Ptr,
}

impl FromStr for FrameCopyout {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "video" => Ok(Self::Video),
            "video_packed" => Ok(Self::VideoPacked),
            "ImageData" => Ok(Self::ImageData),
            "ptr" => Ok(Self::Ptr),
            _ => Err(MarshalError::Type {
                expected: "frame copy-out mode",
                found: "unknown mode name",
            }),
        }
    }
}

impl FromStr for PacketCopyout {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "ptr" => Ok(Self::Ptr),
            _ => Err(MarshalError::Type {
                expected: "packet copy-out mode",
                found: "unknown mode name",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_parse() {
        assert_eq!("video_packed".parse::<FrameCopyout>().unwrap(), FrameCopyout::VideoPacked);
        assert_eq!("ptr".parse::<PacketCopyout>().unwrap(), PacketCopyout::Ptr);
        assert!("bogus".parse::<FrameCopyout>().is_err());
    }
}
