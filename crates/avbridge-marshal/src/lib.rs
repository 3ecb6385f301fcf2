//! Conversion between engine-owned media objects and host-native records.
//!
//! Copy-out turns an engine frame, packet or codec-parameter handle into an
//! owned record whose bulk data lives in [`Buffer`]s marked transferable.
//! Copy-in is the inverse. Both directions also accept a native handle
//! ([`NativeRef`]) so chained operations can skip the copy; copy-in consumes
//! such a handle and re-wraps it into the destination.

pub mod buffer;
pub mod codecpar;
pub mod error;
pub mod frame;
pub mod mode;
pub mod packet;
pub mod value;

pub use buffer::Buffer;
pub use codecpar::{copyin_codecpar, copyout_codecpar, CodecParameters};
pub use error::{MarshalError, Result};
pub use frame::{
    copyin_frame, copyout_frame, copyout_frame_as, copyout_frame_image, copyout_frame_ptr,
    copyout_frame_video, copyout_frame_video_packed, frame_video_packed_size, AudioData,
    AudioFrame, Crop, Frame, FrameData, ImageBuffer, Picture, PlaneLayout, VideoFrame,
};
pub use mode::{FrameCopyout, FrameRef, NativeRef, PacketCopyout, PacketRef};
pub use packet::{
    copyin_packet, copyout_packet, copyout_packet_as, copyout_packet_ptr, Packet, SideData,
};
pub use value::Value;
