use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::field::Field;
use crate::media::{MediaType, PixFmtDescriptor, Rational};
use crate::vfs::Vfs;

/// Opaque reference to an engine-owned object. Zero is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u32);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Build variant of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// The fast build.
    Accelerated,
    /// The portable, non-accelerated build.
    Degraded,
}

/// What a factory is able to produce on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub accelerated: bool,
    pub degraded: bool,
    /// The accelerated build can run its own worker threads.
    pub threaded: bool,
}

/// Options passed to [`EngineFactory::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub variant: Variant,
    /// Internal worker threads the engine may own. `1` means none.
    pub threads: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            variant: Variant::Accelerated,
            threads: 1,
        }
    }
}

/// Produces engine instances bound to a filesystem.
pub trait EngineFactory: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn create(&self, options: &EngineOptions, vfs: Arc<dyn Vfs>) -> Result<Box<dyn Engine>>;
}

/// Endpoint description for a filter graph input or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPad {
    pub media_type: MediaType,
    pub time_base: Rational,
    #[serde(default)]
    pub sample_rate: i32,
    #[serde(default)]
    pub sample_fmt: i32,
    #[serde(default)]
    pub channel_layout: u64,
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub pix_fmt: i32,
}

/// A configured filter graph and its endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    pub graph: Handle,
    pub sources: Vec<Handle>,
    pub sinks: Vec<Handle>,
}

/// Raw primitive surface of the engine.
///
/// The engine is non-reentrant: every method takes the instance exclusively
/// (or shared, for pure reads) and must not be entered again while running.
/// Status-returning methods use raw engine codes (see [`crate::codes`]).
pub trait Engine: Send {
    fn variant(&self) -> Variant;

    // Frames.
    fn frame_alloc(&mut self) -> Handle;
    fn frame_free(&mut self, frame: Handle);
    fn frame_unref(&mut self, frame: Handle);
    fn frame_ref(&mut self, dst: Handle, src: Handle) -> i32;
    fn frame_clone(&mut self, src: Handle) -> Handle;
    /// Allocate plane storage for the format/size fields already set.
    fn frame_get_buffer(&mut self, frame: Handle, align: i32) -> i32;
    fn frame_make_writable(&mut self, frame: Handle) -> i32;
    fn frame_plane_count(&self, frame: Handle) -> usize;
    fn frame_linesize(&self, frame: Handle, plane: usize) -> i32;
    fn frame_data(&self, frame: Handle, plane: usize) -> Option<&[u8]>;
    fn frame_data_mut(&mut self, frame: Handle, plane: usize) -> Option<&mut [u8]>;

    // Packets.
    fn packet_alloc(&mut self) -> Handle;
    fn packet_free(&mut self, packet: Handle);
    fn packet_unref(&mut self, packet: Handle);
    fn packet_ref(&mut self, dst: Handle, src: Handle) -> i32;
    fn packet_clone(&mut self, src: Handle) -> Handle;
    fn packet_data(&self, packet: Handle) -> Option<&[u8]>;
    fn packet_set_data(&mut self, packet: Handle, data: &[u8]) -> i32;
    fn packet_side_data_count(&self, packet: Handle) -> usize;
    fn packet_side_data(&self, packet: Handle, index: usize) -> Option<(i32, &[u8])>;
    fn packet_add_side_data(&mut self, packet: Handle, kind: i32, data: &[u8]) -> i32;

    // Field access.
    fn get(&self, handle: Handle, field: Field) -> i64;
    fn set(&mut self, handle: Handle, field: Field, value: i64);

    fn pix_fmt_descriptor(&self, format: i32) -> Option<PixFmtDescriptor>;

    // Codecs.
    fn find_encoder_by_name(&self, name: &str) -> Handle;
    fn find_decoder_by_name(&self, name: &str) -> Handle;
    fn find_decoder(&self, codec_id: i32) -> Handle;
    fn codec_name(&self, codec: Handle) -> Option<&str>;
    fn codec_context_alloc(&mut self, codec: Handle) -> Handle;
    fn codec_context_free(&mut self, ctx: Handle);
    fn codec_open(&mut self, ctx: Handle, codec: Handle, options: &[(String, String)]) -> i32;
    fn send_frame(&mut self, ctx: Handle, frame: Option<Handle>) -> i32;
    fn receive_packet(&mut self, ctx: Handle, packet: Handle) -> i32;
    fn send_packet(&mut self, ctx: Handle, packet: Option<Handle>) -> i32;
    fn receive_frame(&mut self, ctx: Handle, frame: Handle) -> i32;

    // Codec parameters.
    fn codecpar_alloc(&mut self) -> Handle;
    fn codecpar_free(&mut self, par: Handle);
    fn codecpar_from_context(&mut self, par: Handle, ctx: Handle) -> i32;
    fn codecpar_to_context(&mut self, ctx: Handle, par: Handle) -> i32;
    fn codecpar_copy(&mut self, dst: Handle, src: Handle) -> i32;
    fn codecpar_extradata(&self, par: Handle) -> Option<&[u8]>;
    fn codecpar_set_extradata(&mut self, par: Handle, data: Option<&[u8]>) -> i32;

    // Containers.
    fn output_context_alloc(&mut self, format_name: Option<&str>, filename: &str)
        -> std::result::Result<Handle, i32>;
    fn format_name(&self, ctx: Handle) -> Option<&str>;
    fn new_stream(&mut self, oc: Handle) -> Handle;
    fn stream(&self, ctx: Handle, index: usize) -> Handle;
    fn io_open(&mut self, oc: Handle, filename: &str) -> i32;
    fn io_close(&mut self, oc: Handle) -> i32;
    fn write_header(&mut self, oc: Handle) -> i32;
    fn write_frame(&mut self, oc: Handle, packet: Handle, interleaved: bool) -> i32;
    fn write_trailer(&mut self, oc: Handle) -> i32;
    fn format_context_free(&mut self, ctx: Handle);
    fn open_input(&mut self, filename: &str, format_name: Option<&str>)
        -> std::result::Result<Handle, i32>;
    fn find_stream_info(&mut self, ic: Handle) -> i32;
    fn read_frame(&mut self, ic: Handle, packet: Handle) -> i32;
    fn close_input(&mut self, ic: Handle);

    // Filters.
    fn filter_graph_create(
        &mut self,
        description: &str,
        inputs: &[FilterPad],
        outputs: &[FilterPad],
    ) -> std::result::Result<FilterGraph, i32>;
    fn buffersrc_add_frame(&mut self, src: Handle, frame: Option<Handle>) -> i32;
    fn buffersink_get_frame(&mut self, sink: Handle, frame: Handle) -> i32;
    fn filter_graph_free(&mut self, graph: Handle);

    // Bitstream filters.
    fn bsf_create(&mut self, name: &str, par_in: Option<Handle>) -> std::result::Result<Handle, i32>;
    fn bsf_send_packet(&mut self, bsf: Handle, packet: Option<Handle>) -> i32;
    fn bsf_receive_packet(&mut self, bsf: Handle, packet: Handle) -> i32;
    fn bsf_free(&mut self, bsf: Handle);
}
