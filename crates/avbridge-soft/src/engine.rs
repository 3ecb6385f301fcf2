use std::sync::Arc;

use avbridge_engine::codes::{averror, EINVAL};
use avbridge_engine::{
    Engine, Errno, Fd, Field, FilterGraph, FilterPad, Handle, OpenFlags, PixFmtDescriptor,
    Variant, Vfs, Whence,
};

use crate::codec::{self, RESERVED_HANDLES};
use crate::container::{self, FORMAT_NAME};
use crate::filter;
use crate::objects::{
    CodecCtx, Fields, FrameObj, Heap, Object, PacketObj, ParObj,
};

/// Fields shared between codec contexts and codec parameters.
const PAR_CTX: &[(Field, Field)] = &[
    (Field::ParCodecType, Field::CtxCodecType),
    (Field::ParCodecId, Field::CtxCodecId),
    (Field::ParBitRate, Field::CtxBitRate),
    (Field::ParWidth, Field::CtxWidth),
    (Field::ParHeight, Field::CtxHeight),
    (Field::ParChannels, Field::CtxChannels),
    (Field::ParChannelLayout, Field::CtxChannelLayout),
    (Field::ParSampleRate, Field::CtxSampleRate),
    (Field::ParFrameSize, Field::CtxFrameSize),
];

/// Filesystem with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFs;

impl Vfs for EmptyFs {
    fn open(&self, _path: &str, _flags: OpenFlags) -> Result<Fd, Errno> {
        Err(Errno::ENOENT)
    }

    fn close(&self, _fd: Fd) -> Result<(), Errno> {
        Err(Errno::EINVAL)
    }

    fn read(&self, _fd: Fd, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::EINVAL)
    }

    fn write(&self, _fd: Fd, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::EINVAL)
    }

    fn seek(&self, _fd: Fd, _offset: i64, _whence: Whence) -> Result<u64, Errno> {
        Err(Errno::EINVAL)
    }

    fn size(&self, _fd: Fd) -> Result<Option<u64>, Errno> {
        Err(Errno::EINVAL)
    }
}

/// In-memory engine instance.
pub struct SoftEngine {
    variant: Variant,
    vfs: Arc<dyn Vfs>,
    heap: Heap,
}

impl SoftEngine {
    pub fn new(vfs: Arc<dyn Vfs>) -> Self {
        Self::with_variant(Variant::Accelerated, vfs)
    }

    pub fn with_variant(variant: Variant, vfs: Arc<dyn Vfs>) -> Self {
        Self {
            variant,
            vfs,
            heap: Heap::with_reserved(RESERVED_HANDLES),
        }
    }

    /// An engine whose filesystem is empty. Useful when only codecs and
    /// filters are exercised.
    pub fn without_files() -> Self {
        Self::new(Arc::new(EmptyFs))
    }

    /// `true` while `handle` names an object that has not been freed.
    pub fn is_live(&self, handle: Handle) -> bool {
        self.heap.contains(handle)
    }

    /// Number of objects currently allocated.
    pub fn live_objects(&self) -> usize {
        self.heap.len()
    }

    fn fields(&self, handle: Handle) -> Option<&Fields> {
        match self.heap.get(handle)? {
            Object::Frame(f) => Some(&f.fields),
            Object::Packet(p) => Some(&p.fields),
            Object::CodecCtx(c) => Some(&c.fields),
            Object::CodecPar(p) => Some(&p.fields),
            Object::Stream(s) => Some(&s.fields),
            _ => None,
        }
    }

    fn fields_mut(&mut self, handle: Handle) -> Option<&mut Fields> {
        match self.heap.get_mut(handle)? {
            Object::Frame(f) => Some(&mut f.fields),
            Object::Packet(p) => Some(&mut p.fields),
            Object::CodecCtx(c) => Some(&mut c.fields),
            Object::CodecPar(p) => Some(&mut p.fields),
            Object::Stream(s) => Some(&mut s.fields),
            _ => None,
        }
    }

    fn streams(&self, ctx: Handle) -> Option<&[Handle]> {
        match self.heap.get(ctx)? {
            Object::Output(o) => Some(&o.streams),
            Object::Input(i) => Some(&i.streams),
            _ => None,
        }
    }
}

impl std::fmt::Debug for SoftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftEngine")
            .field("variant", &self.variant)
            .field("live_objects", &self.heap.len())
            .finish()
    }
}

impl Engine for SoftEngine {
    fn variant(&self) -> Variant {
        self.variant
    }

    fn frame_alloc(&mut self) -> Handle {
        self.heap.insert(Object::Frame(FrameObj::default()))
    }

    fn frame_free(&mut self, frame: Handle) {
        if self.heap.frame(frame).is_some() {
            self.heap.remove(frame);
        }
    }

    fn frame_unref(&mut self, frame: Handle) {
        if let Some(f) = self.heap.frame_mut(frame) {
            *f = FrameObj::default();
        }
    }

    fn frame_ref(&mut self, dst: Handle, src: Handle) -> i32 {
        let Some(copy) = self.heap.frame(src).cloned() else {
            return averror(EINVAL);
        };
        match self.heap.frame_mut(dst) {
            Some(f) => {
                *f = copy;
                0
            }
            None => averror(EINVAL),
        }
    }

    fn frame_clone(&mut self, src: Handle) -> Handle {
        match self.heap.frame(src).cloned() {
            Some(copy) => self.heap.insert(Object::Frame(copy)),
            None => Handle::NULL,
        }
    }

    fn frame_get_buffer(&mut self, frame: Handle, align: i32) -> i32 {
        match self.heap.frame_mut(frame) {
            Some(f) => codec::alloc_planes(f, align),
            None => averror(EINVAL),
        }
    }

    fn frame_make_writable(&mut self, frame: Handle) -> i32 {
        match self.heap.frame_mut(frame) {
            Some(f) => {
                for plane in &mut f.planes {
                    Arc::make_mut(&mut plane.data);
                }
                0
            }
            None => averror(EINVAL),
        }
    }

    fn frame_plane_count(&self, frame: Handle) -> usize {
        self.heap.frame(frame).map_or(0, |f| f.planes.len())
    }

    fn frame_linesize(&self, frame: Handle, plane: usize) -> i32 {
        self.heap
            .frame(frame)
            .and_then(|f| f.planes.get(plane))
            .map_or(0, |p| p.linesize as i32)
    }

    fn frame_data(&self, frame: Handle, plane: usize) -> Option<&[u8]> {
        self.heap
            .frame(frame)?
            .planes
            .get(plane)
            .map(|p| p.data.as_slice())
    }

    fn frame_data_mut(&mut self, frame: Handle, plane: usize) -> Option<&mut [u8]> {
        let plane = self.heap.frame_mut(frame)?.planes.get_mut(plane)?;
        Some(Arc::make_mut(&mut plane.data).as_mut_slice())
    }

    fn packet_alloc(&mut self) -> Handle {
        self.heap.insert(Object::Packet(PacketObj::default()))
    }

    fn packet_free(&mut self, packet: Handle) {
        if self.heap.packet(packet).is_some() {
            self.heap.remove(packet);
        }
    }

    fn packet_unref(&mut self, packet: Handle) {
        if let Some(p) = self.heap.packet_mut(packet) {
            *p = PacketObj::default();
        }
    }

    fn packet_ref(&mut self, dst: Handle, src: Handle) -> i32 {
        let Some(copy) = self.heap.packet(src).cloned() else {
            return averror(EINVAL);
        };
        match self.heap.packet_mut(dst) {
            Some(p) => {
                *p = copy;
                0
            }
            None => averror(EINVAL),
        }
    }

    fn packet_clone(&mut self, src: Handle) -> Handle {
        match self.heap.packet(src).cloned() {
            Some(copy) => self.heap.insert(Object::Packet(copy)),
            None => Handle::NULL,
        }
    }

    fn packet_data(&self, packet: Handle) -> Option<&[u8]> {
        self.heap.packet(packet).map(|p| p.data.as_slice())
    }

    fn packet_set_data(&mut self, packet: Handle, data: &[u8]) -> i32 {
        match self.heap.packet_mut(packet) {
            Some(p) => {
                p.data = Arc::new(data.to_vec());
                p.fields.set(Field::PacketSize, data.len() as i64);
                0
            }
            None => averror(EINVAL),
        }
    }

    fn packet_side_data_count(&self, packet: Handle) -> usize {
        self.heap.packet(packet).map_or(0, |p| p.side_data.len())
    }

    fn packet_side_data(&self, packet: Handle, index: usize) -> Option<(i32, &[u8])> {
        self.heap
            .packet(packet)?
            .side_data
            .get(index)
            .map(|(kind, data)| (*kind, data.as_slice()))
    }

    fn packet_add_side_data(&mut self, packet: Handle, kind: i32, data: &[u8]) -> i32 {
        match self.heap.packet_mut(packet) {
            Some(p) => {
                p.side_data.push((kind, data.to_vec()));
                0
            }
            None => averror(EINVAL),
        }
    }

    fn get(&self, handle: Handle, field: Field) -> i64 {
        match field {
            Field::FmtNbStreams => return self.streams(handle).map_or(0, |s| s.len() as i64),
            Field::StreamCodecpar => {
                return self.heap.stream(handle).map_or(0, |s| s.codecpar.0 as i64)
            }
            Field::PacketSize => {
                return self.heap.packet(handle).map_or(0, |p| p.data.len() as i64)
            }
            _ => {}
        }
        self.fields(handle).map_or(0, |f| f.get(field))
    }

    fn set(&mut self, handle: Handle, field: Field, value: i64) {
        if matches!(
            field,
            Field::FmtNbStreams | Field::StreamCodecpar | Field::PacketSize
        ) {
            tracing::trace!(field = field.name(), "ignoring write to derived field");
            return;
        }
        if let Some(f) = self.fields_mut(handle) {
            f.set(field, value);
        }
    }

    fn pix_fmt_descriptor(&self, format: i32) -> Option<PixFmtDescriptor> {
        codec::descriptor(format)
    }

    fn find_encoder_by_name(&self, name: &str) -> Handle {
        codec::by_name(name, true)
    }

    fn find_decoder_by_name(&self, name: &str) -> Handle {
        codec::by_name(name, false)
    }

    fn find_decoder(&self, codec_id: i32) -> Handle {
        codec::by_id(codec_id, false)
    }

    fn codec_name(&self, codec: Handle) -> Option<&str> {
        codec::lookup(codec).map(|d| d.name)
    }

    fn codec_context_alloc(&mut self, codec: Handle) -> Handle {
        let desc = codec::lookup(codec);
        let mut ctx = CodecCtx {
            codec: desc,
            ..CodecCtx::default()
        };
        if let Some(d) = desc {
            ctx.fields.set(Field::CtxCodecId, d.id as i64);
            ctx.fields.set(Field::CtxCodecType, d.media as i64);
        }
        self.heap.insert(Object::CodecCtx(ctx))
    }

    fn codec_context_free(&mut self, ctx: Handle) {
        if self.heap.ctx(ctx).is_some() {
            self.heap.remove(ctx);
        }
    }

    fn codec_open(&mut self, ctx: Handle, codec: Handle, options: &[(String, String)]) -> i32 {
        codec::open(&mut self.heap, ctx, codec, options)
    }

    fn send_frame(&mut self, ctx: Handle, frame: Option<Handle>) -> i32 {
        codec::send_frame(&mut self.heap, ctx, frame)
    }

    fn receive_packet(&mut self, ctx: Handle, packet: Handle) -> i32 {
        codec::receive_packet(&mut self.heap, ctx, packet)
    }

    fn send_packet(&mut self, ctx: Handle, packet: Option<Handle>) -> i32 {
        codec::send_packet(&mut self.heap, ctx, packet)
    }

    fn receive_frame(&mut self, ctx: Handle, frame: Handle) -> i32 {
        codec::receive_frame(&mut self.heap, ctx, frame)
    }

    fn codecpar_alloc(&mut self) -> Handle {
        self.heap.insert(Object::CodecPar(ParObj::default()))
    }

    fn codecpar_free(&mut self, par: Handle) {
        if self.heap.par(par).is_some() {
            self.heap.remove(par);
        }
    }

    fn codecpar_from_context(&mut self, par: Handle, ctx: Handle) -> i32 {
        let Some(c) = self.heap.ctx(ctx) else {
            return averror(EINVAL);
        };
        let mut fields = Fields::default();
        for &(p, c_field) in PAR_CTX {
            fields.set(p, c.fields.get(c_field));
        }
        let format = if c.fields.get(Field::CtxWidth) > 0 {
            c.fields.get(Field::CtxPixFmt)
        } else {
            c.fields.get(Field::CtxSampleFmt)
        };
        fields.set(Field::ParFormat, format);
        match self.heap.par_mut(par) {
            Some(p) => {
                p.fields = fields;
                0
            }
            None => averror(EINVAL),
        }
    }

    fn codecpar_to_context(&mut self, ctx: Handle, par: Handle) -> i32 {
        let Some(p) = self.heap.par(par).map(|p| p.fields.clone()) else {
            return averror(EINVAL);
        };
        let Some(c) = self.heap.ctx_mut(ctx) else {
            return averror(EINVAL);
        };
        for &(p_field, c_field) in PAR_CTX {
            c.fields.set(c_field, p.get(p_field));
        }
        let format_field = if p.get(Field::ParWidth) > 0 {
            Field::CtxPixFmt
        } else {
            Field::CtxSampleFmt
        };
        c.fields.set(format_field, p.get(Field::ParFormat));
        0
    }

    fn codecpar_copy(&mut self, dst: Handle, src: Handle) -> i32 {
        let Some(copy) = self.heap.par(src).cloned() else {
            return averror(EINVAL);
        };
        match self.heap.par_mut(dst) {
            Some(p) => {
                *p = copy;
                0
            }
            None => averror(EINVAL),
        }
    }

    fn codecpar_extradata(&self, par: Handle) -> Option<&[u8]> {
        self.heap
            .par(par)
            .filter(|p| !p.extradata.is_empty())
            .map(|p| p.extradata.as_slice())
    }

    fn codecpar_set_extradata(&mut self, par: Handle, data: Option<&[u8]>) -> i32 {
        match self.heap.par_mut(par) {
            Some(p) => {
                p.extradata = data.map(<[u8]>::to_vec).unwrap_or_default();
                0
            }
            None => averror(EINVAL),
        }
    }

    fn output_context_alloc(
        &mut self,
        format_name: Option<&str>,
        filename: &str,
    ) -> Result<Handle, i32> {
        container::output_alloc(&mut self.heap, format_name, filename)
    }

    fn format_name(&self, ctx: Handle) -> Option<&str> {
        self.streams(ctx).map(|_| FORMAT_NAME)
    }

    fn new_stream(&mut self, oc: Handle) -> Handle {
        container::new_stream(&mut self.heap, oc)
    }

    fn stream(&self, ctx: Handle, index: usize) -> Handle {
        self.streams(ctx)
            .and_then(|s| s.get(index).copied())
            .unwrap_or(Handle::NULL)
    }

    fn io_open(&mut self, oc: Handle, filename: &str) -> i32 {
        container::io_open(&mut self.heap, self.vfs.as_ref(), oc, filename)
    }

    fn io_close(&mut self, oc: Handle) -> i32 {
        container::io_close(&mut self.heap, self.vfs.as_ref(), oc)
    }

    fn write_header(&mut self, oc: Handle) -> i32 {
        container::write_header(&mut self.heap, self.vfs.as_ref(), oc)
    }

    fn write_frame(&mut self, oc: Handle, packet: Handle, interleaved: bool) -> i32 {
        let code = container::write_packet(&mut self.heap, self.vfs.as_ref(), oc, packet);
        if interleaved {
            self.packet_unref(packet);
        }
        code
    }

    fn write_trailer(&mut self, oc: Handle) -> i32 {
        container::write_trailer(&mut self.heap, self.vfs.as_ref(), oc)
    }

    fn format_context_free(&mut self, ctx: Handle) {
        match self.heap.get(ctx) {
            Some(Object::Input(_)) => self.close_input(ctx),
            Some(Object::Output(_)) => {
                if let Some(Object::Output(o)) = self.heap.remove(ctx) {
                    container::free_streams(&mut self.heap, &o.streams);
                }
            }
            _ => {}
        }
    }

    fn open_input(&mut self, filename: &str, format_name: Option<&str>) -> Result<Handle, i32> {
        container::open_input(&mut self.heap, self.vfs.as_ref(), filename, format_name)
    }

    fn find_stream_info(&mut self, ic: Handle) -> i32 {
        container::find_stream_info(&mut self.heap, self.vfs.as_ref(), ic)
    }

    fn read_frame(&mut self, ic: Handle, packet: Handle) -> i32 {
        container::read_packet(&mut self.heap, self.vfs.as_ref(), ic, packet)
    }

    fn close_input(&mut self, ic: Handle) {
        container::close_input(&mut self.heap, self.vfs.as_ref(), ic)
    }

    fn filter_graph_create(
        &mut self,
        description: &str,
        inputs: &[FilterPad],
        outputs: &[FilterPad],
    ) -> Result<FilterGraph, i32> {
        filter::graph_create(&mut self.heap, description, inputs, outputs)
    }

    fn buffersrc_add_frame(&mut self, src: Handle, frame: Option<Handle>) -> i32 {
        filter::add_frame(&mut self.heap, src, frame)
    }

    fn buffersink_get_frame(&mut self, sink: Handle, frame: Handle) -> i32 {
        filter::get_frame(&mut self.heap, sink, frame)
    }

    fn filter_graph_free(&mut self, graph: Handle) {
        filter::graph_free(&mut self.heap, graph)
    }

    fn bsf_create(&mut self, name: &str, par_in: Option<Handle>) -> Result<Handle, i32> {
        if par_in.is_some_and(|p| self.heap.par(p).is_none()) {
            return Err(averror(EINVAL));
        }
        filter::bsf_create(&mut self.heap, name)
    }

    fn bsf_send_packet(&mut self, bsf: Handle, packet: Option<Handle>) -> i32 {
        filter::bsf_send(&mut self.heap, bsf, packet)
    }

    fn bsf_receive_packet(&mut self, bsf: Handle, packet: Handle) -> i32 {
        filter::bsf_receive(&mut self.heap, bsf, packet)
    }

    fn bsf_free(&mut self, bsf: Handle) {
        if self.heap.bsf(bsf).is_some() {
            self.heap.remove(bsf);
        }
    }
}
