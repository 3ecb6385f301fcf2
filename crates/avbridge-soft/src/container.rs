//! The `avbr` container.
//!
//! Little-endian throughout. A file is a header followed by packet records
//! and an end marker:
//!
//! ```text
//! header : "AVBR" version:u32 nb_streams:u32 stream*
//! stream : type:i32 codec_id:i32 format:i32 width:i32 height:i32
//!          channels:i32 layout:u64 sample_rate:i32 tb_num:i32 tb_den:i32
//!          extradata_len:u32 extradata
//! packet : stream:i32 pts:i64 dts:i64 duration:i64 flags:i32 size:u32 data
//!          nb_side:u32 (kind:i32 len:u32 data)*
//! end    : stream = -1
//! ```

use avbridge_engine::codes::{averror, AVERROR_EOF, AVERROR_INVALIDDATA, AVERROR_NOT_FOUND, EINVAL};
use avbridge_engine::{rescale, Fd, Field, Handle, MediaType, OpenFlags, Rational, Vfs};

use crate::objects::{Fields, Heap, Object, PacketObj, ParObj, StreamObj};

/// Short name of the only container the engine implements.
pub const FORMAT_NAME: &str = "avbr";

const MAGIC: &[u8; 4] = b"AVBR";
const VERSION: u32 = 1;
const END_MARKER: i32 = -1;
const READ_CHUNK: usize = 64 * 1024;
const VIDEO_TIME_BASE: Rational = Rational::new(1, 1000);

#[derive(Debug)]
pub(crate) struct OutputCtx {
    pub(crate) filename: String,
    pub(crate) streams: Vec<Handle>,
    fd: Option<Fd>,
    header_written: bool,
}

#[derive(Debug)]
pub(crate) struct InputCtx {
    pub(crate) streams: Vec<Handle>,
    fd: Fd,
    pending: Vec<u8>,
    eof: bool,
    header_parsed: bool,
    finished: bool,
}

fn stream_pair(heap: &mut Heap, index: usize) -> Handle {
    let par = heap.insert(Object::CodecPar(ParObj::default()));
    let mut fields = Fields::default();
    fields.set(Field::StreamIndex, index as i64);
    heap.insert(Object::Stream(StreamObj {
        fields,
        codecpar: par,
    }))
}

/// Free the stream objects owned by a format context.
pub(crate) fn free_streams(heap: &mut Heap, streams: &[Handle]) {
    for &stream in streams {
        if let Some(Object::Stream(s)) = heap.remove(stream) {
            heap.remove(s.codecpar);
        }
    }
}

pub(crate) fn output_alloc(heap: &mut Heap, format: Option<&str>, filename: &str) -> Result<Handle, i32> {
    let guessed = filename.rsplit('.').next() == Some(FORMAT_NAME);
    match format {
        Some(FORMAT_NAME) => {}
        None if guessed => {}
        _ => return Err(AVERROR_NOT_FOUND),
    }
    Ok(heap.insert(Object::Output(OutputCtx {
        filename: filename.to_string(),
        streams: Vec::new(),
        fd: None,
        header_written: false,
    })))
}

pub(crate) fn new_stream(heap: &mut Heap, oc: Handle) -> Handle {
    let Some(index) = heap.output(oc).map(|o| o.streams.len()) else {
        return Handle::NULL;
    };
    let stream = stream_pair(heap, index);
    if let Some(o) = heap.output_mut(oc) {
        o.streams.push(stream);
    }
    stream
}

pub(crate) fn io_open(heap: &mut Heap, vfs: &dyn Vfs, oc: Handle, filename: &str) -> i32 {
    let Some(o) = heap.output_mut(oc) else {
        return averror(EINVAL);
    };
    let flags = OpenFlags::WRITE_ONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE;
    match vfs.open(filename, flags) {
        Ok(fd) => {
            o.fd = Some(fd);
            0
        }
        Err(errno) => errno.code(),
    }
}

pub(crate) fn io_close(heap: &mut Heap, vfs: &dyn Vfs, oc: Handle) -> i32 {
    let Some(fd) = heap.output_mut(oc).and_then(|o| o.fd.take()) else {
        return 0;
    };
    match vfs.close(fd) {
        Ok(()) => 0,
        Err(errno) => errno.code(),
    }
}

fn write_all(vfs: &dyn Vfs, fd: Fd, mut data: &[u8]) -> i32 {
    while !data.is_empty() {
        match vfs.write(fd, data) {
            Ok(0) => return averror(avbridge_engine::codes::EIO),
            Ok(n) => data = &data[n..],
            Err(errno) => return errno.code(),
        }
    }
    0
}

fn stream_time_base(stream: &StreamObj, par: &ParObj) -> Rational {
    let tb = stream
        .fields
        .rational(Field::StreamTimeBaseNum, Field::StreamTimeBaseDen);
    if !tb.is_unset() {
        return tb;
    }
    let rate = par.fields.get(Field::ParSampleRate);
    if MediaType::from_raw(par.fields.get(Field::ParCodecType)) == MediaType::Audio && rate > 0 {
        Rational::new(1, rate as i32)
    } else {
        VIDEO_TIME_BASE
    }
}

pub(crate) fn write_header(heap: &mut Heap, vfs: &dyn Vfs, oc: Handle) -> i32 {
    let Some((fd, streams)) = heap
        .output(oc)
        .and_then(|o| o.fd.map(|fd| (fd, o.streams.clone())))
    else {
        return averror(EINVAL);
    };
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(streams.len() as u32).to_le_bytes());

    for &handle in &streams {
        let Some((par_handle, tb)) = heap.stream(handle).and_then(|s| {
            heap.par(s.codecpar)
                .map(|p| (s.codecpar, stream_time_base(s, p)))
        }) else {
            return averror(EINVAL);
        };
        if let Some(s) = heap.stream_mut(handle) {
            s.fields
                .set_rational(Field::StreamTimeBaseNum, Field::StreamTimeBaseDen, tb);
        }
        let Some(par) = heap.par(par_handle) else {
            return averror(EINVAL);
        };
        let f = &par.fields;
        for field in [
            Field::ParCodecType,
            Field::ParCodecId,
            Field::ParFormat,
            Field::ParWidth,
            Field::ParHeight,
            Field::ParChannels,
        ] {
            out.extend_from_slice(&(f.get(field) as i32).to_le_bytes());
        }
        out.extend_from_slice(&(f.get(Field::ParChannelLayout) as u64).to_le_bytes());
        out.extend_from_slice(&(f.get(Field::ParSampleRate) as i32).to_le_bytes());
        out.extend_from_slice(&tb.num.to_le_bytes());
        out.extend_from_slice(&tb.den.to_le_bytes());
        out.extend_from_slice(&(par.extradata.len() as u32).to_le_bytes());
        out.extend_from_slice(&par.extradata);
    }

    let code = write_all(vfs, fd, &out);
    if code == 0 {
        if let Some(o) = heap.output_mut(oc) {
            tracing::debug!(file = %o.filename, streams = streams.len(), "avbr header written");
            o.header_written = true;
        }
    }
    code
}

pub(crate) fn write_packet(heap: &mut Heap, vfs: &dyn Vfs, oc: Handle, packet: Handle) -> i32 {
    let Some((fd, streams)) = heap
        .output(oc)
        .filter(|o| o.header_written)
        .and_then(|o| o.fd.map(|fd| (fd, o.streams.clone())))
    else {
        return averror(EINVAL);
    };
    let Some(pkt) = heap.packet(packet) else {
        return averror(EINVAL);
    };
    let index = pkt.fields.get(Field::PacketStreamIndex);
    let Some(stream) = usize::try_from(index)
        .ok()
        .and_then(|i| streams.get(i))
        .and_then(|&s| heap.stream(s))
    else {
        return averror(EINVAL);
    };
    let stream_tb = stream
        .fields
        .rational(Field::StreamTimeBaseNum, Field::StreamTimeBaseDen);
    let packet_tb = pkt
        .fields
        .rational(Field::PacketTimeBaseNum, Field::PacketTimeBaseDen);
    let to_stream = |v: i64| {
        if packet_tb.is_unset() {
            v
        } else {
            rescale(v, packet_tb, stream_tb)
        }
    };

    let mut out = Vec::with_capacity(pkt.data.len() + 48);
    out.extend_from_slice(&(index as i32).to_le_bytes());
    out.extend_from_slice(&to_stream(pkt.fields.get(Field::PacketPts)).to_le_bytes());
    out.extend_from_slice(&to_stream(pkt.fields.get(Field::PacketDts)).to_le_bytes());
    out.extend_from_slice(&to_stream(pkt.fields.get(Field::PacketDuration)).to_le_bytes());
    out.extend_from_slice(&(pkt.fields.get(Field::PacketFlags) as i32).to_le_bytes());
    out.extend_from_slice(&(pkt.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&pkt.data);
    out.extend_from_slice(&(pkt.side_data.len() as u32).to_le_bytes());
    for (kind, data) in &pkt.side_data {
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    write_all(vfs, fd, &out)
}

pub(crate) fn write_trailer(heap: &mut Heap, vfs: &dyn Vfs, oc: Handle) -> i32 {
    match heap.output(oc).filter(|o| o.header_written).and_then(|o| o.fd) {
        Some(fd) => write_all(vfs, fd, &END_MARKER.to_le_bytes()),
        None => averror(EINVAL),
    }
}

pub(crate) fn open_input(
    heap: &mut Heap,
    vfs: &dyn Vfs,
    filename: &str,
    format: Option<&str>,
) -> Result<Handle, i32> {
    if format.is_some_and(|f| f != FORMAT_NAME) {
        return Err(AVERROR_NOT_FOUND);
    }
    let fd = vfs.open(filename, OpenFlags::READ_ONLY).map_err(|e| e.code())?;
    Ok(heap.insert(Object::Input(InputCtx {
        streams: Vec::new(),
        fd,
        pending: Vec::new(),
        eof: false,
        header_parsed: false,
        finished: false,
    })))
}

pub(crate) fn close_input(heap: &mut Heap, vfs: &dyn Vfs, ic: Handle) {
    if let Some(Object::Input(input)) = heap.remove(ic) {
        if let Err(errno) = vfs.close(input.fd) {
            tracing::debug!(error = %errno, "close_input: close failed");
        }
        free_streams(heap, &input.streams);
    }
}

/// Pull one chunk from the file into the pending buffer. A retry code from
/// the trap is returned as is; buffered bytes stay put for the next call.
fn fill(input: &mut InputCtx, vfs: &dyn Vfs) -> i32 {
    let mut chunk = vec![0; READ_CHUNK];
    match vfs.read(input.fd, &mut chunk) {
        Ok(0) => {
            input.eof = true;
            0
        }
        Ok(n) => {
            input.pending.extend_from_slice(&chunk[..n]);
            0
        }
        Err(errno) => errno.code(),
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! take_le {
    ($($name:ident: $ty:ty;)*) => {
        $(
            fn $name(&mut self) -> Option<$ty> {
                let bytes = self.bytes(std::mem::size_of::<$ty>())?;
                bytes.try_into().ok().map(<$ty>::from_le_bytes)
            }
        )*
    };
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    take_le! {
        u32: u32;
        i32: i32;
        u64: u64;
        i64: i64;
    }
}

struct StreamRecord {
    fields: [(Field, i64); 8],
    time_base: Rational,
    extradata: Vec<u8>,
}

enum Parsed<T> {
    Incomplete,
    Invalid,
    Done(T, usize),
}

fn parse_header(buf: &[u8]) -> Parsed<Vec<StreamRecord>> {
    let mut c = Cursor::new(buf);
    let Some(magic) = c.bytes(4) else {
        return Parsed::Incomplete;
    };
    if magic != MAGIC {
        return Parsed::Invalid;
    }
    let parse = |c: &mut Cursor<'_>| -> Option<Result<Vec<StreamRecord>, ()>> {
        if c.u32()? != VERSION {
            return Some(Err(()));
        }
        let count = c.u32()?;
        let mut streams = Vec::new();
        for _ in 0..count {
            let codec_type = c.i32()? as i64;
            let codec_id = c.i32()? as i64;
            let format = c.i32()? as i64;
            let width = c.i32()? as i64;
            let height = c.i32()? as i64;
            let channels = c.i32()? as i64;
            let layout = c.u64()? as i64;
            let rate = c.i32()? as i64;
            let time_base = Rational::new(c.i32()?, c.i32()?);
            let len = c.u32()? as usize;
            let extradata = c.bytes(len)?.to_vec();
            streams.push(StreamRecord {
                fields: [
                    (Field::ParCodecType, codec_type),
                    (Field::ParCodecId, codec_id),
                    (Field::ParFormat, format),
                    (Field::ParWidth, width),
                    (Field::ParHeight, height),
                    (Field::ParChannels, channels),
                    (Field::ParChannelLayout, layout),
                    (Field::ParSampleRate, rate),
                ],
                time_base,
                extradata,
            });
        }
        Some(Ok(streams))
    };
    match parse(&mut c) {
        None => Parsed::Incomplete,
        Some(Err(())) => Parsed::Invalid,
        Some(Ok(streams)) => Parsed::Done(streams, c.pos),
    }
}

fn parse_packet(buf: &[u8]) -> Parsed<Option<PacketObj>> {
    let mut c = Cursor::new(buf);
    let parse = |c: &mut Cursor<'_>| -> Option<Option<PacketObj>> {
        let index = c.i32()?;
        if index == END_MARKER {
            return Some(None);
        }
        let mut packet = PacketObj::default();
        packet.fields.set(Field::PacketStreamIndex, index as i64);
        packet.fields.set(Field::PacketPts, c.i64()?);
        packet.fields.set(Field::PacketDts, c.i64()?);
        packet.fields.set(Field::PacketDuration, c.i64()?);
        packet.fields.set(Field::PacketFlags, c.i32()? as i64);
        let size = c.u32()? as usize;
        packet.data = std::sync::Arc::new(c.bytes(size)?.to_vec());
        packet.fields.set(Field::PacketSize, size as i64);
        let side = c.u32()?;
        for _ in 0..side {
            let kind = c.i32()?;
            let len = c.u32()? as usize;
            packet.side_data.push((kind, c.bytes(len)?.to_vec()));
        }
        Some(Some(packet))
    };
    match parse(&mut c) {
        None => Parsed::Incomplete,
        Some(packet) => Parsed::Done(packet, c.pos),
    }
}

fn input_mut<'h>(heap: &'h mut Heap, ic: Handle) -> Result<&'h mut InputCtx, i32> {
    heap.input_mut(ic).ok_or(averror(EINVAL))
}

fn ensure_header(heap: &mut Heap, vfs: &dyn Vfs, ic: Handle) -> i32 {
    let records = loop {
        let input = match input_mut(heap, ic) {
            Ok(input) => input,
            Err(code) => return code,
        };
        if input.header_parsed {
            return 0;
        }
        match parse_header(&input.pending) {
            Parsed::Done(records, used) => {
                input.pending.drain(..used);
                input.header_parsed = true;
                break records;
            }
            Parsed::Invalid => return AVERROR_INVALIDDATA,
            Parsed::Incomplete if input.eof => return AVERROR_INVALIDDATA,
            Parsed::Incomplete => {
                let code = fill(input, vfs);
                if code < 0 {
                    return code;
                }
            }
        }
    };

    let mut streams = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let stream = stream_pair(heap, index);
        if let Some(s) = heap.stream_mut(stream) {
            s.fields.set_rational(
                Field::StreamTimeBaseNum,
                Field::StreamTimeBaseDen,
                record.time_base,
            );
            let par = s.codecpar;
            if let Some(p) = heap.par_mut(par) {
                for (field, value) in record.fields {
                    p.fields.set(field, value);
                }
                p.extradata = record.extradata;
            }
        }
        streams.push(stream);
    }
    tracing::debug!(streams = streams.len(), "avbr header parsed");
    if let Some(input) = heap.input_mut(ic) {
        input.streams = streams;
    }
    0
}

pub(crate) fn find_stream_info(heap: &mut Heap, vfs: &dyn Vfs, ic: Handle) -> i32 {
    ensure_header(heap, vfs, ic)
}

pub(crate) fn read_packet(heap: &mut Heap, vfs: &dyn Vfs, ic: Handle, packet: Handle) -> i32 {
    let code = ensure_header(heap, vfs, ic);
    if code < 0 {
        return code;
    }
    let parsed = loop {
        let input = match input_mut(heap, ic) {
            Ok(input) => input,
            Err(code) => return code,
        };
        if input.finished {
            return AVERROR_EOF;
        }
        match parse_packet(&input.pending) {
            Parsed::Done(parsed, used) => {
                input.pending.drain(..used);
                break parsed;
            }
            Parsed::Invalid => return AVERROR_INVALIDDATA,
            Parsed::Incomplete if input.eof && input.pending.is_empty() => return AVERROR_EOF,
            Parsed::Incomplete if input.eof => return AVERROR_INVALIDDATA,
            Parsed::Incomplete => {
                let code = fill(input, vfs);
                if code < 0 {
                    return code;
                }
            }
        }
    };

    let Some(mut next) = parsed else {
        if let Some(input) = heap.input_mut(ic) {
            input.finished = true;
        }
        return AVERROR_EOF;
    };
    let index = next.fields.get(Field::PacketStreamIndex);
    let tb = heap
        .input(ic)
        .and_then(|i| usize::try_from(index).ok().and_then(|i2| i.streams.get(i2)))
        .and_then(|&s| heap.stream(s))
        .map(|s| s.fields.rational(Field::StreamTimeBaseNum, Field::StreamTimeBaseDen));
    let Some(tb) = tb else {
        return AVERROR_INVALIDDATA;
    };
    next.fields
        .set_rational(Field::PacketTimeBaseNum, Field::PacketTimeBaseDen, tb);
    match heap.packet_mut(packet) {
        Some(slot) => {
            *slot = next;
            0
        }
        None => averror(EINVAL),
    }
}
