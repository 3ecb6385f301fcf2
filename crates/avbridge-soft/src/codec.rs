use std::collections::VecDeque;
use std::sync::Arc;

use avbridge_engine::codes::{averror, AVERROR_EOF, AVERROR_INVALIDDATA, EAGAIN, EINVAL};
use avbridge_engine::{
    channel_layout_for, channels_for, rescale, Field, Handle, MediaType, PixFmtDescriptor,
    PixelFormat, Rational, SampleFormat,
};

use crate::objects::{CodecCtx, FrameObj, Heap, PacketObj, Plane};

pub(crate) const RAWVIDEO: i32 = 1;
pub(crate) const PCM_S16LE: i32 = 2;
pub(crate) const PCM_F32LE: i32 = 3;

const TABLE: &[(i32, &str, MediaType)] = &[
    (RAWVIDEO, "rawvideo", MediaType::Video),
    (PCM_S16LE, "pcm_s16le", MediaType::Audio),
    (PCM_F32LE, "pcm_f32le", MediaType::Audio),
];

/// Handles below this value name codecs rather than heap objects.
pub(crate) const RESERVED_HANDLES: u32 = 16;

const KEY_FLAG: i64 = 0x0001;
const LINE_ALIGN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CodecDesc {
    pub(crate) id: i32,
    pub(crate) name: &'static str,
    pub(crate) media: MediaType,
    pub(crate) encoder: bool,
}

fn handle_for(index: usize, encoder: bool) -> Handle {
    Handle(1 + index as u32 * 2 + encoder as u32)
}

pub(crate) fn lookup(handle: Handle) -> Option<CodecDesc> {
    if handle.is_null() || handle.0 >= RESERVED_HANDLES {
        return None;
    }
    let index = ((handle.0 - 1) / 2) as usize;
    let encoder = (handle.0 - 1) % 2 == 1;
    TABLE.get(index).map(|&(id, name, media)| CodecDesc {
        id,
        name,
        media,
        encoder,
    })
}

pub(crate) fn by_name(name: &str, encoder: bool) -> Handle {
    TABLE
        .iter()
        .position(|(_, n, _)| *n == name)
        .map(|i| handle_for(i, encoder))
        .unwrap_or(Handle::NULL)
}

pub(crate) fn by_id(id: i32, encoder: bool) -> Handle {
    TABLE
        .iter()
        .position(|(i, _, _)| *i == id)
        .map(|i| handle_for(i, encoder))
        .unwrap_or(Handle::NULL)
}

pub(crate) fn descriptor(format: i32) -> Option<PixFmtDescriptor> {
    let (nb_components, log2_chroma_w, log2_chroma_h, planar) =
        match PixelFormat::from_raw(format as i64)? {
            PixelFormat::Yuv420p => (3, 1, 1, true),
            PixelFormat::Yuv444p => (3, 0, 0, true),
            PixelFormat::Gray8 => (1, 0, 0, true),
            PixelFormat::Rgb24 => (3, 0, 0, false),
            PixelFormat::Rgba => (4, 0, 0, false),
        };
    Some(PixFmtDescriptor {
        nb_components,
        log2_chroma_w,
        log2_chroma_h,
        planar,
    })
}

/// Sample formats a PCM codec accepts.
fn pcm_family(codec_id: i32) -> Option<(SampleFormat, SampleFormat)> {
    match codec_id {
        PCM_S16LE => Some((SampleFormat::S16, SampleFormat::S16p)),
        PCM_F32LE => Some((SampleFormat::Flt, SampleFormat::Fltp)),
        _ => None,
    }
}

/// Allocate zeroed plane storage for the fields already set on `frame`.
pub(crate) fn alloc_planes(frame: &mut FrameObj, align: i32) -> i32 {
    let align = if align > 0 { align as usize } else { LINE_ALIGN };
    let f = &frame.fields;
    let width = f.get(Field::FrameWidth).max(0) as usize;
    let nb_samples = f.get(Field::FrameNbSamples).max(0) as usize;
    let format = f.get(Field::FrameFormat) as i32;

    let planes = if width > 0 && nb_samples == 0 {
        let Some(desc) = descriptor(format) else {
            return averror(EINVAL);
        };
        let height = f.get(Field::FrameHeight).max(0) as usize;
        (0..desc.plane_count())
            .map(|p| {
                let (w, h) = desc.plane_extent(p, width, height);
                let linesize = w.div_ceil(align) * align;
                Plane {
                    linesize,
                    data: Arc::new(vec![0; linesize * h]),
                }
            })
            .collect()
    } else {
        let Some(sample_fmt) = SampleFormat::from_raw(format as i64) else {
            return averror(EINVAL);
        };
        let mut channels = f.get(Field::FrameChannels).max(0) as u32;
        if channels == 0 {
            channels = channels_for(f.get(Field::FrameChannelLayout) as u64);
        }
        if channels == 0 || nb_samples == 0 {
            return averror(EINVAL);
        }
        let bps = sample_fmt.bytes_per_sample();
        let (count, size) = if sample_fmt.is_planar() {
            (channels as usize, nb_samples * bps)
        } else {
            (1, nb_samples * bps * channels as usize)
        };
        (0..count)
            .map(|_| Plane {
                linesize: size,
                data: Arc::new(vec![0; size]),
            })
            .collect()
    };
    frame.planes = planes;
    0
}

pub(crate) fn open(heap: &mut Heap, ctx: Handle, codec: Handle, options: &[(String, String)]) -> i32 {
    let Some(desc) = lookup(codec).or_else(|| heap.ctx(ctx).and_then(|c| c.codec)) else {
        return averror(EINVAL);
    };
    let Some(c) = heap.ctx_mut(ctx) else {
        return averror(EINVAL);
    };
    for (key, value) in options {
        tracing::trace!(codec = desc.name, key = %key, value = %value, "codec option");
    }
    c.codec = Some(desc);
    c.fields.set(Field::CtxCodecId, desc.id as i64);
    c.fields.set(Field::CtxCodecType, desc.media as i64);

    if let Some((packed, planar)) = pcm_family(desc.id) {
        let fmt = c.fields.get(Field::CtxSampleFmt);
        if desc.encoder {
            if fmt != packed.raw() as i64 && fmt != planar.raw() as i64 {
                return averror(EINVAL);
            }
            if c.fields.get(Field::CtxSampleRate) <= 0 {
                return averror(EINVAL);
            }
        } else if fmt < 0 {
            c.fields.set(Field::CtxSampleFmt, packed.raw() as i64);
        }
        let layout = c.fields.get(Field::CtxChannelLayout) as u64;
        let mut channels = c.fields.get(Field::CtxChannels) as u32;
        if channels == 0 {
            channels = channels_for(layout);
        }
        if desc.encoder && channels == 0 {
            return averror(EINVAL);
        }
        c.fields.set(Field::CtxChannels, channels as i64);
        if layout == 0 {
            c.fields.set(Field::CtxChannelLayout, channel_layout_for(channels) as i64);
        }
        let rate = c.fields.get(Field::CtxSampleRate);
        if c.fields.rational(Field::CtxTimeBaseNum, Field::CtxTimeBaseDen).is_unset() && rate > 0 {
            c.fields.set_rational(
                Field::CtxTimeBaseNum,
                Field::CtxTimeBaseDen,
                Rational::new(1, rate as i32),
            );
        }
        let bps = SampleFormat::from_raw(c.fields.get(Field::CtxSampleFmt))
            .map(|f| f.bytes_per_sample() as i64)
            .unwrap_or(0);
        c.fields.set(Field::CtxBitRate, rate * channels as i64 * bps * 8);
    } else if desc.encoder {
        let ok = c.fields.get(Field::CtxWidth) > 0
            && c.fields.get(Field::CtxHeight) > 0
            && descriptor(c.fields.get(Field::CtxPixFmt) as i32).is_some()
            && !c.fields.rational(Field::CtxTimeBaseNum, Field::CtxTimeBaseDen).is_unset();
        if !ok {
            return averror(EINVAL);
        }
    }
    c.opened = true;
    c.draining = false;
    0
}

fn opened(heap: &mut Heap, ctx: Handle, encoder: bool) -> Result<&mut CodecCtx, i32> {
    match heap.ctx_mut(ctx) {
        Some(c) if c.opened && c.codec.is_some_and(|d| d.encoder == encoder) => Ok(c),
        _ => Err(averror(EINVAL)),
    }
}

/// Common front half of both send paths. `Ok(None)` means the input was a
/// flush request and the context is now draining.
fn accept<T>(c: &mut CodecCtx, input: Option<T>) -> Result<Option<(CodecDesc, T)>, i32> {
    if c.draining {
        return Err(AVERROR_EOF);
    }
    let Some(input) = input else {
        c.draining = true;
        return Ok(None);
    };
    let desc = c.codec.ok_or(averror(EINVAL))?;
    Ok(Some((desc, input)))
}

/// Next queued output, `EAGAIN` while more input is needed.
fn dequeue<T>(queue: &mut VecDeque<T>, draining: bool) -> Result<T, i32> {
    match queue.pop_front() {
        Some(item) => Ok(item),
        None if draining => Err(AVERROR_EOF),
        None => Err(averror(EAGAIN)),
    }
}

fn status(result: Result<(), i32>) -> i32 {
    result.err().unwrap_or(0)
}

pub(crate) fn send_frame(heap: &mut Heap, ctx: Handle, frame: Option<Handle>) -> i32 {
    let input = match frame.map(|h| heap.frame(h).cloned()) {
        Some(None) => return averror(EINVAL),
        input => input.flatten(),
    };
    status(opened(heap, ctx, true).and_then(|c| {
        let Some((desc, input)) = accept(c, input)? else {
            return Ok(());
        };
        let packet = if desc.media == MediaType::Audio {
            encode_audio(c, &input)?
        } else {
            encode_video(c, &input)?
        };
        c.packets.push_back(packet);
        Ok(())
    }))
}

fn encode_audio(c: &CodecCtx, frame: &FrameObj) -> Result<PacketObj, i32> {
    let format = frame.fields.get(Field::FrameFormat);
    if format != c.fields.get(Field::CtxSampleFmt) {
        return Err(averror(EINVAL));
    }
    let sample_fmt = SampleFormat::from_raw(format).ok_or(averror(EINVAL))?;
    let channels = c.fields.get(Field::CtxChannels) as usize;
    let nb = frame.fields.get(Field::FrameNbSamples).max(0) as usize;
    let bps = sample_fmt.bytes_per_sample();
    let mut out = Vec::with_capacity(nb * channels * bps);
    if sample_fmt.is_planar() {
        if frame.planes.len() < channels
            || frame.planes.iter().take(channels).any(|p| p.data.len() < nb * bps)
        {
            return Err(averror(EINVAL));
        }
        for s in 0..nb {
            for plane in frame.planes.iter().take(channels) {
                out.extend_from_slice(&plane.data[s * bps..(s + 1) * bps]);
            }
        }
    } else {
        let plane = frame
            .planes
            .first()
            .filter(|p| p.data.len() >= nb * channels * bps)
            .ok_or(averror(EINVAL))?;
        out.extend_from_slice(&plane.data[..nb * channels * bps]);
    }

    let ctx_tb = c.fields.rational(Field::CtxTimeBaseNum, Field::CtxTimeBaseDen);
    let rate = c.fields.get(Field::CtxSampleRate) as i32;
    Ok(packet_for(
        out,
        frame.fields.get(Field::FramePts),
        rescale(nb as i64, Rational::new(1, rate), ctx_tb),
        ctx_tb,
    ))
}

fn encode_video(c: &CodecCtx, frame: &FrameObj) -> Result<PacketObj, i32> {
    let format = frame.fields.get(Field::FrameFormat);
    if format != c.fields.get(Field::CtxPixFmt)
        || frame.fields.get(Field::FrameWidth) != c.fields.get(Field::CtxWidth)
        || frame.fields.get(Field::FrameHeight) != c.fields.get(Field::CtxHeight)
    {
        return Err(averror(EINVAL));
    }
    let desc = descriptor(format as i32).ok_or(averror(EINVAL))?;
    let width = c.fields.get(Field::CtxWidth) as usize;
    let height = c.fields.get(Field::CtxHeight) as usize;
    let mut out = Vec::new();
    for (p, plane) in frame.planes.iter().enumerate().take(desc.plane_count()) {
        let (w, h) = desc.plane_extent(p, width, height);
        if h > 0 && plane.data.len() < plane.linesize * (h - 1) + w {
            return Err(averror(EINVAL));
        }
        for y in 0..h {
            out.extend_from_slice(&plane.data[y * plane.linesize..y * plane.linesize + w]);
        }
    }
    let ctx_tb = c.fields.rational(Field::CtxTimeBaseNum, Field::CtxTimeBaseDen);
    Ok(packet_for(out, frame.fields.get(Field::FramePts), 1, ctx_tb))
}

fn packet_for(data: Vec<u8>, pts: i64, duration: i64, time_base: Rational) -> PacketObj {
    let mut packet = PacketObj {
        data: Arc::new(data),
        ..PacketObj::default()
    };
    packet.fields.set(Field::PacketPts, pts);
    packet.fields.set(Field::PacketDts, pts);
    packet.fields.set(Field::PacketDuration, duration);
    packet.fields.set(Field::PacketFlags, KEY_FLAG);
    packet
        .fields
        .set_rational(Field::PacketTimeBaseNum, Field::PacketTimeBaseDen, time_base);
    packet
}

pub(crate) fn receive_packet(heap: &mut Heap, ctx: Handle, packet: Handle) -> i32 {
    let next = match opened(heap, ctx, true).and_then(|c| dequeue(&mut c.packets, c.draining)) {
        Ok(next) => next,
        Err(code) => return code,
    };
    match heap.packet_mut(packet) {
        Some(slot) => {
            *slot = next;
            0
        }
        None => averror(EINVAL),
    }
}

pub(crate) fn send_packet(heap: &mut Heap, ctx: Handle, packet: Option<Handle>) -> i32 {
    let input = match packet.map(|h| heap.packet(h).cloned()) {
        Some(None) => return averror(EINVAL),
        input => input.flatten(),
    };
    status(opened(heap, ctx, false).and_then(|c| {
        let Some((desc, input)) = accept(c, input)? else {
            return Ok(());
        };
        let frame = if desc.media == MediaType::Audio {
            decode_audio(c, &input)?
        } else {
            decode_video(c, &input)?
        };
        c.frames.push_back(frame);
        Ok(())
    }))
}

fn frame_timing(c: &CodecCtx, packet: &PacketObj, frame: &mut FrameObj) {
    let mut tb = packet
        .fields
        .rational(Field::PacketTimeBaseNum, Field::PacketTimeBaseDen);
    if tb.is_unset() {
        tb = c.fields.rational(Field::CtxTimeBaseNum, Field::CtxTimeBaseDen);
    }
    frame.fields.set(Field::FramePts, packet.fields.get(Field::PacketPts));
    frame
        .fields
        .set_rational(Field::FrameTimeBaseNum, Field::FrameTimeBaseDen, tb);
}

fn decode_audio(c: &CodecCtx, packet: &PacketObj) -> Result<FrameObj, i32> {
    let sample_fmt = SampleFormat::from_raw(c.fields.get(Field::CtxSampleFmt)).ok_or(averror(EINVAL))?;
    let channels = c.fields.get(Field::CtxChannels) as usize;
    if channels == 0 {
        return Err(averror(EINVAL));
    }
    let bps = sample_fmt.bytes_per_sample();
    if packet.data.len() % (channels * bps) != 0 {
        return Err(AVERROR_INVALIDDATA);
    }
    let nb = packet.data.len() / (channels * bps);

    let mut frame = FrameObj::default();
    frame.fields.set(Field::FrameFormat, sample_fmt.raw() as i64);
    frame.fields.set(Field::FrameNbSamples, nb as i64);
    frame.fields.set(Field::FrameChannels, channels as i64);
    frame.fields.set(Field::FrameChannelLayout, c.fields.get(Field::CtxChannelLayout));
    frame.fields.set(Field::FrameSampleRate, c.fields.get(Field::CtxSampleRate));
    frame_timing(c, packet, &mut frame);
    let code = alloc_planes(&mut frame, 0);
    if code < 0 {
        return Err(code);
    }
    if sample_fmt.is_planar() {
        for s in 0..nb {
            for (ch, plane) in frame.planes.iter_mut().enumerate() {
                let from = (s * channels + ch) * bps;
                Arc::make_mut(&mut plane.data)[s * bps..(s + 1) * bps]
                    .copy_from_slice(&packet.data[from..from + bps]);
            }
        }
    } else if let Some(plane) = frame.planes.first_mut() {
        Arc::make_mut(&mut plane.data).copy_from_slice(&packet.data);
    }
    Ok(frame)
}

fn decode_video(c: &CodecCtx, packet: &PacketObj) -> Result<FrameObj, i32> {
    let format = c.fields.get(Field::CtxPixFmt);
    let desc = descriptor(format as i32).ok_or(averror(EINVAL))?;
    let width = c.fields.get(Field::CtxWidth).max(0) as usize;
    let height = c.fields.get(Field::CtxHeight).max(0) as usize;

    let mut frame = FrameObj::default();
    frame.fields.set(Field::FrameFormat, format);
    frame.fields.set(Field::FrameWidth, width as i64);
    frame.fields.set(Field::FrameHeight, height as i64);
    frame.fields.set(Field::FrameKeyFrame, 1);
    frame_timing(c, packet, &mut frame);
    let code = alloc_planes(&mut frame, 0);
    if code < 0 {
        return Err(code);
    }
    let mut offset = 0;
    for (p, plane) in frame.planes.iter_mut().enumerate() {
        let (w, h) = desc.plane_extent(p, width, height);
        if packet.data.len() < offset + w * h {
            return Err(AVERROR_INVALIDDATA);
        }
        let linesize = plane.linesize;
        let data = Arc::make_mut(&mut plane.data);
        for y in 0..h {
            data[y * linesize..y * linesize + w].copy_from_slice(&packet.data[offset..offset + w]);
            offset += w;
        }
    }
    Ok(frame)
}

pub(crate) fn receive_frame(heap: &mut Heap, ctx: Handle, frame: Handle) -> i32 {
    let next = match opened(heap, ctx, false).and_then(|c| dequeue(&mut c.frames, c.draining)) {
        Ok(next) => next,
        Err(code) => return code,
    };
    match heap.frame_mut(frame) {
        Some(slot) => {
            *slot = next;
            0
        }
        None => averror(EINVAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_handles_resolve_both_ways() {
        let enc = by_name("pcm_f32le", true);
        let dec = by_id(PCM_F32LE, false);
        assert_ne!(enc, dec);
        assert_eq!(lookup(enc).map(|d| (d.name, d.encoder)), Some(("pcm_f32le", true)));
        assert_eq!(lookup(dec).map(|d| (d.id, d.encoder)), Some((PCM_F32LE, false)));
        assert!(by_name("h264", true).is_null());
    }

    #[test]
    fn video_planes_are_line_aligned() {
        let mut frame = FrameObj::default();
        frame.fields.set(Field::FrameFormat, PixelFormat::Yuv420p.raw() as i64);
        frame.fields.set(Field::FrameWidth, 5);
        frame.fields.set(Field::FrameHeight, 3);
        assert_eq!(alloc_planes(&mut frame, 0), 0);
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[0].linesize, 32);
        assert_eq!(frame.planes[0].data.len(), 96);
        assert_eq!(frame.planes[1].data.len(), 64);
    }

    #[test]
    fn audio_planes_follow_layout() {
        let mut frame = FrameObj::default();
        frame.fields.set(Field::FrameFormat, SampleFormat::S16.raw() as i64);
        frame.fields.set(Field::FrameChannelLayout, 0x3);
        frame.fields.set(Field::FrameNbSamples, 10);
        assert_eq!(alloc_planes(&mut frame, 0), 0);
        assert_eq!(frame.planes.len(), 1);
        assert_eq!(frame.planes[0].data.len(), 40);
    }
}
