use avbridge_engine::codes::{averror, ENOMEM, NOPTS_VALUE};
use avbridge_engine::{
    channel_layout_for, channels_for, Engine, Field, Handle, PixFmtDescriptor, PixelFormat,
    Rational, SampleFormat,
};
use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::error::{check, MarshalError, Result};
use crate::mode::{FrameCopyout, FrameRef};
use crate::value::Value;

/// Host-native copy of an engine frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Raw sample or pixel format tag.
    pub format: i32,
    pub pts: Option<i64>,
    /// Time base of `pts`; when absent it is inferred from the owning context.
    pub time_base: Option<Rational>,
    pub data: FrameData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameData {
    Audio(AudioFrame),
    Video(VideoFrame),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub sample_rate: i32,
    pub channels: u32,
    /// Channel mask; zero means the default layout for `channels`.
    pub channel_layout: u64,
    /// Samples per channel; zero means "derive from the buffers".
    pub nb_samples: usize,
    pub samples: AudioData,
}

/// Audio payload: one buffer per channel, or a single interleaved buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AudioData {
    Planar(Vec<Buffer>),
    Packed(Buffer),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub key_frame: bool,
    pub pict_type: i32,
    pub sample_aspect_ratio: Rational,
    pub crop: Crop,
    pub picture: Picture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Crop {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

/// Where one plane starts inside a laid-out picture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneLayout {
    pub offset: usize,
    pub stride: usize,
}

/// Video payload in one of the supported shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Picture {
    /// All planes in one buffer, each at `layout[plane]`.
    Laid { data: Buffer, layout: Vec<PlaneLayout> },
    /// Planes back to back with no row padding.
    Packed(Buffer),
    /// RGBA pixels, row after row.
    Image(ImageBuffer),
}

/// A host pixel buffer in RGBA order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Buffer,
}

impl Frame {
    /// Planar or packed audio, shape decided by `format`.
    pub fn audio(format: SampleFormat, sample_rate: i32, channels: u32, samples: AudioData) -> Self {
        Self {
            format: format.raw(),
            pts: None,
            time_base: None,
            data: FrameData::Audio(AudioFrame {
                sample_rate,
                channels,
                channel_layout: channel_layout_for(channels),
                nb_samples: 0,
                samples,
            }),
        }
    }

    pub fn with_pts(mut self, pts: i64, time_base: Rational) -> Self {
        self.pts = Some(pts);
        self.time_base = Some(time_base);
        self
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.data, FrameData::Audio(_))
    }

    /// Visit every bulk buffer in a stable order.
    pub fn for_each_buffer_mut(&mut self, f: &mut dyn FnMut(&mut Buffer)) {
        match &mut self.data {
            FrameData::Audio(audio) => match &mut audio.samples {
                AudioData::Planar(planes) => planes.iter_mut().for_each(|b| f(b)),
                AudioData::Packed(buf) => f(buf),
            },
            FrameData::Video(video) => match &mut video.picture {
                Picture::Laid { data, .. } | Picture::Packed(data) => f(data),
                Picture::Image(image) => f(&mut image.data),
            },
        }
    }

    pub fn for_each_buffer(&self, f: &mut dyn FnMut(&Buffer)) {
        match &self.data {
            FrameData::Audio(audio) => match &audio.samples {
                AudioData::Planar(planes) => planes.iter().for_each(|b| f(b)),
                AudioData::Packed(buf) => f(buf),
            },
            FrameData::Video(video) => match &video.picture {
                Picture::Laid { data, .. } | Picture::Packed(data) => f(data),
                Picture::Image(image) => f(&image.data),
            },
        }
    }
}

fn require(frame: Handle) -> Result<()> {
    if frame.is_null() {
        Err(MarshalError::NullHandle("frame"))
    } else {
        Ok(())
    }
}

fn is_video(engine: &dyn Engine, frame: Handle) -> bool {
    engine.get(frame, Field::FrameNbSamples) == 0 && engine.get(frame, Field::FrameWidth) > 0
}

fn timing(engine: &dyn Engine, frame: Handle) -> (i32, Option<i64>, Option<Rational>) {
    let format = engine.get(frame, Field::FrameFormat) as i32;
    let pts = engine.get(frame, Field::FramePts);
    let time_base = Rational::new(
        engine.get(frame, Field::FrameTimeBaseNum) as i32,
        engine.get(frame, Field::FrameTimeBaseDen) as i32,
    );
    (
        format,
        (pts != NOPTS_VALUE).then_some(pts),
        (!time_base.is_unset()).then_some(time_base),
    )
}

fn plane<'a>(engine: &'a dyn Engine, frame: Handle, index: usize, need: usize) -> Result<&'a [u8]> {
    let data = engine
        .frame_data(frame, index)
        .ok_or(MarshalError::NullHandle("frame plane"))?;
    if data.len() < need {
        return Err(MarshalError::ShapeMismatch(format!(
            "plane {index} holds {} bytes, {need} expected",
            data.len()
        )));
    }
    Ok(&data[..need])
}

/// Copy a frame out, classifying audio versus video by its fields.
pub fn copyout_frame(engine: &dyn Engine, frame: Handle) -> Result<Frame> {
    require(frame)?;
    if is_video(engine, frame) {
        copyout_frame_video(engine, frame)
    } else {
        copyout_audio(engine, frame)
    }
}

fn copyout_audio(engine: &dyn Engine, frame: Handle) -> Result<Frame> {
    let (format, pts, time_base) = timing(engine, frame);
    let sample_fmt = SampleFormat::from_raw(format as i64).ok_or(MarshalError::UnsupportedFormat {
        kind: "sample",
        format,
    })?;
    let nb_samples = engine.get(frame, Field::FrameNbSamples).max(0) as usize;
    let channel_layout = engine.get(frame, Field::FrameChannelLayout) as u64;
    let mut channels = engine.get(frame, Field::FrameChannels).max(0) as u32;
    if channels == 0 {
        channels = channels_for(channel_layout);
    }
    let bps = sample_fmt.bytes_per_sample();

    let samples = if sample_fmt.is_planar() {
        let mut planes = Vec::with_capacity(channels as usize);
        for ch in 0..channels as usize {
            planes.push(Buffer::copy_from_slice(plane(engine, frame, ch, nb_samples * bps)?));
        }
        AudioData::Planar(planes)
    } else {
        let need = nb_samples * channels as usize * bps;
        AudioData::Packed(Buffer::copy_from_slice(plane(engine, frame, 0, need)?))
    };

    Ok(Frame {
        format,
        pts,
        time_base,
        data: FrameData::Audio(AudioFrame {
            sample_rate: engine.get(frame, Field::FrameSampleRate) as i32,
            channels,
            channel_layout,
            nb_samples,
            samples,
        }),
    })
}

fn video_header(engine: &dyn Engine, frame: Handle, picture: Picture) -> Frame {
    let (format, pts, time_base) = timing(engine, frame);
    let get = |field| engine.get(frame, field);
    Frame {
        format,
        pts,
        time_base,
        data: FrameData::Video(VideoFrame {
            width: get(Field::FrameWidth).max(0) as u32,
            height: get(Field::FrameHeight).max(0) as u32,
            key_frame: get(Field::FrameKeyFrame) != 0,
            pict_type: get(Field::FramePictType) as i32,
            sample_aspect_ratio: Rational::new(
                get(Field::FrameSampleAspectRatioNum) as i32,
                get(Field::FrameSampleAspectRatioDen) as i32,
            ),
            crop: Crop {
                top: get(Field::FrameCropTop).max(0) as u32,
                bottom: get(Field::FrameCropBottom).max(0) as u32,
                left: get(Field::FrameCropLeft).max(0) as u32,
                right: get(Field::FrameCropRight).max(0) as u32,
            },
            picture,
        }),
    }
}

fn descriptor(engine: &dyn Engine, frame: Handle) -> Result<(PixFmtDescriptor, usize, usize)> {
    let format = engine.get(frame, Field::FrameFormat) as i32;
    let desc = engine
        .pix_fmt_descriptor(format)
        .ok_or(MarshalError::UnsupportedFormat { kind: "pixel", format })?;
    let width = engine.get(frame, Field::FrameWidth).max(0) as usize;
    let height = engine.get(frame, Field::FrameHeight).max(0) as usize;
    Ok((desc, width, height))
}

/// Copy a video frame out as one buffer plus an explicit plane layout.
/// Rows keep the engine's line padding.
pub fn copyout_frame_video(engine: &dyn Engine, frame: Handle) -> Result<Frame> {
    require(frame)?;
    if !is_video(engine, frame) {
        return copyout_audio(engine, frame);
    }
    let (desc, width, height) = descriptor(engine, frame)?;
    let mut data = Vec::new();
    let mut layout = Vec::with_capacity(desc.plane_count());
    for p in 0..desc.plane_count() {
        let stride = engine.frame_linesize(frame, p).max(0) as usize;
        let (_, rows) = desc.plane_extent(p, width, height);
        layout.push(PlaneLayout {
            offset: data.len(),
            stride,
        });
        data.extend_from_slice(plane(engine, frame, p, stride * rows)?);
    }
    Ok(video_header(
        engine,
        frame,
        Picture::Laid {
            data: Buffer::fresh(data),
            layout,
        },
    ))
}

/// Byte size of a video frame's planes with row padding removed.
pub fn frame_video_packed_size(engine: &dyn Engine, frame: Handle) -> Result<usize> {
    require(frame)?;
    let (desc, width, height) = descriptor(engine, frame)?;
    Ok((0..desc.plane_count())
        .map(|p| {
            let (w, h) = desc.plane_extent(p, width, height);
            w * h
        })
        .sum())
}

fn packed_pixels(engine: &dyn Engine, frame: Handle) -> Result<Vec<u8>> {
    let (desc, width, height) = descriptor(engine, frame)?;
    let mut out = Vec::with_capacity(frame_video_packed_size(engine, frame)?);
    for p in 0..desc.plane_count() {
        let stride = engine.frame_linesize(frame, p).max(0) as usize;
        let (w, rows) = desc.plane_extent(p, width, height);
        if rows == 0 {
            continue;
        }
        let data = plane(engine, frame, p, stride * (rows - 1) + w)?;
        for y in 0..rows {
            out.extend_from_slice(&data[y * stride..y * stride + w]);
        }
    }
    Ok(out)
}

/// Copy a video frame out with every plane tightly packed.
pub fn copyout_frame_video_packed(engine: &dyn Engine, frame: Handle) -> Result<Frame> {
    require(frame)?;
    if !is_video(engine, frame) {
        return copyout_audio(engine, frame);
    }
    let data = packed_pixels(engine, frame)?;
    Ok(video_header(engine, frame, Picture::Packed(Buffer::fresh(data))))
}

/// Copy an RGBA video frame out as a host pixel buffer.
pub fn copyout_frame_image(engine: &dyn Engine, frame: Handle) -> Result<Frame> {
    require(frame)?;
    let format = engine.get(frame, Field::FrameFormat) as i32;
    if !is_video(engine, frame) || format != PixelFormat::Rgba.raw() {
        return Err(MarshalError::UnsupportedFormat {
            kind: "image",
            format,
        });
    }
    let data = packed_pixels(engine, frame)?;
    let image = ImageBuffer {
        width: engine.get(frame, Field::FrameWidth) as u32,
        height: engine.get(frame, Field::FrameHeight) as u32,
        data: Buffer::fresh(data),
    };
    Ok(video_header(engine, frame, Picture::Image(image)))
}

/// Return a new native reference to the frame; nothing is copied.
pub fn copyout_frame_ptr(engine: &mut dyn Engine, frame: Handle) -> Result<Handle> {
    require(frame)?;
    let clone = engine.frame_clone(frame);
    tracing::trace!(frame = frame.0, clone = clone.0, "frame copied out by reference");
    if clone.is_null() {
        return Err(MarshalError::Engine {
            op: "av_frame_clone",
            code: averror(ENOMEM),
        });
    }
    Ok(clone)
}

/// Copy a frame out in the requested mode.
pub fn copyout_frame_as(engine: &mut dyn Engine, frame: Handle, mode: FrameCopyout) -> Result<Value> {
    Ok(match mode {
        FrameCopyout::Default => Value::from(copyout_frame(engine, frame)?),
        FrameCopyout::Video => Value::from(copyout_frame_video(engine, frame)?),
        FrameCopyout::VideoPacked => Value::from(copyout_frame_video_packed(engine, frame)?),
        FrameCopyout::ImageData => Value::from(copyout_frame_image(engine, frame)?),
        FrameCopyout::Ptr => Value::from(copyout_frame_ptr(engine, frame)?),
    })
}

/// Copy a frame into `dst`.
///
/// A native reference is moved: `dst` takes a new reference to its data and
/// the source handle is released.
pub fn copyin_frame(engine: &mut dyn Engine, dst: Handle, src: FrameRef) -> Result<()> {
    require(dst)?;
    match src {
        FrameRef::Native(native) => {
            let src = native.into_handle();
            tracing::trace!(src = src.0, dst = dst.0, "frame reference moved");
            engine.frame_unref(dst);
            let code = engine.frame_ref(dst, src);
            engine.frame_unref(src);
            engine.frame_free(src);
            check("av_frame_ref", code).map(|_| ())
        }
        FrameRef::Owned(frame) => copyin_owned(engine, dst, frame),
    }
}

fn copyin_owned(engine: &mut dyn Engine, dst: Handle, frame: Frame) -> Result<()> {
    engine.frame_unref(dst);
    engine.set(dst, Field::FrameFormat, frame.format as i64);
    engine.set(dst, Field::FramePts, frame.pts.unwrap_or(NOPTS_VALUE));
    if let Some(tb) = frame.time_base {
        engine.set(dst, Field::FrameTimeBaseNum, tb.num as i64);
        engine.set(dst, Field::FrameTimeBaseDen, tb.den as i64);
    }
    match frame.data {
        FrameData::Audio(audio) => copyin_audio(engine, dst, frame.format, audio),
        FrameData::Video(video) => copyin_video(engine, dst, frame.format, video),
    }
}

fn copyin_audio(engine: &mut dyn Engine, dst: Handle, format: i32, audio: AudioFrame) -> Result<()> {
    let sample_fmt = SampleFormat::from_raw(format as i64).ok_or(MarshalError::UnsupportedFormat {
        kind: "sample",
        format,
    })?;
    let channels = if audio.channels == 0 {
        channels_for(audio.channel_layout)
    } else {
        audio.channels
    };
    if channels == 0 {
        return Err(MarshalError::ShapeMismatch("audio frame without channels".into()));
    }
    let layout = if audio.channel_layout == 0 {
        channel_layout_for(channels)
    } else {
        audio.channel_layout
    };
    let bps = sample_fmt.bytes_per_sample();

    let nb_samples = match (&audio.samples, sample_fmt.is_planar()) {
        (AudioData::Planar(planes), true) => {
            if planes.len() != channels as usize {
                return Err(MarshalError::ShapeMismatch(format!(
                    "{} planes for {channels} channels",
                    planes.len()
                )));
            }
            let len = planes[0].len();
            if planes.iter().any(|p| p.len() != len) || len % bps != 0 {
                return Err(MarshalError::ShapeMismatch("uneven planar buffers".into()));
            }
            len / bps
        }
        (AudioData::Packed(buf), false) => {
            let per_sample = channels as usize * bps;
            if buf.len() % per_sample != 0 {
                return Err(MarshalError::ShapeMismatch(format!(
                    "{} bytes is not a whole number of {channels}-channel samples",
                    buf.len()
                )));
            }
            buf.len() / per_sample
        }
        (AudioData::Planar(_), false) => {
            return Err(MarshalError::ShapeMismatch(format!(
                "planar buffers for packed format {}",
                sample_fmt.name()
            )))
        }
        (AudioData::Packed(_), true) => {
            return Err(MarshalError::ShapeMismatch(format!(
                "packed buffer for planar format {}",
                sample_fmt.name()
            )))
        }
    };
    if audio.nb_samples != 0 && audio.nb_samples != nb_samples {
        return Err(MarshalError::ShapeMismatch(format!(
            "nb_samples {} but buffers hold {nb_samples}",
            audio.nb_samples
        )));
    }

    engine.set(dst, Field::FrameSampleRate, audio.sample_rate as i64);
    engine.set(dst, Field::FrameChannels, channels as i64);
    engine.set(dst, Field::FrameChannelLayout, layout as i64);
    engine.set(dst, Field::FrameNbSamples, nb_samples as i64);
    check("av_frame_get_buffer", engine.frame_get_buffer(dst, 0))?;

    let sources: Vec<&Buffer> = match &audio.samples {
        AudioData::Planar(planes) => planes.iter().collect(),
        AudioData::Packed(buf) => vec![buf],
    };
    for (index, src) in sources.into_iter().enumerate() {
        let target = engine
            .frame_data_mut(dst, index)
            .ok_or(MarshalError::NullHandle("frame plane"))?;
        if target.len() < src.len() {
            return Err(MarshalError::ShapeMismatch(format!(
                "engine plane {index} too small ({} < {})",
                target.len(),
                src.len()
            )));
        }
        target[..src.len()].copy_from_slice(src.as_slice());
    }
    Ok(())
}

fn packed_layout(desc: &PixFmtDescriptor, width: usize, height: usize) -> Vec<PlaneLayout> {
    let mut offset = 0;
    (0..desc.plane_count())
        .map(|p| {
            let (w, h) = desc.plane_extent(p, width, height);
            let entry = PlaneLayout { offset, stride: w };
            offset += w * h;
            entry
        })
        .collect()
}

fn copyin_video(engine: &mut dyn Engine, dst: Handle, format: i32, video: VideoFrame) -> Result<()> {
    let desc = engine
        .pix_fmt_descriptor(format)
        .ok_or(MarshalError::UnsupportedFormat { kind: "pixel", format })?;
    let width = video.width as usize;
    let height = video.height as usize;

    engine.set(dst, Field::FrameWidth, width as i64);
    engine.set(dst, Field::FrameHeight, height as i64);
    engine.set(dst, Field::FrameKeyFrame, video.key_frame as i64);
    engine.set(dst, Field::FramePictType, video.pict_type as i64);
    engine.set(dst, Field::FrameSampleAspectRatioNum, video.sample_aspect_ratio.num as i64);
    engine.set(dst, Field::FrameSampleAspectRatioDen, video.sample_aspect_ratio.den as i64);
    engine.set(dst, Field::FrameCropTop, video.crop.top as i64);
    engine.set(dst, Field::FrameCropBottom, video.crop.bottom as i64);
    engine.set(dst, Field::FrameCropLeft, video.crop.left as i64);
    engine.set(dst, Field::FrameCropRight, video.crop.right as i64);

    let (data, layout) = match &video.picture {
        Picture::Laid { data, layout } => (data, layout.clone()),
        Picture::Packed(data) => (data, packed_layout(&desc, width, height)),
        Picture::Image(image) => {
            if format != PixelFormat::Rgba.raw() {
                return Err(MarshalError::ShapeMismatch(
                    "pixel buffer for a non-RGBA frame".into(),
                ));
            }
            (&image.data, packed_layout(&desc, width, height))
        }
    };
    if layout.len() < desc.plane_count() {
        return Err(MarshalError::ShapeMismatch(format!(
            "{} layout entries for {} planes",
            layout.len(),
            desc.plane_count()
        )));
    }

    check("av_frame_get_buffer", engine.frame_get_buffer(dst, 0))?;

    let src = data.as_slice();
    for (p, entry) in layout.iter().take(desc.plane_count()).enumerate() {
        let (w, rows) = desc.plane_extent(p, width, height);
        if rows == 0 {
            continue;
        }
        let end = entry
            .stride
            .checked_mul(rows - 1)
            .and_then(|n| n.checked_add(entry.offset))
            .and_then(|n| n.checked_add(w));
        if entry.stride < w || end.map_or(true, |end| end > src.len()) {
            tracing::debug!(
                plane = p,
                offset = entry.offset,
                stride = entry.stride,
                rows,
                len = src.len(),
                "picture layout rejected"
            );
            return Err(MarshalError::ShapeMismatch(format!(
                "plane {p} layout exceeds the picture buffer"
            )));
        }
        let linesize = engine.frame_linesize(dst, p).max(0) as usize;
        let target = engine
            .frame_data_mut(dst, p)
            .ok_or(MarshalError::NullHandle("frame plane"))?;
        if linesize < w || target.len() < linesize * (rows - 1) + w {
            return Err(MarshalError::ShapeMismatch(format!(
                "engine plane {p} too small"
            )));
        }
        for y in 0..rows {
            let from = entry.offset + y * entry.stride;
            target[y * linesize..y * linesize + w].copy_from_slice(&src[from..from + w]);
        }
    }
    Ok(())
}
