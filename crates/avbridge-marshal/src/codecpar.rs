use avbridge_engine::{Engine, Field, Handle, MediaType};
use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::error::{check, MarshalError, Result};

/// Host-native copy of a codec parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecParameters {
    pub codec_type: MediaType,
    pub codec_id: i32,
    pub codec_tag: u32,
    pub format: i32,
    pub bit_rate: i64,
    pub width: i32,
    pub height: i32,
    pub channels: u32,
    pub channel_layout: u64,
    pub sample_rate: i32,
    pub frame_size: i32,
    pub extradata: Option<Buffer>,
}

impl CodecParameters {
    pub fn for_each_buffer_mut(&mut self, f: &mut dyn FnMut(&mut Buffer)) {
        if let Some(extradata) = &mut self.extradata {
            f(extradata);
        }
    }

    pub fn for_each_buffer(&self, f: &mut dyn FnMut(&Buffer)) {
        if let Some(extradata) = &self.extradata {
            f(extradata);
        }
    }
}

pub fn copyout_codecpar(engine: &dyn Engine, par: Handle) -> Result<CodecParameters> {
    if par.is_null() {
        return Err(MarshalError::NullHandle("codec parameters"));
    }
    let get = |field| engine.get(par, field);
    Ok(CodecParameters {
        codec_type: MediaType::from_raw(get(Field::ParCodecType)),
        codec_id: get(Field::ParCodecId) as i32,
        codec_tag: get(Field::ParCodecTag) as u32,
        format: get(Field::ParFormat) as i32,
        bit_rate: get(Field::ParBitRate),
        width: get(Field::ParWidth) as i32,
        height: get(Field::ParHeight) as i32,
        channels: get(Field::ParChannels) as u32,
        channel_layout: get(Field::ParChannelLayout) as u64,
        sample_rate: get(Field::ParSampleRate) as i32,
        frame_size: get(Field::ParFrameSize) as i32,
        extradata: engine
            .codecpar_extradata(par)
            .filter(|data| !data.is_empty())
            .map(Buffer::copy_from_slice),
    })
}

pub fn copyin_codecpar(engine: &mut dyn Engine, par: Handle, src: &CodecParameters) -> Result<()> {
    if par.is_null() {
        return Err(MarshalError::NullHandle("codec parameters"));
    }
    engine.set(par, Field::ParCodecType, src.codec_type as i64);
    engine.set(par, Field::ParCodecId, src.codec_id as i64);
    engine.set(par, Field::ParCodecTag, src.codec_tag as i64);
    engine.set(par, Field::ParFormat, src.format as i64);
    engine.set(par, Field::ParBitRate, src.bit_rate);
    engine.set(par, Field::ParWidth, src.width as i64);
    engine.set(par, Field::ParHeight, src.height as i64);
    engine.set(par, Field::ParChannels, src.channels as i64);
    engine.set(par, Field::ParChannelLayout, src.channel_layout as i64);
    engine.set(par, Field::ParSampleRate, src.sample_rate as i64);
    engine.set(par, Field::ParFrameSize, src.frame_size as i64);
    let extradata = src.extradata.as_ref().map(Buffer::as_slice);
    check("codecpar extradata", engine.codecpar_set_extradata(par, extradata))?;
    Ok(())
}
