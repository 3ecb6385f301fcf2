//! Per-field accessors of engine objects.
//!
//! Every field has an exported accessor name. A getter is exposed under that
//! name and a setter under the name plus `_s`, so the set of valid accessor
//! names is fixed by this table.

/// Kind of engine object a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Frame,
    Packet,
    CodecContext,
    CodecParameters,
    Stream,
    FormatContext,
}

macro_rules! fields {
    ($($variant:ident => $name:literal, $owner:ident;)*) => {
        /// Addressable field of an engine object.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Field {
            $($variant,)*
        }

        impl Field {
            /// Every field, in table order.
            pub const ALL: &'static [Field] = &[$(Field::$variant,)*];

            /// Exported accessor name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Field::$variant => $name,)*
                }
            }

            /// Object kind this field lives on.
            pub fn owner(self) -> Owner {
                match self {
                    $(Field::$variant => Owner::$owner,)*
                }
            }

            /// Look up a field by accessor name.
            pub fn from_name(name: &str) -> Option<Field> {
                match name {
                    $($name => Some(Field::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

fields! {
    FrameFormat => "AVFrame_format", Frame;
    FrameNbSamples => "AVFrame_nb_samples", Frame;
    FrameChannels => "AVFrame_channels", Frame;
    FrameChannelLayout => "AVFrame_channel_layout", Frame;
    FrameSampleRate => "AVFrame_sample_rate", Frame;
    FramePts => "AVFrame_pts", Frame;
    FrameTimeBaseNum => "AVFrame_time_base_num", Frame;
    FrameTimeBaseDen => "AVFrame_time_base_den", Frame;
    FrameWidth => "AVFrame_width", Frame;
    FrameHeight => "AVFrame_height", Frame;
    FrameKeyFrame => "AVFrame_key_frame", Frame;
    FramePictType => "AVFrame_pict_type", Frame;
    FrameSampleAspectRatioNum => "AVFrame_sample_aspect_ratio_num", Frame;
    FrameSampleAspectRatioDen => "AVFrame_sample_aspect_ratio_den", Frame;
    FrameCropTop => "AVFrame_crop_top", Frame;
    FrameCropBottom => "AVFrame_crop_bottom", Frame;
    FrameCropLeft => "AVFrame_crop_left", Frame;
    FrameCropRight => "AVFrame_crop_right", Frame;

    PacketPts => "AVPacket_pts", Packet;
    PacketDts => "AVPacket_dts", Packet;
    PacketDuration => "AVPacket_duration", Packet;
    PacketStreamIndex => "AVPacket_stream_index", Packet;
    PacketFlags => "AVPacket_flags", Packet;
    PacketSize => "AVPacket_size", Packet;
    PacketTimeBaseNum => "AVPacket_time_base_num", Packet;
    PacketTimeBaseDen => "AVPacket_time_base_den", Packet;

    CtxCodecId => "AVCodecContext_codec_id", CodecContext;
    CtxCodecType => "AVCodecContext_codec_type", CodecContext;
    CtxBitRate => "AVCodecContext_bit_rate", CodecContext;
    CtxSampleFmt => "AVCodecContext_sample_fmt", CodecContext;
    CtxSampleRate => "AVCodecContext_sample_rate", CodecContext;
    CtxChannels => "AVCodecContext_channels", CodecContext;
    CtxChannelLayout => "AVCodecContext_channel_layout", CodecContext;
    CtxFrameSize => "AVCodecContext_frame_size", CodecContext;
    CtxWidth => "AVCodecContext_width", CodecContext;
    CtxHeight => "AVCodecContext_height", CodecContext;
    CtxPixFmt => "AVCodecContext_pix_fmt", CodecContext;
    CtxTimeBaseNum => "AVCodecContext_time_base_num", CodecContext;
    CtxTimeBaseDen => "AVCodecContext_time_base_den", CodecContext;

    ParCodecType => "AVCodecParameters_codec_type", CodecParameters;
    ParCodecId => "AVCodecParameters_codec_id", CodecParameters;
    ParCodecTag => "AVCodecParameters_codec_tag", CodecParameters;
    ParFormat => "AVCodecParameters_format", CodecParameters;
    ParBitRate => "AVCodecParameters_bit_rate", CodecParameters;
    ParWidth => "AVCodecParameters_width", CodecParameters;
    ParHeight => "AVCodecParameters_height", CodecParameters;
    ParChannels => "AVCodecParameters_channels", CodecParameters;
    ParChannelLayout => "AVCodecParameters_channel_layout", CodecParameters;
    ParSampleRate => "AVCodecParameters_sample_rate", CodecParameters;
    ParFrameSize => "AVCodecParameters_frame_size", CodecParameters;

    StreamIndex => "AVStream_index", Stream;
    StreamCodecpar => "AVStream_codecpar", Stream;
    StreamTimeBaseNum => "AVStream_time_base_num", Stream;
    StreamTimeBaseDen => "AVStream_time_base_den", Stream;
    StreamDuration => "AVStream_duration", Stream;

    FmtNbStreams => "AVFormatContext_nb_streams", FormatContext;
}
