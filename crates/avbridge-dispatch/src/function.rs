//! The closed set of callable functions.
//!
//! Built-in functions come from one table; field accessors are derived from
//! the engine's field table: the getter under the field's accessor name,
//! the setter under that name plus `_s`. Any other name is rejected.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use avbridge_engine::Field;
use serde::Serialize;

use crate::error::BridgeError;

/// How a function is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// One raw engine primitive. Never serialized; codes stay raw.
    Primitive,
    /// A device table operation. Runs wherever the device table lives.
    Device,
    /// A multi-step engine workflow. Runs through the call serializer and
    /// turns failure codes into errors.
    Meta,
}

impl FunctionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FunctionKind::Primitive => "primitive",
            FunctionKind::Device => "device",
            FunctionKind::Meta => "meta",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! builtins {
    ($($variant:ident => $name:literal, $kind:ident;)*) => {
        /// A built-in (non-accessor) function.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Builtin {
            $($variant,)*
        }

        impl Builtin {
            /// Every built-in, in table order.
            pub const ALL: &'static [Builtin] = &[$(Builtin::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Builtin::$variant => $name,)*
                }
            }

            pub fn kind(self) -> FunctionKind {
                match self {
                    $(Builtin::$variant => FunctionKind::$kind,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Builtin> {
                match name {
                    $($name => Some(Builtin::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

builtins! {
    FrameAlloc => "av_frame_alloc", Primitive;
    FrameFree => "av_frame_free", Primitive;
    FrameUnref => "av_frame_unref", Primitive;
    FrameClone => "av_frame_clone", Primitive;
    FrameGetBuffer => "av_frame_get_buffer", Primitive;
    FrameMakeWritable => "av_frame_make_writable", Primitive;
    PacketAlloc => "av_packet_alloc", Primitive;
    PacketFree => "av_packet_free", Primitive;
    PacketUnref => "av_packet_unref", Primitive;
    PacketClone => "av_packet_clone", Primitive;
    FindEncoderByName => "avcodec_find_encoder_by_name", Primitive;
    FindDecoderByName => "avcodec_find_decoder_by_name", Primitive;
    FindDecoder => "avcodec_find_decoder", Primitive;
    CodecContextAlloc => "avcodec_alloc_context3", Primitive;
    CodecContextFree => "avcodec_free_context", Primitive;
    CodecOpen => "avcodec_open2", Primitive;
    SendFrame => "avcodec_send_frame", Primitive;
    ReceivePacket => "avcodec_receive_packet", Primitive;
    SendPacket => "avcodec_send_packet", Primitive;
    ReceiveFrame => "avcodec_receive_frame", Primitive;
    CodecparAlloc => "avcodec_parameters_alloc", Primitive;
    CodecparFree => "avcodec_parameters_free", Primitive;
    CodecparFromContext => "avcodec_parameters_from_context", Primitive;
    CodecparToContext => "avcodec_parameters_to_context", Primitive;
    CodecparCopy => "avcodec_parameters_copy", Primitive;
    OutputContextAlloc => "avformat_alloc_output_context2", Primitive;
    NewStream => "avformat_new_stream", Primitive;
    Stream => "AVFormatContext_streams_a", Primitive;
    IoOpen => "avio_open2", Primitive;
    IoClose => "avio_close", Primitive;
    WriteHeader => "avformat_write_header", Primitive;
    WriteFrame => "av_write_frame", Primitive;
    InterleavedWriteFrame => "av_interleaved_write_frame", Primitive;
    WriteTrailer => "av_write_trailer", Primitive;
    FormatContextFree => "avformat_free_context", Primitive;
    OpenInput => "avformat_open_input", Primitive;
    FindStreamInfo => "avformat_find_stream_info", Primitive;
    ReadFrame => "av_read_frame", Primitive;
    CloseInput => "avformat_close_input", Primitive;
    BuffersrcAddFrame => "av_buffersrc_add_frame_flags", Primitive;
    BuffersinkGetFrame => "av_buffersink_get_frame", Primitive;
    FilterGraphFree => "avfilter_graph_free", Primitive;
    BsfSendPacket => "av_bsf_send_packet", Primitive;
    BsfReceivePacket => "av_bsf_receive_packet", Primitive;

    MkReaderDev => "mkreaderdev", Device;
    MkBlockReaderDev => "mkblockreaderdev", Device;
    MkWriterDev => "mkwriterdev", Device;
    MkStreamWriterDev => "mkstreamwriterdev", Device;
    MountWriterFs => "mountwriterfs", Device;
    UnmountWriterFs => "unmountwriterfs", Device;
    MkReadaheadFile => "mkreadaheadfile", Device;
    UnlinkReadaheadFile => "unlinkreadaheadfile", Device;
    MkFsfhFile => "mkfsfhfile", Device;
    UnlinkFsfhFile => "unlinkfsfhfile", Device;
    MkWorkerfsFile => "mkworkerfsfile", Device;
    UnlinkWorkerfsFile => "unlinkworkerfsfile", Device;
    Unlink => "unlink", Device;
    ReadFile => "readFile", Device;
    WriteFile => "writeFile", Device;
    ReaderDevSend => "ff_reader_dev_send", Device;
    BlockReaderDevSend => "ff_block_reader_dev_send", Device;
    ReaderDevReady => "ff_reader_dev_ready", Device;
    ReaderDevWait => "ff_reader_dev_wait", Device;
    ReaderDevWaiting => "ff_reader_dev_waiting", Device;

    InitEncoder => "ff_init_encoder", Meta;
    InitDecoder => "ff_init_decoder", Meta;
    FreeEncoder => "ff_free_encoder", Meta;
    FreeDecoder => "ff_free_decoder", Meta;
    EncodeMulti => "ff_encode_multi", Meta;
    DecodeMulti => "ff_decode_multi", Meta;
    InitMuxer => "ff_init_muxer", Meta;
    FreeMuxer => "ff_free_muxer", Meta;
    WriteMulti => "ff_write_multi", Meta;
    InitDemuxerFile => "ff_init_demuxer_file", Meta;
    ReadFrameMulti => "ff_read_frame_multi", Meta;
    InitFilterGraph => "ff_init_filter_graph", Meta;
    FilterMulti => "ff_filter_multi", Meta;
    InitBsf => "ff_init_bsf", Meta;
    BsfMulti => "ff_bsf_multi", Meta;
    FreeBsf => "ff_free_bsf", Meta;
    Error => "ff_error", Meta;
    CopyoutFrame => "ff_copyout_frame", Meta;
    CopyoutFrameVideo => "ff_copyout_frame_video", Meta;
    CopyoutFrameVideoPacked => "ff_copyout_frame_video_packed", Meta;
    CopyoutFrameImage => "ff_copyout_frame_video_imagedata", Meta;
    CopyoutFramePtr => "ff_copyout_frame_ptr", Meta;
    FrameVideoPackedSize => "ff_frame_video_packed_size", Meta;
    CopyinFrame => "ff_copyin_frame", Meta;
    CopyoutPacket => "ff_copyout_packet", Meta;
    CopyoutPacketPtr => "ff_copyout_packet_ptr", Meta;
    CopyinPacket => "ff_copyin_packet", Meta;
    CopyoutCodecpar => "ff_copyout_codecpar", Meta;
    CopyinCodecpar => "ff_copyin_codecpar", Meta;
}

/// Any callable function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Builtin(Builtin),
    /// Field getter, `(handle) -> int`.
    Get(Field),
    /// Field setter, `(handle, value) -> null`.
    Set(Field),
}

impl Function {
    pub fn from_name(name: &str) -> Option<Function> {
        if let Some(builtin) = Builtin::from_name(name) {
            return Some(Function::Builtin(builtin));
        }
        if let Some(field) = Field::from_name(name) {
            return Some(Function::Get(field));
        }
        name.strip_suffix("_s")
            .and_then(Field::from_name)
            .map(Function::Set)
    }

    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Function::Builtin(builtin) => Cow::Borrowed(builtin.name()),
            Function::Get(field) => Cow::Borrowed(field.name()),
            Function::Set(field) => Cow::Owned(format!("{}_s", field.name())),
        }
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            Function::Builtin(builtin) => builtin.kind(),
            Function::Get(_) | Function::Set(_) => FunctionKind::Primitive,
        }
    }

    /// Every function: built-ins, then each field's getter and setter.
    pub fn all() -> impl Iterator<Item = Function> {
        Builtin::ALL.iter().copied().map(Function::Builtin).chain(
            Field::ALL
                .iter()
                .flat_map(|&field| [Function::Get(field), Function::Set(field)]),
        )
    }
}

impl From<Builtin> for Function {
    fn from(builtin: Builtin) -> Self {
        Function::Builtin(builtin)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Function {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Function::from_name(s).ok_or_else(|| BridgeError::UnknownFunction(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn every_name_resolves_to_itself() {
        for function in Function::all() {
            assert_eq!(Function::from_name(&function.name()), Some(function));
        }
    }

    #[test]
    fn names_are_unique() {
        let names: Vec<_> = Function::all().map(|f| f.name().into_owned()).collect();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn accessors_follow_the_field_table() {
        assert_eq!(
            Function::from_name("AVFrame_pts"),
            Some(Function::Get(Field::FramePts))
        );
        assert_eq!(
            Function::from_name("AVFrame_pts_s"),
            Some(Function::Set(Field::FramePts))
        );
        assert_eq!(Function::from_name("AVFrame_bogus_s"), None);
        assert!("nope".parse::<Function>().is_err());
    }

    #[test]
    fn kinds() {
        assert_eq!(
            Function::from(Builtin::InitDemuxerFile).kind(),
            FunctionKind::Meta
        );
        assert_eq!(Function::from_name("mkreaderdev").unwrap().kind(), FunctionKind::Device);
        assert_eq!(Function::Set(Field::PacketFlags).kind(), FunctionKind::Primitive);
    }
}
