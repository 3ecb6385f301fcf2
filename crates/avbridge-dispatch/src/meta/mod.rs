//! Metafunctions: multi-step engine workflows run as one call.
//!
//! Unlike primitives, a failing step here is an error carrying the engine
//! code, and temporary objects allocated along the way are released before
//! it is returned.

mod bsf;
mod codec;
mod filter;
mod format;

use avbridge_engine::{codes, Field, Handle, Rational};
use avbridge_marshal::{
    copyin_codecpar, copyin_frame, copyin_packet, copyout_codecpar, copyout_frame_as,
    copyout_packet_as, frame_video_packed_size, FrameCopyout, PacketCopyout, Value,
};

use crate::args::{opt_str, Args};
use crate::context::EngineContext;
use crate::error::{BridgeError, Result};
use crate::function::Builtin;

pub(crate) fn call(ctx: &mut EngineContext, builtin: Builtin, args: Vec<Value>) -> Result<Value> {
    use Builtin::*;

    let mut args = Args::new(builtin.name(), args);
    match builtin {
        InitEncoder => codec::init_encoder(ctx, args),
        InitDecoder => codec::init_decoder(ctx, args),
        FreeEncoder => codec::free_encoder(ctx, args),
        FreeDecoder => codec::free_decoder(ctx, args),
        EncodeMulti => codec::encode_multi(ctx, args),
        DecodeMulti => codec::decode_multi(ctx, args),
        InitMuxer => format::init_muxer(ctx, args),
        FreeMuxer => format::free_muxer(ctx, args),
        WriteMulti => format::write_multi(ctx, args),
        InitDemuxerFile => format::init_demuxer_file(ctx, args),
        ReadFrameMulti => format::read_frame_multi(ctx, args),
        InitFilterGraph => filter::init_filter_graph(ctx, args),
        FilterMulti => filter::filter_multi(ctx, args),
        InitBsf => bsf::init_bsf(ctx, args),
        BsfMulti => bsf::bsf_multi(ctx, args),
        FreeBsf => bsf::free_bsf(ctx, args),
        Error => {
            let code = args.int()?;
            Ok(Value::from(codes::describe(code as i32)))
        }

        CopyoutFrame | CopyoutFrameVideo | CopyoutFrameVideoPacked | CopyoutFrameImage
        | CopyoutFramePtr => {
            let mode = match builtin {
                CopyoutFrameVideo => FrameCopyout::Video,
                CopyoutFrameVideoPacked => FrameCopyout::VideoPacked,
                CopyoutFrameImage => FrameCopyout::ImageData,
                CopyoutFramePtr => FrameCopyout::Ptr,
                _ => FrameCopyout::Default,
            };
            let frame = args.handle()?;
            Ok(copyout_frame_as(ctx.engine_mut(), frame, mode)?)
        }
        FrameVideoPackedSize => {
            let frame = args.handle()?;
            Ok(Value::from(frame_video_packed_size(ctx.engine(), frame)?))
        }
        CopyinFrame => {
            let dst = args.handle()?;
            let src = args.next();
            let src = src.into_frame_ref().map_err(|e| args.bad(e))?;
            copyin_frame(ctx.engine_mut(), dst, src)?;
            Ok(Value::Null)
        }
        CopyoutPacket | CopyoutPacketPtr => {
            let mode = if builtin == CopyoutPacketPtr {
                PacketCopyout::Ptr
            } else {
                PacketCopyout::Default
            };
            let packet = args.handle()?;
            Ok(copyout_packet_as(ctx.engine_mut(), packet, mode)?)
        }
        CopyinPacket => {
            let dst = args.handle()?;
            let src = args.next();
            let src = src.into_packet_ref().map_err(|e| args.bad(e))?;
            copyin_packet(ctx.engine_mut(), dst, src)?;
            Ok(Value::Null)
        }
        CopyoutCodecpar => {
            let par = args.handle()?;
            Ok(Value::from(copyout_codecpar(ctx.engine(), par)?))
        }
        CopyinCodecpar => {
            let par = args.handle()?;
            let src = args.next();
            let src = src.into_codecpar().map_err(|e| args.bad(e))?;
            copyin_codecpar(ctx.engine_mut(), par, &src)?;
            Ok(Value::Null)
        }

        other => Err(BridgeError::UnknownFunction(other.name().to_string())),
    }
}

/// Frame copy-out mode named by `key` in a config map.
pub(super) fn frame_copyout(args: &Args, config: &Value, key: &str) -> Result<FrameCopyout> {
    match opt_str(config, key) {
        Some(name) => name.parse().map_err(|e| args.bad(e)),
        None => Ok(FrameCopyout::Default),
    }
}

pub(super) fn packet_copyout(args: &Args, config: &Value, key: &str) -> Result<PacketCopyout> {
    match opt_str(config, key) {
        Some(name) => name.parse().map_err(|e| args.bad(e)),
        None => Ok(PacketCopyout::Default),
    }
}

/// A boolean config is shorthand for `{fin: bool}`.
pub(super) fn config_map(config: Value) -> Value {
    match config {
        Value::Bool(fin) => Value::map([("fin", Value::Bool(fin))]),
        other => other,
    }
}

pub(super) fn rational_of(ctx: &EngineContext, handle: Handle, num: Field, den: Field) -> Rational {
    let engine = ctx.engine();
    Rational::new(engine.get(handle, num) as i32, engine.get(handle, den) as i32)
}

pub(super) fn set_rational(
    ctx: &mut EngineContext,
    handle: Handle,
    num: Field,
    den: Field,
    value: Rational,
) {
    let engine = ctx.engine_mut();
    engine.set(handle, num, value.num as i64);
    engine.set(handle, den, value.den as i64);
}

/// Stamp `time_base` on a copied-out frame that carries none.
pub(super) fn stamp_frame(ctx: &mut EngineContext, value: &mut Value, time_base: Rational) {
    if time_base.is_unset() {
        return;
    }
    match value {
        Value::Frame(frame) if frame.time_base.is_none() => frame.time_base = Some(time_base),
        &mut Value::Int(raw) => {
            let frame = Handle(raw as u32);
            if ctx.engine().get(frame, Field::FrameTimeBaseNum) == 0 {
                set_rational(ctx, frame, Field::FrameTimeBaseNum, Field::FrameTimeBaseDen, time_base);
            }
        }
        _ => {}
    }
}

/// Stamp `time_base` on a copied-out packet that carries none.
pub(super) fn stamp_packet(ctx: &mut EngineContext, value: &mut Value, time_base: Rational) {
    if time_base.is_unset() {
        return;
    }
    match value {
        Value::Packet(packet) if packet.time_base.is_none() => packet.time_base = Some(time_base),
        &mut Value::Int(raw) => {
            let packet = Handle(raw as u32);
            if ctx.engine().get(packet, Field::PacketTimeBaseNum) == 0 {
                set_rational(ctx, packet, Field::PacketTimeBaseNum, Field::PacketTimeBaseDen, time_base);
            }
        }
        _ => {}
    }
}
