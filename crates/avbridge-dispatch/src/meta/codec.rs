use avbridge_engine::codes::{averror, is_again, is_eof, AVERROR_NOT_FOUND, ENOMEM, NOPTS_VALUE};
use avbridge_engine::{rescale, Field, Handle, Rational};
use avbridge_marshal::{
    copyin_codecpar, copyin_frame, copyin_packet, copyout_frame_as, copyout_packet_as, FrameRef,
    PacketRef, Value,
};

use super::{
    config_map, frame_copyout, packet_copyout, rational_of, set_rational, stamp_frame, stamp_packet,
};
use crate::args::{opt_bool, opt_rational, Args};
use crate::context::EngineContext;
use crate::error::{BridgeError, Result};

const DEFAULT_TIME_BASE: Rational = Rational::new(1, 1000);

fn ctx_time_base(ctx: &EngineContext, c: Handle) -> Rational {
    rational_of(ctx, c, Field::CtxTimeBaseNum, Field::CtxTimeBaseDen)
}

pub(super) fn rescale_frame(ctx: &mut EngineContext, frame: Handle, from: Rational, to: Rational) {
    let engine = ctx.engine_mut();
    let pts = engine.get(frame, Field::FramePts);
    if pts != NOPTS_VALUE {
        engine.set(frame, Field::FramePts, rescale(pts, from, to));
    }
    set_rational(ctx, frame, Field::FrameTimeBaseNum, Field::FrameTimeBaseDen, to);
}

pub(super) fn rescale_packet(ctx: &mut EngineContext, packet: Handle, from: Rational, to: Rational) {
    let engine = ctx.engine_mut();
    for field in [Field::PacketPts, Field::PacketDts] {
        let ts = engine.get(packet, field);
        if ts != NOPTS_VALUE {
            engine.set(packet, field, rescale(ts, from, to));
        }
    }
    let duration = engine.get(packet, Field::PacketDuration);
    if duration > 0 {
        engine.set(packet, Field::PacketDuration, rescale(duration, from, to));
    }
    set_rational(ctx, packet, Field::PacketTimeBaseNum, Field::PacketTimeBaseDen, to);
}

/// Copy a frame record or native frame into `dst` and move its timestamps
/// to `to` when it names its own time base.
pub(super) fn load_frame(
    ctx: &mut EngineContext,
    dst: Handle,
    src: Value,
    to: Rational,
    args: &Args,
) -> Result<()> {
    let src = src.into_frame_ref().map_err(|e| args.bad(e))?;
    let declared = match &src {
        FrameRef::Owned(frame) => frame.time_base,
        FrameRef::Native(_) => None,
    };
    copyin_frame(ctx.engine_mut(), dst, src)?;
    let from = declared
        .unwrap_or_else(|| rational_of(ctx, dst, Field::FrameTimeBaseNum, Field::FrameTimeBaseDen));
    if !to.is_unset() && !from.is_unset() {
        rescale_frame(ctx, dst, from, to);
    }
    Ok(())
}

pub(super) fn load_packet(
    ctx: &mut EngineContext,
    dst: Handle,
    src: Value,
    to: Rational,
    args: &Args,
) -> Result<()> {
    let src = src.into_packet_ref().map_err(|e| args.bad(e))?;
    let declared = match &src {
        PacketRef::Owned(packet) => packet.time_base,
        PacketRef::Native(_) => None,
    };
    copyin_packet(ctx.engine_mut(), dst, src)?;
    let from = declared.unwrap_or_else(|| {
        rational_of(ctx, dst, Field::PacketTimeBaseNum, Field::PacketTimeBaseDen)
    });
    if !to.is_unset() && !from.is_unset() {
        rescale_packet(ctx, dst, from, to);
    }
    Ok(())
}

/// `ff_init_encoder(name, {ctx, time_base, options}) -> [codec, c, frame, pkt, frame_size]`
pub(super) fn init_encoder(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let name = args.string()?;
    let opts = args.next();

    let codec = ctx.engine().find_encoder_by_name(&name);
    if codec.is_null() {
        return Err(BridgeError::engine(format!("encoder {name} not found"), AVERROR_NOT_FOUND));
    }
    let c = ctx.engine_mut().codec_context_alloc(codec);
    if c.is_null() {
        return Err(BridgeError::engine("could not allocate codec context", averror(ENOMEM)));
    }

    let result = configure_encoder(ctx, c, codec, &opts, &args);
    if let Err(error) = result {
        ctx.engine_mut().codec_context_free(c);
        return Err(error);
    }

    let engine = ctx.engine_mut();
    let frame = engine.frame_alloc();
    let pkt = engine.packet_alloc();
    let frame_size = engine.get(c, Field::CtxFrameSize);
    tracing::debug!(encoder = %name, frame_size, "encoder ready");
    Ok(Value::List(vec![
        codec.into(),
        c.into(),
        frame.into(),
        pkt.into(),
        Value::Int(frame_size),
    ]))
}

fn configure_encoder(
    ctx: &mut EngineContext,
    c: Handle,
    codec: Handle,
    opts: &Value,
    args: &Args,
) -> Result<()> {
    if let Some(Value::Map(props)) = opts.get("ctx") {
        for (prop, value) in props {
            let accessor = format!("AVCodecContext_{prop}");
            let field = Field::from_name(&accessor)
                .ok_or_else(|| args.bad(format_args!("unknown codec context property {prop}")))?;
            let raw = match value {
                Value::Float(f) => *f as i64,
                other => other.as_int().map_err(|e| args.bad(e))?,
            };
            ctx.engine_mut().set(c, field, raw);
        }
    }
    let time_base = opt_rational(opts, "time_base").unwrap_or(DEFAULT_TIME_BASE);
    set_rational(ctx, c, Field::CtxTimeBaseNum, Field::CtxTimeBaseDen, time_base);

    let options = match opts.get("options") {
        Some(Value::Map(map)) => map
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::Str(s) => s.clone(),
                    other => other.as_int().map(|i| i.to_string()).map_err(|e| args.bad(e))?,
                };
                Ok((k.clone(), text))
            })
            .collect::<Result<Vec<_>>>()?,
        _ => Vec::new(),
    };
    let code = ctx.engine_mut().codec_open(c, codec, &options);
    ctx.check("could not open codec", code)?;
    Ok(())
}

/// `ff_init_decoder(name | id, codecpar | {codecpar, time_base}) -> [codec, c, pkt, frame]`
pub(super) fn init_decoder(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let name = args.next();
    let config = match args.next() {
        Value::Int(par) => Value::map([("codecpar", Value::Int(par))]),
        other => other,
    };

    let codec = match &name {
        Value::Str(name) => ctx.engine().find_decoder_by_name(name),
        other => {
            let id = other.as_int().map_err(|e| args.bad(e))?;
            ctx.engine().find_decoder(id as i32)
        }
    };
    if codec.is_null() {
        return Err(BridgeError::engine("decoder not found", AVERROR_NOT_FOUND));
    }
    let c = ctx.engine_mut().codec_context_alloc(codec);
    if c.is_null() {
        return Err(BridgeError::engine("could not allocate codec context", averror(ENOMEM)));
    }

    if let Err(error) = configure_decoder(ctx, c, codec, config, &args) {
        ctx.engine_mut().codec_context_free(c);
        return Err(error);
    }

    let engine = ctx.engine_mut();
    let pkt = engine.packet_alloc();
    let frame = engine.frame_alloc();
    Ok(Value::List(vec![codec.into(), c.into(), pkt.into(), frame.into()]))
}

fn configure_decoder(
    ctx: &mut EngineContext,
    c: Handle,
    codec: Handle,
    config: Value,
    args: &Args,
) -> Result<()> {
    let codec_id = ctx.engine().get(c, Field::CtxCodecId);
    match config.get("codecpar") {
        Some(Value::CodecParameters(record)) => {
            let par = ctx.engine_mut().codecpar_alloc();
            let copied = copyin_codecpar(ctx.engine_mut(), par, record);
            let code = match copied {
                Ok(()) => ctx.engine_mut().codecpar_to_context(c, par),
                Err(error) => {
                    ctx.engine_mut().codecpar_free(par);
                    return Err(error.into());
                }
            };
            ctx.engine_mut().codecpar_free(par);
            ctx.check("could not set codec parameters", code)?;
        }
        Some(other) => {
            let par = other.as_handle().map_err(|e| args.bad(e))?;
            if !par.is_null() {
                let code = ctx.engine_mut().codecpar_to_context(c, par);
                ctx.check("could not set codec parameters", code)?;
            }
        }
        None => {}
    }
    if ctx.engine().get(c, Field::CtxCodecId) == 0 {
        ctx.engine_mut().set(c, Field::CtxCodecId, codec_id);
    }
    if let Some(time_base) = opt_rational(&config, "time_base") {
        set_rational(ctx, c, Field::CtxTimeBaseNum, Field::CtxTimeBaseDen, time_base);
    }
    let code = ctx.engine_mut().codec_open(c, codec, &[]);
    ctx.check("could not open codec", code)?;
    Ok(())
}

/// `ff_free_encoder(c, frame, pkt)`
pub(super) fn free_encoder(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let c = args.handle()?;
    let frame = args.handle()?;
    let pkt = args.handle()?;
    let engine = ctx.engine_mut();
    engine.frame_free(frame);
    engine.packet_free(pkt);
    engine.codec_context_free(c);
    Ok(Value::Null)
}

/// `ff_free_decoder(c, pkt, frame)`
pub(super) fn free_decoder(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let c = args.handle()?;
    let pkt = args.handle()?;
    let frame = args.handle()?;
    let engine = ctx.engine_mut();
    engine.packet_free(pkt);
    engine.frame_free(frame);
    engine.codec_context_free(c);
    Ok(Value::Null)
}

/// `ff_encode_multi(c, frame, pkt, frames, fin | {fin, copyoutPacket}) -> packets`
pub(super) fn encode_multi(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let c = args.handle()?;
    let frame = args.handle()?;
    let pkt = args.handle()?;
    let frames = args.list()?;
    let config = config_map(args.next());
    let mode = packet_copyout(&args, &config, "copyoutPacket")?;
    let time_base = ctx_time_base(ctx, c);

    let mut out = Vec::new();
    let inputs = frames.into_iter().map(Some).chain(opt_bool(&config, "fin").then_some(None));
    for input in inputs {
        let code = match input {
            Some(src) => {
                load_frame(ctx, frame, src, time_base, &args)?;
                let code = ctx.engine_mut().send_frame(c, Some(frame));
                ctx.engine_mut().frame_unref(frame);
                code
            }
            None => ctx.engine_mut().send_frame(c, None),
        };
        ctx.check("error sending a frame to the encoder", code)?;

        loop {
            let code = ctx.engine_mut().receive_packet(c, pkt);
            if is_again(code) || is_eof(code) {
                break;
            }
            ctx.check("error encoding", code)?;
            let mut packet = copyout_packet_as(ctx.engine_mut(), pkt, mode)?;
            stamp_packet(ctx, &mut packet, time_base);
            out.push(packet);
            ctx.engine_mut().packet_unref(pkt);
        }
    }
    Ok(Value::List(out))
}

/// `ff_decode_multi(c, pkt, frame, packets, fin | {fin, ignoreErrors, copyoutFrame}) -> frames`
pub(super) fn decode_multi(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let c = args.handle()?;
    let pkt = args.handle()?;
    let frame = args.handle()?;
    let packets = args.list()?;
    let config = config_map(args.next());
    let mode = frame_copyout(&args, &config, "copyoutFrame")?;
    let ignore_errors = opt_bool(&config, "ignoreErrors");
    let time_base = ctx_time_base(ctx, c);

    let mut out = Vec::new();
    let inputs = packets.into_iter().map(Some).chain(opt_bool(&config, "fin").then_some(None));
    for input in inputs {
        let code = match input {
            Some(src) => {
                load_packet(ctx, pkt, src, time_base, &args)?;
                let code = ctx.engine_mut().send_packet(c, Some(pkt));
                ctx.engine_mut().packet_unref(pkt);
                code
            }
            None => ctx.engine_mut().send_packet(c, None),
        };
        if code < 0 {
            if ignore_errors {
                tracing::warn!(code, "decoder rejected a packet; skipped");
                continue;
            }
            return Err(ctx.failure("error submitting a packet to the decoder", code));
        }

        loop {
            let code = ctx.engine_mut().receive_frame(c, frame);
            if is_again(code) || is_eof(code) {
                break;
            }
            ctx.check("error decoding", code)?;
            let mut decoded = copyout_frame_as(ctx.engine_mut(), frame, mode)?;
            stamp_frame(ctx, &mut decoded, time_base);
            out.push(decoded);
            ctx.engine_mut().frame_unref(frame);
        }
    }
    Ok(Value::List(out))
}
