use std::collections::{BTreeMap, HashMap};

use avbridge_engine::codes::{averror, is_again, EAGAIN, ENOMEM, NOPTS_VALUE};
use avbridge_engine::{Field, Handle, Rational};
use avbridge_marshal::{copyin_packet, copyout_packet_as, PacketRef, Value};

use super::codec::rescale_packet;
use super::{packet_copyout, rational_of, set_rational, stamp_packet};
use crate::args::{opt_bool, opt_int, opt_str, Args};
use crate::context::EngineContext;
use crate::error::{BridgeError, Result};

fn stream_time_base(ctx: &EngineContext, fmt_ctx: Handle, index: usize) -> Rational {
    let stream = ctx.engine().stream(fmt_ctx, index);
    if stream.is_null() {
        return Rational::default();
    }
    rational_of(ctx, stream, Field::StreamTimeBaseNum, Field::StreamTimeBaseDen)
}

/// `ff_init_muxer({format_name, filename, device, open, codecpars}, [[ctx, tb_num, tb_den]])
/// -> [oc, format_name, pb, streams]`
///
/// `pb` is the output context itself when the file was opened, 0 otherwise.
pub(super) fn init_muxer(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let opts = args.next();
    let stream_ctxs = args.list()?;
    let format_name = opt_str(&opts, "format_name").map(str::to_owned);
    let filename = opt_str(&opts, "filename").unwrap_or_default().to_owned();

    let oc = match ctx
        .engine_mut()
        .output_context_alloc(format_name.as_deref(), &filename)
    {
        Ok(oc) => oc,
        Err(code) => return Err(ctx.failure("failed to allocate output context", code)),
    };

    match setup_muxer(ctx, oc, &opts, &filename, stream_ctxs, &args) {
        Ok((streams, opened)) => {
            let name = ctx.engine().format_name(oc).unwrap_or_default().to_owned();
            tracing::debug!(format = %name, filename = %filename, streams = streams.len(), "muxer ready");
            let pb = if opened { oc } else { Handle::NULL };
            Ok(Value::List(vec![
                oc.into(),
                Value::Str(name),
                pb.into(),
                Value::from(streams),
            ]))
        }
        Err(error) => {
            ctx.engine_mut().format_context_free(oc);
            Err(error)
        }
    }
}

fn setup_muxer(
    ctx: &mut EngineContext,
    oc: Handle,
    opts: &Value,
    filename: &str,
    stream_ctxs: Vec<Value>,
    args: &Args,
) -> Result<(Vec<Handle>, bool)> {
    let copy_codecpars = opt_bool(opts, "codecpars");
    let mut streams = Vec::with_capacity(stream_ctxs.len());
    for entry in stream_ctxs {
        let entry = entry.into_list().map_err(|e| args.bad(e))?;
        let [source, num, den] = entry.as_slice() else {
            return Err(args.bad("stream entries are [ctx, time_base_num, time_base_den]"));
        };
        let source = source.as_handle().map_err(|e| args.bad(e))?;
        let time_base = Rational::new(
            num.as_int().map_err(|e| args.bad(e))? as i32,
            den.as_int().map_err(|e| args.bad(e))? as i32,
        );

        let engine = ctx.engine_mut();
        let stream = engine.new_stream(oc);
        if stream.is_null() {
            return Err(BridgeError::engine("could not allocate stream", averror(ENOMEM)));
        }
        let par = Handle(engine.get(stream, Field::StreamCodecpar) as u32);
        let code = if copy_codecpars {
            let code = engine.codecpar_copy(par, source);
            engine.set(par, Field::ParCodecTag, 0);
            code
        } else {
            engine.codecpar_from_context(par, source)
        };
        ctx.check("could not copy the stream parameters", code)?;
        set_rational(ctx, stream, Field::StreamTimeBaseNum, Field::StreamTimeBaseDen, time_base);
        streams.push(stream);
    }

    if opt_bool(opts, "device") {
        ctx.devices().make_writer(filename)?;
    }
    let opened = opt_bool(opts, "open");
    if opened {
        let code = ctx.engine_mut().io_open(oc, filename);
        ctx.check("could not open file", code)?;
    }
    Ok((streams, opened))
}

/// `ff_free_muxer(oc, pb)`
pub(super) fn free_muxer(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let oc = args.handle()?;
    let pb = args.handle()?;
    let engine = ctx.engine_mut();
    if !pb.is_null() {
        let code = engine.io_close(oc);
        if code < 0 {
            tracing::warn!(code, "closing muxer output failed");
        }
    }
    engine.format_context_free(oc);
    Ok(Value::Null)
}

/// `ff_write_multi(oc, pkt, packets, interleave = true)`
pub(super) fn write_multi(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let oc = args.handle()?;
    let pkt = args.handle()?;
    let packets = args.list()?;
    let interleave = args.bool_or(true)?;

    let mut time_bases: HashMap<usize, Rational> = HashMap::new();
    for src in packets {
        let src = src.into_packet_ref().map_err(|e| args.bad(e))?;
        let declared = match &src {
            PacketRef::Owned(packet) => packet.time_base,
            PacketRef::Native(_) => None,
        };
        copyin_packet(ctx.engine_mut(), pkt, src)?;
        let from = declared.unwrap_or_else(|| {
            rational_of(ctx, pkt, Field::PacketTimeBaseNum, Field::PacketTimeBaseDen)
        });
        if !from.is_unset() {
            let index = ctx.engine().get(pkt, Field::PacketStreamIndex).max(0) as usize;
            let to = *time_bases
                .entry(index)
                .or_insert_with(|| stream_time_base(ctx, oc, index));
            if !to.is_unset() {
                rescale_packet(ctx, pkt, from, to);
            }
        }
        let code = ctx.engine_mut().write_frame(oc, pkt, interleave);
        ctx.engine_mut().packet_unref(pkt);
        ctx.check("error writing packet", code)?;
    }
    Ok(Value::Null)
}

/// `ff_init_demuxer_file(filename, format | {format}) -> [fmt_ctx, streams]`
///
/// When probing stops on a not-ready device the partly opened input is
/// kept, and the next call for the same file resumes it.
pub(super) fn init_demuxer_file(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let filename = args.string()?;
    let format = match args.next() {
        Value::Str(format) => Some(format),
        opts => opt_str(&opts, "format").map(str::to_owned),
    };

    let ic = match ctx.pending_opens.remove(&filename) {
        Some(ic) => ic,
        None => match ctx.engine_mut().open_input(&filename, format.as_deref()) {
            Ok(ic) => ic,
            Err(code) => return Err(ctx.failure("could not open source file", code)),
        },
    };

    let code = ctx.engine_mut().find_stream_info(ic);
    if is_again(code) {
        tracing::trace!(filename = %filename, "stream info not ready");
        ctx.pending_opens.insert(filename, ic);
        return Err(BridgeError::engine("stream info not ready", code));
    }
    if code < 0 {
        let error = ctx.failure("could not find stream information", code);
        ctx.engine_mut().close_input(ic);
        return Err(error);
    }

    let nb_streams = ctx.engine().get(ic, Field::FmtNbStreams).max(0) as usize;
    let streams = (0..nb_streams)
        .map(|index| describe_stream(ctx, ic, index))
        .collect::<Vec<_>>();
    tracing::debug!(filename = %filename, streams = nb_streams, "demuxer ready");
    Ok(Value::List(vec![ic.into(), Value::List(streams)]))
}

fn describe_stream(ctx: &EngineContext, ic: Handle, index: usize) -> Value {
    let engine = ctx.engine();
    let stream = engine.stream(ic, index);
    let par = Handle(engine.get(stream, Field::StreamCodecpar) as u32);
    let time_base = rational_of(ctx, stream, Field::StreamTimeBaseNum, Field::StreamTimeBaseDen);
    let duration_tb = engine.get(stream, Field::StreamDuration);
    let duration = if duration_tb == NOPTS_VALUE || time_base.is_unset() {
        Value::Null
    } else {
        Value::Float(duration_tb as f64 * time_base.num as f64 / time_base.den as f64)
    };
    Value::map([
        ("ptr", stream.into()),
        ("index", Value::from(index)),
        ("codecpar", par.into()),
        ("codec_type", Value::Int(engine.get(par, Field::ParCodecType))),
        ("codec_id", Value::Int(engine.get(par, Field::ParCodecId))),
        ("time_base_num", Value::from(time_base.num)),
        ("time_base_den", Value::from(time_base.den)),
        ("duration_time_base", Value::Int(duration_tb)),
        ("duration", duration),
    ])
}

/// `ff_read_frame_multi(fmt_ctx, pkt, limit | {limit, unify, copyoutPacket})
/// -> [code, {stream index: packets}]`
///
/// Stops at the first negative read code, or with `EAGAIN` once `limit`
/// bytes have been collected.
pub(super) fn read_frame_multi(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let ic = args.handle()?;
    let pkt = args.handle()?;
    let opts = match args.next() {
        Value::Int(limit) => Value::map([("limit", Value::Int(limit))]),
        other => other,
    };
    let limit = opt_int(&opts, "limit").unwrap_or(0).max(0) as u64;
    let unify = opt_bool(&opts, "unify");
    let mode = packet_copyout(&args, &opts, "copyoutPacket")?;

    let mut collected: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut time_bases: HashMap<usize, Rational> = HashMap::new();
    let mut size = 0u64;
    let code = loop {
        let code = ctx.engine_mut().read_frame(ic, pkt);
        if code < 0 {
            if let err @ BridgeError::Host(_) = ctx.failure("read frame", code) {
                return Err(err);
            }
            break code;
        }

        let index = ctx.engine().get(pkt, Field::PacketStreamIndex).max(0) as usize;
        let mut packet = copyout_packet_as(ctx.engine_mut(), pkt, mode)?;
        let time_base = *time_bases
            .entry(index)
            .or_insert_with(|| stream_time_base(ctx, ic, index));
        stamp_packet(ctx, &mut packet, time_base);

        let key = if unify { 0 } else { index };
        collected.entry(key.to_string()).or_default().push(packet);
        size += ctx.engine().get(pkt, Field::PacketSize).max(0) as u64;
        ctx.engine_mut().packet_unref(pkt);
        if limit > 0 && size >= limit {
            break averror(EAGAIN);
        }
    };
    let collected = collected
        .into_iter()
        .map(|(key, packets)| (key, Value::List(packets)))
        .collect();
    Ok(Value::List(vec![Value::Int(code as i64), Value::Map(collected)]))
}
