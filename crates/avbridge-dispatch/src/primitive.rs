//! Raw engine primitives.
//!
//! Each call maps onto one [`Engine`](avbridge_engine::Engine) method.
//! Handles and status codes come back as integers, unchanged: a negative
//! code is a value here, not an error. Constructors that can fail return
//! the new handle on success and the negative code otherwise.

use avbridge_engine::{Field, Handle};
use avbridge_marshal::Value;

use crate::args::Args;
use crate::context::EngineContext;
use crate::error::{BridgeError, Result};
use crate::function::Builtin;

pub(crate) fn get(ctx: &mut EngineContext, field: Field, args: Vec<Value>) -> Result<Value> {
    let mut args = Args::new(field.name(), args);
    let handle = args.handle()?;
    Ok(Value::Int(ctx.engine().get(handle, field)))
}

pub(crate) fn set(ctx: &mut EngineContext, field: Field, args: Vec<Value>) -> Result<Value> {
    let mut args = Args::new(field.name(), args);
    let handle = args.handle()?;
    let value = args.int()?;
    ctx.engine_mut().set(handle, field, value);
    Ok(Value::Null)
}

fn handle(h: Handle) -> Value {
    Value::from(h)
}

fn code(c: i32) -> Value {
    Value::Int(c as i64)
}

fn created(result: std::result::Result<Handle, i32>) -> Value {
    match result {
        Ok(h) => handle(h),
        Err(c) => code(c),
    }
}

/// Null handle arguments stand for "no object" (flush requests).
fn optional(h: Handle) -> Option<Handle> {
    (!h.is_null()).then_some(h)
}

/// Codec options as a map of strings or numbers.
fn codec_options(args: &Args, value: Value) -> Result<Vec<(String, String)>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let map = value.as_map().map_err(|e| args.bad(e))?;
    map.iter()
        .map(|(key, value)| {
            let text = match value {
                Value::Str(s) => s.clone(),
                Value::Int(i) => i.to_string(),
                Value::Float(f) => f.to_string(),
                Value::Bool(b) => (*b as i32).to_string(),
                other => return Err(args.bad(format_args!("option {key} is a {}", other.kind()))),
            };
            Ok((key.clone(), text))
        })
        .collect()
}

pub(crate) fn call(ctx: &mut EngineContext, builtin: Builtin, args: Vec<Value>) -> Result<Value> {
    use Builtin::*;

    let mut args = Args::new(builtin.name(), args);
    let engine = ctx.engine_mut();
    let value = match builtin {
        FrameAlloc => handle(engine.frame_alloc()),
        FrameFree => {
            engine.frame_free(args.handle()?);
            Value::Null
        }
        FrameUnref => {
            engine.frame_unref(args.handle()?);
            Value::Null
        }
        FrameClone => handle(engine.frame_clone(args.handle()?)),
        FrameGetBuffer => {
            let frame = args.handle()?;
            let align = args.int_or(0)? as i32;
            code(engine.frame_get_buffer(frame, align))
        }
        FrameMakeWritable => code(engine.frame_make_writable(args.handle()?)),

        PacketAlloc => handle(engine.packet_alloc()),
        PacketFree => {
            engine.packet_free(args.handle()?);
            Value::Null
        }
        PacketUnref => {
            engine.packet_unref(args.handle()?);
            Value::Null
        }
        PacketClone => handle(engine.packet_clone(args.handle()?)),

        FindEncoderByName => handle(engine.find_encoder_by_name(&args.string()?)),
        FindDecoderByName => handle(engine.find_decoder_by_name(&args.string()?)),
        FindDecoder => handle(engine.find_decoder(args.int()? as i32)),
        CodecContextAlloc => handle(engine.codec_context_alloc(args.handle()?)),
        CodecContextFree => {
            engine.codec_context_free(args.handle()?);
            Value::Null
        }
        CodecOpen => {
            let ctx_handle = args.handle()?;
            let codec = args.handle()?;
            let raw = args.next();
            let options = codec_options(&args, raw)?;
            code(engine.codec_open(ctx_handle, codec, &options))
        }
        SendFrame => {
            let c = args.handle()?;
            let frame = optional(args.handle()?);
            code(engine.send_frame(c, frame))
        }
        ReceivePacket => {
            let c = args.handle()?;
            code(engine.receive_packet(c, args.handle()?))
        }
        SendPacket => {
            let c = args.handle()?;
            let packet = optional(args.handle()?);
            code(engine.send_packet(c, packet))
        }
        ReceiveFrame => {
            let c = args.handle()?;
            code(engine.receive_frame(c, args.handle()?))
        }

        CodecparAlloc => handle(engine.codecpar_alloc()),
        CodecparFree => {
            engine.codecpar_free(args.handle()?);
            Value::Null
        }
        CodecparFromContext => {
            let par = args.handle()?;
            code(engine.codecpar_from_context(par, args.handle()?))
        }
        CodecparToContext => {
            let c = args.handle()?;
            code(engine.codecpar_to_context(c, args.handle()?))
        }
        CodecparCopy => {
            let dst = args.handle()?;
            code(engine.codecpar_copy(dst, args.handle()?))
        }

        OutputContextAlloc => {
            let format_name = args.opt_string()?;
            let filename = args.string()?;
            created(engine.output_context_alloc(format_name.as_deref(), &filename))
        }
        NewStream => handle(engine.new_stream(args.handle()?)),
        Stream => {
            let fmt_ctx = args.handle()?;
            let index = args.int()?;
            let index = usize::try_from(index).map_err(|_| args.bad("negative stream index"))?;
            handle(engine.stream(fmt_ctx, index))
        }
        IoOpen => {
            let oc = args.handle()?;
            code(engine.io_open(oc, &args.string()?))
        }
        IoClose => code(engine.io_close(args.handle()?)),
        WriteHeader => code(engine.write_header(args.handle()?)),
        WriteFrame | InterleavedWriteFrame => {
            let oc = args.handle()?;
            let packet = args.handle()?;
            code(engine.write_frame(oc, packet, builtin == InterleavedWriteFrame))
        }
        WriteTrailer => code(engine.write_trailer(args.handle()?)),
        FormatContextFree => {
            engine.format_context_free(args.handle()?);
            Value::Null
        }
        OpenInput => {
            let filename = args.string()?;
            let format_name = args.opt_string()?;
            created(engine.open_input(&filename, format_name.as_deref()))
        }
        FindStreamInfo => code(engine.find_stream_info(args.handle()?)),
        ReadFrame => {
            let ic = args.handle()?;
            code(engine.read_frame(ic, args.handle()?))
        }
        CloseInput => {
            engine.close_input(args.handle()?);
            Value::Null
        }

        BuffersrcAddFrame => {
            let src = args.handle()?;
            let frame = optional(args.handle()?);
            code(engine.buffersrc_add_frame(src, frame))
        }
        BuffersinkGetFrame => {
            let sink = args.handle()?;
            code(engine.buffersink_get_frame(sink, args.handle()?))
        }
        FilterGraphFree => {
            let graph = args.handle()?;
            engine.filter_graph_free(graph);
            ctx.forget_graph(graph);
            Value::Null
        }

        BsfSendPacket => {
            let bsf = args.handle()?;
            let packet = optional(args.handle()?);
            code(engine.bsf_send_packet(bsf, packet))
        }
        BsfReceivePacket => {
            let bsf = args.handle()?;
            code(engine.bsf_receive_packet(bsf, args.handle()?))
        }

        other => return Err(BridgeError::UnknownFunction(other.name().to_string())),
    };
    Ok(value)
}
