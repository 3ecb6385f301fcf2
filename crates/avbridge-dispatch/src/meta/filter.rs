use avbridge_engine::codes::{is_again, is_eof};
use avbridge_engine::{Field, FilterPad, Handle, MediaType, Rational};
use avbridge_marshal::{copyin_frame, copyout_frame_as, FrameCopyout, Value};

use super::{config_map, frame_copyout, set_rational};
use crate::args::{opt_bool, opt_int, opt_rational, Args};
use crate::context::EngineContext;
use crate::error::Result;

const DEFAULT_FRAME_RATE: i64 = 30;
const DEFAULT_WIDTH: i64 = 640;
const DEFAULT_HEIGHT: i64 = 360;
const DEFAULT_SAMPLE_RATE: i64 = 48000;
/// Interleaved float.
const DEFAULT_SAMPLE_FMT: i64 = 3;
/// Mono.
const DEFAULT_CHANNEL_LAYOUT: i64 = 4;

/// An endpoint map, or a list of them. The flag records which it was.
fn endpoints(value: Value, args: &Args) -> Result<(Vec<Value>, bool)> {
    match value {
        Value::List(items) => Ok((items, true)),
        Value::Map(_) => Ok((vec![value], false)),
        other => Err(args.bad(format_args!("expected endpoint map, found {}", other.kind()))),
    }
}

fn media_type(desc: &Value) -> MediaType {
    match opt_int(desc, "type") {
        Some(0) => MediaType::Video,
        _ => MediaType::Audio,
    }
}

/// Source pad with its time base defaulted from the rate.
fn input_pad(desc: &Value) -> FilterPad {
    let media_type = media_type(desc);
    let int = |key, default| opt_int(desc, key).unwrap_or(default);
    if media_type == MediaType::Video {
        let frame_rate = int("frame_rate", DEFAULT_FRAME_RATE);
        FilterPad {
            media_type,
            time_base: opt_rational(desc, "time_base")
                .unwrap_or(Rational::new(1, frame_rate as i32)),
            sample_rate: 0,
            sample_fmt: 0,
            channel_layout: 0,
            width: int("width", DEFAULT_WIDTH) as i32,
            height: int("height", DEFAULT_HEIGHT) as i32,
            pix_fmt: int("pix_fmt", 0) as i32,
        }
    } else {
        let sample_rate = int("sample_rate", DEFAULT_SAMPLE_RATE);
        FilterPad {
            media_type,
            time_base: opt_rational(desc, "time_base")
                .unwrap_or(Rational::new(1, sample_rate as i32)),
            sample_rate: sample_rate as i32,
            sample_fmt: int("sample_fmt", DEFAULT_SAMPLE_FMT) as i32,
            channel_layout: int("channel_layout", DEFAULT_CHANNEL_LAYOUT) as u64,
            width: 0,
            height: 0,
            pix_fmt: 0,
        }
    }
}

/// Sink pad. Its time base stays unset unless given.
fn output_pad(desc: &Value) -> FilterPad {
    let media_type = media_type(desc);
    let int = |key, default| opt_int(desc, key).unwrap_or(default);
    let time_base = opt_rational(desc, "time_base").unwrap_or_default();
    if media_type == MediaType::Video {
        FilterPad {
            media_type,
            time_base,
            sample_rate: 0,
            sample_fmt: 0,
            channel_layout: 0,
            width: int("width", 0) as i32,
            height: int("height", 0) as i32,
            pix_fmt: int("pix_fmt", 0) as i32,
        }
    } else {
        FilterPad {
            media_type,
            time_base,
            sample_rate: int("sample_rate", DEFAULT_SAMPLE_RATE) as i32,
            sample_fmt: int("sample_fmt", DEFAULT_SAMPLE_FMT) as i32,
            channel_layout: int("channel_layout", DEFAULT_CHANNEL_LAYOUT) as u64,
            width: 0,
            height: 0,
            pix_fmt: 0,
        }
    }
}

fn one_or_many(handles: Vec<Handle>, many: bool) -> Value {
    match (many, handles.first()) {
        (false, Some(&first)) => first.into(),
        _ => Value::from(handles),
    }
}

/// `ff_init_filter_graph(description, input | [inputs], output | [outputs])
/// -> [graph, src | [srcs], sink | [sinks]]`
pub(super) fn init_filter_graph(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let description = args.string()?;
    let (inputs, many_inputs) = {
        let value = args.next();
        endpoints(value, &args)?
    };
    let (outputs, many_outputs) = {
        let value = args.next();
        endpoints(value, &args)?
    };

    let inputs: Vec<FilterPad> = inputs.iter().map(input_pad).collect();
    let outputs: Vec<FilterPad> = outputs.iter().map(output_pad).collect();
    let graph = match ctx
        .engine_mut()
        .filter_graph_create(&description, &inputs, &outputs)
    {
        Ok(graph) => graph,
        Err(code) => return Err(ctx.failure("failed to initialize filters", code)),
    };

    for (index, &sink) in graph.sinks.iter().enumerate() {
        let time_base = outputs
            .get(index)
            .map(|pad| pad.time_base)
            .filter(|tb| !tb.is_unset())
            .or_else(|| inputs.get(index).map(|pad| pad.time_base))
            .unwrap_or_default();
        ctx.sink_time_bases.insert(sink, time_base);
    }
    ctx.graph_sinks.insert(graph.graph, graph.sinks.clone());
    tracing::debug!(
        description = %description,
        sources = graph.sources.len(),
        sinks = graph.sinks.len(),
        "filter graph ready"
    );

    Ok(Value::List(vec![
        graph.graph.into(),
        one_or_many(graph.sources, many_inputs),
        one_or_many(graph.sinks, many_outputs),
    ]))
}

struct Feed {
    src: Handle,
    frames: Vec<Value>,
    mode: FrameCopyout,
    fin: bool,
    keep_time_base: bool,
}

/// `ff_filter_multi(src | [srcs], sink, frame, frames | [frames], config | [configs]) -> frames`
///
/// Frames are fed in frame order across sources; each source that asks for
/// it is flushed once, right after its last frame.
pub(super) fn filter_multi(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let srcs = args.next();
    let sink = args.handle()?;
    let frame = args.handle()?;
    let frames = args.next();
    let configs = args.next();

    let (srcs, frames, configs) = match srcs {
        Value::List(srcs) => {
            let frames = frames.into_list().map_err(|e| args.bad(e))?;
            let configs = match configs {
                Value::List(configs) => configs,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            (srcs, frames, configs)
        }
        single => (vec![single], vec![frames], vec![configs]),
    };

    let mut feeds = Vec::with_capacity(srcs.len());
    for (index, src) in srcs.into_iter().enumerate() {
        let src = src.as_handle().map_err(|e| args.bad(e))?;
        let frames = match frames.get(index) {
            Some(Value::List(list)) => list.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => return Err(args.bad(format_args!("expected frame list, found {}", other.kind()))),
        };
        let config = config_map(configs.get(index).cloned().unwrap_or_default());
        feeds.push(Feed {
            src,
            frames,
            mode: frame_copyout(&args, &config, "copyoutFrame")?,
            fin: opt_bool(&config, "fin"),
            keep_time_base: opt_bool(&config, "ignoreSinkTimebase"),
        });
    }

    let sink_time_base = ctx.sink_time_bases.get(&sink).copied().unwrap_or_default();
    let longest = feeds.iter().map(|f| f.frames.len()).max().unwrap_or(0);
    let mut out = Vec::new();
    for position in 0..=longest {
        for feed in &mut feeds {
            let input = if position < feed.frames.len() {
                Some(std::mem::take(&mut feed.frames[position]))
            } else if position == feed.frames.len() && feed.fin {
                None
            } else {
                continue;
            };
            feed_one(ctx, feed, input, frame, sink, sink_time_base, &args, &mut out)?;
        }
    }
    Ok(Value::List(out))
}

#[allow(clippy::too_many_arguments)]
fn feed_one(
    ctx: &mut EngineContext,
    feed: &Feed,
    input: Option<Value>,
    frame: Handle,
    sink: Handle,
    sink_time_base: Rational,
    args: &Args,
    out: &mut Vec<Value>,
) -> Result<()> {
    let code = match input {
        Some(src) => {
            let src = src.into_frame_ref().map_err(|e| args.bad(e))?;
            copyin_frame(ctx.engine_mut(), frame, src)?;
            let code = ctx.engine_mut().buffersrc_add_frame(feed.src, Some(frame));
            ctx.engine_mut().frame_unref(frame);
            code
        }
        None => ctx.engine_mut().buffersrc_add_frame(feed.src, None),
    };
    ctx.check("error while feeding the filter graph", code)?;

    loop {
        let code = ctx.engine_mut().buffersink_get_frame(sink, frame);
        if is_again(code) || is_eof(code) {
            return Ok(());
        }
        ctx.check("error while receiving a frame from the filter graph", code)?;
        let mut filtered = copyout_frame_as(ctx.engine_mut(), frame, feed.mode)?;
        if !feed.keep_time_base && !sink_time_base.is_unset() {
            if let Value::Frame(record) = &mut filtered {
                record.time_base = Some(sink_time_base);
            } else if let Value::Int(raw) = filtered {
                let copy = Handle(raw as u32);
                set_rational(ctx, copy, Field::FrameTimeBaseNum, Field::FrameTimeBaseDen, sink_time_base);
            }
        }
        out.push(filtered);
        ctx.engine_mut().frame_unref(frame);
    }
}
