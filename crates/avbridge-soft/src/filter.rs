use std::collections::VecDeque;

use avbridge_engine::codes::{averror, AVERROR_EOF, AVERROR_NOT_FOUND, EAGAIN, EINVAL};
use avbridge_engine::{Field, FilterGraph, FilterPad, Handle, MediaType};

use crate::objects::{FrameObj, Heap, Object, PacketObj};

const PASSTHROUGH: &[&str] = &["null", "anull", "copy", "acopy"];

#[derive(Debug)]
pub(crate) struct GraphObj {
    sources: Vec<Handle>,
    sinks: Vec<Handle>,
}

#[derive(Debug)]
pub(crate) struct SourceObj {
    pad: FilterPad,
    sink: Handle,
}

#[derive(Debug)]
pub(crate) struct SinkObj {
    queue: VecDeque<FrameObj>,
    eof: bool,
}

#[derive(Debug, Default)]
pub(crate) struct BsfObj {
    queue: VecDeque<PacketObj>,
    draining: bool,
}

/// Every filter in a description must be a passthrough filter. Chains are
/// separated by `;`, filters within a chain by `,`; options after `=` are
/// ignored.
fn validate(description: &str) -> bool {
    description
        .split([';', ','])
        .map(|f| f.split('=').next().unwrap_or("").trim())
        .all(|name| name.is_empty() || PASSTHROUGH.contains(&name))
}

pub(crate) fn graph_create(
    heap: &mut Heap,
    description: &str,
    inputs: &[FilterPad],
    outputs: &[FilterPad],
) -> Result<FilterGraph, i32> {
    if !validate(description) {
        return Err(AVERROR_NOT_FOUND);
    }
    if inputs.is_empty() || inputs.len() != outputs.len() {
        return Err(averror(EINVAL));
    }
    if inputs
        .iter()
        .zip(outputs)
        .any(|(i, o)| i.media_type != o.media_type)
    {
        return Err(averror(EINVAL));
    }

    let mut sources = Vec::with_capacity(inputs.len());
    let mut sinks = Vec::with_capacity(outputs.len());
    for (input, output) in inputs.iter().zip(outputs) {
        let sink = heap.insert(Object::Sink(SinkObj {
            queue: VecDeque::new(),
            eof: false,
        }));
        let mut pad = input.clone();
        if !output.time_base.is_unset() {
            pad.time_base = output.time_base;
        }
        sources.push(heap.insert(Object::Source(SourceObj { pad, sink })));
        sinks.push(sink);
    }
    let graph = heap.insert(Object::Graph(GraphObj {
        sources: sources.clone(),
        sinks: sinks.clone(),
    }));
    Ok(FilterGraph {
        graph,
        sources,
        sinks,
    })
}

pub(crate) fn graph_free(heap: &mut Heap, graph: Handle) {
    if let Some(Object::Graph(g)) = heap.remove(graph) {
        for handle in g.sources.into_iter().chain(g.sinks) {
            heap.remove(handle);
        }
    }
}

pub(crate) fn add_frame(heap: &mut Heap, src: Handle, frame: Option<Handle>) -> i32 {
    let Some((media, time_base, sink)) = heap
        .source(src)
        .map(|s| (s.pad.media_type, s.pad.time_base, s.sink))
    else {
        return averror(EINVAL);
    };
    let Some(frame) = frame else {
        if let Some(s) = heap.sink_mut(sink) {
            s.eof = true;
        }
        return 0;
    };
    let Some(f) = heap.frame_mut(frame) else {
        return averror(EINVAL);
    };
    let is_video = f.fields.get(Field::FrameWidth) > 0 && f.fields.get(Field::FrameNbSamples) == 0;
    if is_video != (media == MediaType::Video) {
        return averror(EINVAL);
    }
    let mut taken = std::mem::take(f);
    if !time_base.is_unset() {
        taken
            .fields
            .set_rational(Field::FrameTimeBaseNum, Field::FrameTimeBaseDen, time_base);
    }
    match heap.sink_mut(sink) {
        Some(s) if !s.eof => {
            s.queue.push_back(taken);
            0
        }
        Some(_) => AVERROR_EOF,
        None => averror(EINVAL),
    }
}

pub(crate) fn get_frame(heap: &mut Heap, sink: Handle, frame: Handle) -> i32 {
    let next = match heap.sink_mut(sink) {
        Some(s) => match s.queue.pop_front() {
            Some(f) => f,
            None if s.eof => return AVERROR_EOF,
            None => return averror(EAGAIN),
        },
        None => return averror(EINVAL),
    };
    match heap.frame_mut(frame) {
        Some(slot) => {
            *slot = next;
            0
        }
        None => averror(EINVAL),
    }
}

pub(crate) fn bsf_create(heap: &mut Heap, name: &str) -> Result<Handle, i32> {
    if name != "null" {
        return Err(AVERROR_NOT_FOUND);
    }
    Ok(heap.insert(Object::Bsf(BsfObj::default())))
}

pub(crate) fn bsf_send(heap: &mut Heap, bsf: Handle, packet: Option<Handle>) -> i32 {
    let taken = match packet {
        Some(h) => match heap.packet_mut(h) {
            Some(p) => Some(std::mem::take(p)),
            None => return averror(EINVAL),
        },
        None => None,
    };
    let Some(b) = heap.bsf_mut(bsf) else {
        return averror(EINVAL);
    };
    if b.draining {
        return AVERROR_EOF;
    }
    match taken {
        Some(p) => b.queue.push_back(p),
        None => b.draining = true,
    }
    0
}

pub(crate) fn bsf_receive(heap: &mut Heap, bsf: Handle, packet: Handle) -> i32 {
    let next = match heap.bsf_mut(bsf) {
        Some(b) => match b.queue.pop_front() {
            Some(p) => p,
            None if b.draining => return AVERROR_EOF,
            None => return averror(EAGAIN),
        },
        None => return averror(EINVAL),
    };
    match heap.packet_mut(packet) {
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
    fn passthrough_descriptions() {
        assert!(validate("null"));
        assert!(validate("anull,anull"));
        assert!(!validate("[in]null[out]"));
        assert!(validate("null;anull"));
        assert!(!validate("scale=640:480"));
    }
}
