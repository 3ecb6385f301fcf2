use std::collections::HashMap;
use std::sync::Arc;

use avbridge_engine::codes::NOPTS_VALUE;
use avbridge_engine::{Field, Handle, MediaType, Rational};

use crate::codec::CodecDesc;
use crate::container::{InputCtx, OutputCtx};
use crate::filter::{BsfObj, GraphObj, SinkObj, SourceObj};

/// Field storage shared by every object kind.
#[derive(Debug, Clone, Default)]
pub(crate) struct Fields(HashMap<Field, i64>);

impl Fields {
    pub(crate) fn get(&self, field: Field) -> i64 {
        self.0.get(&field).copied().unwrap_or_else(|| default_of(field))
    }

    pub(crate) fn set(&mut self, field: Field, value: i64) {
        self.0.insert(field, value);
    }

    pub(crate) fn rational(&self, num: Field, den: Field) -> Rational {
        Rational::new(self.get(num) as i32, self.get(den) as i32)
    }

    pub(crate) fn set_rational(&mut self, num: Field, den: Field, value: Rational) {
        self.set(num, value.num as i64);
        self.set(den, value.den as i64);
    }
}

fn default_of(field: Field) -> i64 {
    match field {
        Field::FramePts | Field::PacketPts | Field::PacketDts => NOPTS_VALUE,
        Field::FrameFormat | Field::CtxSampleFmt | Field::CtxPixFmt | Field::ParFormat => -1,
        Field::CtxCodecType | Field::ParCodecType => MediaType::Unknown as i64,
        Field::FrameSampleAspectRatioDen => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Plane {
    pub(crate) linesize: usize,
    pub(crate) data: Arc<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FrameObj {
    pub(crate) fields: Fields,
    pub(crate) planes: Vec<Plane>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PacketObj {
    pub(crate) fields: Fields,
    pub(crate) data: Arc<Vec<u8>>,
    pub(crate) side_data: Vec<(i32, Vec<u8>)>,
}

#[derive(Debug, Default)]
pub(crate) struct CodecCtx {
    pub(crate) codec: Option<CodecDesc>,
    pub(crate) fields: Fields,
    pub(crate) opened: bool,
    pub(crate) draining: bool,
    pub(crate) packets: std::collections::VecDeque<PacketObj>,
    pub(crate) frames: std::collections::VecDeque<FrameObj>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ParObj {
    pub(crate) fields: Fields,
    pub(crate) extradata: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct StreamObj {
    pub(crate) fields: Fields,
    pub(crate) codecpar: Handle,
}

#[derive(Debug)]
pub(crate) enum Object {
    Frame(FrameObj),
    Packet(PacketObj),
    CodecCtx(CodecCtx),
    CodecPar(ParObj),
    Stream(StreamObj),
    Output(OutputCtx),
    Input(InputCtx),
    Graph(GraphObj),
    Source(SourceObj),
    Sink(SinkObj),
    Bsf(BsfObj),
}

/// Handle-indexed object heap.
#[derive(Debug, Default)]
pub(crate) struct Heap {
    next: u32,
    objects: HashMap<u32, Object>,
}

macro_rules! accessors {
    ($($get:ident, $get_mut:ident, $variant:ident, $ty:ty;)*) => {
        $(
            #[allow(dead_code)]
            pub(crate) fn $get(&self, handle: Handle) -> Option<&$ty> {
                match self.objects.get(&handle.0) {
                    Some(Object::$variant(obj)) => Some(obj),
                    _ => None,
                }
            }

            #[allow(dead_code)]
            pub(crate) fn $get_mut(&mut self, handle: Handle) -> Option<&mut $ty> {
                match self.objects.get_mut(&handle.0) {
                    Some(Object::$variant(obj)) => Some(obj),
                    _ => None,
                }
            }
        )*
    };
}

impl Heap {
    pub(crate) fn with_reserved(reserved: u32) -> Self {
        Self {
            next: reserved + 1,
            objects: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, object: Object) -> Handle {
        let handle = self.next;
        self.next += 1;
        self.objects.insert(handle, object);
        Handle(handle)
    }

    pub(crate) fn remove(&mut self, handle: Handle) -> Option<Object> {
        self.objects.remove(&handle.0)
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&Object> {
        self.objects.get(&handle.0)
    }

    pub(crate) fn get_mut(&mut self, handle: Handle) -> Option<&mut Object> {
        self.objects.get_mut(&handle.0)
    }

    pub(crate) fn contains(&self, handle: Handle) -> bool {
        self.objects.contains_key(&handle.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    accessors! {
        frame, frame_mut, Frame, FrameObj;
        packet, packet_mut, Packet, PacketObj;
        ctx, ctx_mut, CodecCtx, CodecCtx;
        par, par_mut, CodecPar, ParObj;
        stream, stream_mut, Stream, StreamObj;
        output, output_mut, Output, OutputCtx;
        input, input_mut, Input, InputCtx;
        graph, graph_mut, Graph, GraphObj;
        source, source_mut, Source, SourceObj;
        sink, sink_mut, Sink, SinkObj;
        bsf, bsf_mut, Bsf, BsfObj;
    }
}
