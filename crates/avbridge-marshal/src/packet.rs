use avbridge_engine::codes::{averror, ENOMEM, NOPTS_VALUE};
use avbridge_engine::{Engine, Field, Handle, Rational};
use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::error::{check, MarshalError, Result};
use crate::mode::{PacketCopyout, PacketRef};
use crate::value::Value;

/// Key frame flag bit.
pub const FLAG_KEY: i32 = 0x0001;

/// Host-native copy of an engine packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub data: Buffer,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    /// Time base of the timestamps; when absent it is inferred from the owning context.
    pub time_base: Option<Rational>,
    pub stream_index: i32,
    pub flags: i32,
    pub side_data: Vec<SideData>,
}

/// One side-data entry attached to a packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideData {
    pub kind: i32,
    pub data: Buffer,
}

impl Packet {
    pub fn new(data: impl Into<Buffer>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            duration: 0,
            time_base: None,
            stream_index: 0,
            flags: 0,
            side_data: Vec::new(),
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self.dts = Some(pts);
        self
    }

    pub fn with_stream(mut self, stream_index: i32) -> Self {
        self.stream_index = stream_index;
        self
    }

    pub fn is_key(&self) -> bool {
        self.flags & FLAG_KEY != 0
    }

    /// Visit every bulk buffer in a stable order.
    pub fn for_each_buffer_mut(&mut self, f: &mut dyn FnMut(&mut Buffer)) {
        f(&mut self.data);
        for side in &mut self.side_data {
            f(&mut side.data);
        }
    }

    pub fn for_each_buffer(&self, f: &mut dyn FnMut(&Buffer)) {
        f(&self.data);
        for side in &self.side_data {
            f(&side.data);
        }
    }
}

fn require(packet: Handle) -> Result<()> {
    if packet.is_null() {
        Err(MarshalError::NullHandle("packet"))
    } else {
        Ok(())
    }
}

fn timestamp(raw: i64) -> Option<i64> {
    (raw != NOPTS_VALUE).then_some(raw)
}

/// Copy a packet out, including its side data.
pub fn copyout_packet(engine: &dyn Engine, packet: Handle) -> Result<Packet> {
    require(packet)?;
    let data = Buffer::copy_from_slice(engine.packet_data(packet).unwrap_or_default());
    let time_base = Rational::new(
        engine.get(packet, Field::PacketTimeBaseNum) as i32,
        engine.get(packet, Field::PacketTimeBaseDen) as i32,
    );
    let side_data = (0..engine.packet_side_data_count(packet))
        .filter_map(|i| engine.packet_side_data(packet, i))
        .map(|(kind, bytes)| SideData {
            kind,
            data: Buffer::copy_from_slice(bytes),
        })
        .collect();

    Ok(Packet {
        data,
        pts: timestamp(engine.get(packet, Field::PacketPts)),
        dts: timestamp(engine.get(packet, Field::PacketDts)),
        duration: engine.get(packet, Field::PacketDuration),
        time_base: (!time_base.is_unset()).then_some(time_base),
        stream_index: engine.get(packet, Field::PacketStreamIndex) as i32,
        flags: engine.get(packet, Field::PacketFlags) as i32,
        side_data,
    })
}

/// Return a new native reference to the packet; nothing is copied.
pub fn copyout_packet_ptr(engine: &mut dyn Engine, packet: Handle) -> Result<Handle> {
    require(packet)?;
    let clone = engine.packet_clone(packet);
    tracing::trace!(packet = packet.0, clone = clone.0, "packet copied out by reference");
    if clone.is_null() {
        return Err(MarshalError::Engine {
            op: "av_packet_clone",
            code: averror(ENOMEM),
        });
    }
    Ok(clone)
}

/// Copy a packet out in the requested mode.
pub fn copyout_packet_as(engine: &mut dyn Engine, packet: Handle, mode: PacketCopyout) -> Result<Value> {
    Ok(match mode {
        PacketCopyout::Default => Value::from(copyout_packet(engine, packet)?),
        PacketCopyout::Ptr => Value::from(copyout_packet_ptr(engine, packet)?),
    })
}

/// Copy a packet into `dst`. A native reference is moved and released.
pub fn copyin_packet(engine: &mut dyn Engine, dst: Handle, src: PacketRef) -> Result<()> {
    require(dst)?;
    match src {
        PacketRef::Native(native) => {
            let src = native.into_handle();
            tracing::trace!(src = src.0, dst = dst.0, "packet reference moved");
            engine.packet_unref(dst);
            let code = engine.packet_ref(dst, src);
            engine.packet_unref(src);
            engine.packet_free(src);
            check("av_packet_ref", code).map(|_| ())
        }
        PacketRef::Owned(packet) => {
            engine.packet_unref(dst);
            check("av_packet_make_writable", engine.packet_set_data(dst, packet.data.as_slice()))?;
            engine.set(dst, Field::PacketPts, packet.pts.unwrap_or(NOPTS_VALUE));
            engine.set(dst, Field::PacketDts, packet.dts.unwrap_or(NOPTS_VALUE));
            engine.set(dst, Field::PacketDuration, packet.duration);
            engine.set(dst, Field::PacketStreamIndex, packet.stream_index as i64);
            engine.set(dst, Field::PacketFlags, packet.flags as i64);
            if let Some(tb) = packet.time_base {
                engine.set(dst, Field::PacketTimeBaseNum, tb.num as i64);
                engine.set(dst, Field::PacketTimeBaseDen, tb.den as i64);
            }
            for side in &packet.side_data {
                check(
                    "av_packet_new_side_data",
                    engine.packet_add_side_data(dst, side.kind, side.data.as_slice()),
                )?;
            }
            Ok(())
        }
    }
}
