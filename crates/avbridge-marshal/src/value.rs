use std::collections::BTreeMap;

use avbridge_engine::Handle;
use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::codecpar::CodecParameters;
use crate::error::{MarshalError, Result};
use crate::frame::Frame;
use crate::mode::{FrameRef, NativeRef, PacketRef};
use crate::packet::Packet;

/// A dynamically typed argument or result of a bridged call.
///
/// Native handles travel as [`Value::Int`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Buffer(Buffer),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Frame(Box<Frame>),
    Packet(Box<Packet>),
    CodecParameters(Box<CodecParameters>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Buffer(_) => "buffer",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Frame(_) => "frame",
            Value::Packet(_) => "packet",
            Value::CodecParameters(_) => "codec parameters",
        }
    }

    fn mismatch(&self, expected: &'static str) -> MarshalError {
        MarshalError::Type {
            expected,
            found: self.kind(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Bool(b) => Ok(*b as i64),
            Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_handle(&self) -> Result<Handle> {
        match self {
            Value::Null => Ok(Handle::NULL),
            other => {
                let raw = other.as_int()?;
                u32::try_from(raw)
                    .map(Handle)
                    .map_err(|_| other.mismatch("handle"))
            }
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(v) => Ok(*v as f64),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(v) => Ok(*v != 0),
            Value::Null => Ok(false),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_map(&self) -> Result<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Ok(map),
            other => Err(other.mismatch("map")),
        }
    }

    /// Look up a key in a map value; anything else has no keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key).filter(|v| !v.is_null()),
            _ => None,
        }
    }

    pub fn into_list(self) -> Result<Vec<Value>> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn into_buffer(self) -> Result<Buffer> {
        match self {
            Value::Buffer(buf) => Ok(buf),
            other => Err(other.mismatch("buffer")),
        }
    }

    pub fn into_frame(self) -> Result<Frame> {
        match self {
            Value::Frame(frame) => Ok(*frame),
            other => Err(other.mismatch("frame")),
        }
    }

    pub fn into_packet(self) -> Result<Packet> {
        match self {
            Value::Packet(packet) => Ok(*packet),
            other => Err(other.mismatch("packet")),
        }
    }

    pub fn into_codecpar(self) -> Result<CodecParameters> {
        match self {
            Value::CodecParameters(par) => Ok(*par),
            other => Err(other.mismatch("codec parameters")),
        }
    }

    /// A frame record, or an integer naming a native frame handle.
    pub fn into_frame_ref(self) -> Result<FrameRef> {
        match self {
            Value::Frame(frame) => Ok(FrameRef::Owned(*frame)),
            other => other.as_handle().map(|h| FrameRef::Native(NativeRef::new(h))),
        }
    }

    /// A packet record, or an integer naming a native packet handle.
    pub fn into_packet_ref(self) -> Result<PacketRef> {
        match self {
            Value::Packet(packet) => Ok(PacketRef::Owned(*packet)),
            other => other.as_handle().map(|h| PacketRef::Native(NativeRef::new(h))),
        }
    }

    /// Visit every bulk buffer in a stable depth-first order.
    pub fn for_each_buffer_mut(&mut self, f: &mut dyn FnMut(&mut Buffer)) {
        match self {
            Value::Buffer(buf) => f(buf),
            Value::List(items) => items.iter_mut().for_each(|v| v.for_each_buffer_mut(f)),
            Value::Map(map) => map.values_mut().for_each(|v| v.for_each_buffer_mut(f)),
            Value::Frame(frame) => frame.for_each_buffer_mut(f),
            Value::Packet(packet) => packet.for_each_buffer_mut(f),
            Value::CodecParameters(par) => par.for_each_buffer_mut(f),
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
        }
    }

    pub fn for_each_buffer(&self, f: &mut dyn FnMut(&Buffer)) {
        match self {
            Value::Buffer(buf) => f(buf),
            Value::List(items) => items.iter().for_each(|v| v.for_each_buffer(f)),
            Value::Map(map) => map.values().for_each(|v| v.for_each_buffer(f)),
            Value::Frame(frame) => frame.for_each_buffer(f),
            Value::Packet(packet) => packet.for_each_buffer(f),
            Value::CodecParameters(par) => par.for_each_buffer(f),
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
        }
    }

    /// Number of transferable buffers reachable from this value.
    pub fn transfer_count(&self) -> usize {
        let mut count = 0;
        self.for_each_buffer(&mut |buf| count += buf.is_transferable() as usize);
        count
    }

    /// Build a map from key/value pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

macro_rules! from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Int(v as i64)
            }
        })*
    };
}

from_int!(i32, i64, u32, usize);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Int(h.0 as i64)
    }
}

impl From<Buffer> for Value {
    fn from(b: Buffer) -> Self {
        Value::Buffer(b)
    }
}

impl From<Frame> for Value {
    fn from(f: Frame) -> Self {
        Value::Frame(Box::new(f))
    }
}

impl From<Packet> for Value {
    fn from(p: Packet) -> Self {
        Value::Packet(Box::new(p))
    }
}

impl From<CodecParameters> for Value {
    fn from(p: CodecParameters) -> Self {
        Value::CodecParameters(Box::new(p))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_travel_as_ints() {
        let v = Value::from(Handle(42));
        assert_eq!(v, Value::Int(42));
        assert_eq!(v.as_handle().unwrap(), Handle(42));
        assert_eq!(Value::Null.as_handle().unwrap(), Handle::NULL);
        assert!(Value::Int(-1).as_handle().is_err());
    }

    #[test]
    fn int_conversion_rejects_strings() {
        let err = Value::from("x").as_int().unwrap_err();
        assert!(matches!(err, MarshalError::Type { expected: "int", found: "string" }));
    }

    #[test]
    fn map_lookup_skips_nulls() {
        let v = Value::map([("fin", Value::Bool(true)), ("limit", Value::Null)]);
        assert_eq!(v.get("fin"), Some(&Value::Bool(true)));
        assert_eq!(v.get("limit"), None);
        assert_eq!(Value::Int(1).get("fin"), None);
    }

    #[test]
    fn buffer_walk_reaches_nested_records() {
        let packet = Packet::new(Buffer::fresh(vec![1, 2, 3]));
        let mut value = Value::from(vec![
            Value::from(packet),
            Value::Buffer(Buffer::new(bytes::Bytes::from_static(b"shared"))),
        ]);
        assert_eq!(value.transfer_count(), 1);

        let mut seen = Vec::new();
        value.for_each_buffer_mut(&mut |b| seen.push(b.len()));
        assert_eq!(seen, vec![3, 6]);
    }

    #[test]
    fn integer_valued_floats_convert() {
        assert_eq!(Value::Float(3.0).as_int().unwrap(), 3);
        assert!(Value::Float(3.5).as_int().is_err());
    }

    #[test]
    fn frame_ref_from_int_is_native() {
        match Value::Int(7).into_frame_ref().unwrap() {
            FrameRef::Native(native) => assert_eq!(native.handle(), Handle(7)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
