//! Envelope ↔ frame conversion.
//!
//! An envelope becomes one JSON array frame on its channel. Bulk buffers are
//! taken out of the values before serialization and sent first, one BUFFER
//! frame each, in depth-first order; the JSON keeps an empty placeholder in
//! their place. The receiver puts them back in the same order.

use std::mem;

use avbridge_marshal::Value;
use bytes::Bytes;
use serde_json::json;

use crate::channel::{BUFFER, CALL, CONTROL, EVENT, REPLY};
use crate::codec::{Frame, FrameConfig};
use crate::envelope::{
    CallEnvelope, ErrorPayload, EventEnvelope, EventKind, Message, ReplyEnvelope,
};
use crate::error::{ProtocolError, Result};

type Json = serde_json::Value;

const CONTROL_SHUTDOWN: &str = "shutdown";

/// Longest error message kept when an error reply has to be reduced.
const REDUCED_MESSAGE_LEN: usize = 1024;

/// Encode a message into the frames that carry it.
///
/// Replies never fail to encode: a result the wire cannot carry is degraded,
/// first by replacing non-finite floats with null, then by replacing the
/// whole result with a description of it.
pub fn encode(message: Message, config: &FrameConfig) -> Result<Vec<Frame>> {
    match message {
        Message::Reply(reply) => encode_reply(reply, config),
        other => encode_strict(other, config),
    }
}

fn encode_reply(reply: ReplyEnvelope, config: &FrameConfig) -> Result<Vec<Frame>> {
    let reason = match encode_strict(Message::Reply(reply.clone()), config) {
        Ok(frames) => return Ok(frames),
        Err(ProtocolError::Unencodable(reason)) => reason,
        Err(ProtocolError::Json(err)) => err.to_string(),
        Err(other) => return Err(other),
    };

    let mut relaxed = reply.clone();
    if let Ok(value) = relaxed.outcome.as_mut() {
        if nulls_for_non_finite(value) {
            tracing::warn!(id = reply.id, function = %reply.function, %reason, "reply degraded: non-finite floats sent as null");
            if let Ok(frames) = encode_strict(Message::Reply(relaxed), config) {
                return Ok(frames);
            }
        }
    }

    tracing::warn!(id = reply.id, function = %reply.function, %reason, "reply degraded to a description");
    let outcome = match &reply.outcome {
        Ok(value) => Ok(Value::Str(format!(
            "{} result of {} could not be sent: {reason}",
            value.kind(),
            reply.function
        ))),
        Err(error) => {
            let mut message = error.message.clone();
            if message.len() > REDUCED_MESSAGE_LEN {
                let mut end = REDUCED_MESSAGE_LEN;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            Err(ErrorPayload::new(error.kind.clone(), message))
        }
    };
    encode_strict(
        Message::Reply(ReplyEnvelope {
            id: reply.id,
            function: reply.function,
            outcome,
        }),
        config,
    )
}

fn encode_strict(mut message: Message, config: &FrameConfig) -> Result<Vec<Frame>> {
    let mut non_finite = None;
    message.for_each_value_mut(&mut |value| {
        if non_finite.is_none() {
            non_finite = find_non_finite(value);
        }
    });
    if let Some(found) = non_finite {
        return Err(ProtocolError::Unencodable(found));
    }

    let buffers = take_buffers(&mut message);
    let (channel, json) = envelope_json(message)?;
    let payload = serde_json::to_vec(&json)?;

    let max = config.max_payload_size;
    if let Some(len) = buffers
        .iter()
        .map(Bytes::len)
        .chain(std::iter::once(payload.len()))
        .find(|len| *len > max)
    {
        return Err(ProtocolError::Unencodable(format!(
            "{len} bytes exceed the {max} byte frame limit"
        )));
    }

    let mut frames: Vec<Frame> = buffers
        .into_iter()
        .map(|bytes| Frame::new(BUFFER, bytes))
        .collect();
    frames.push(Frame::new(channel, payload));
    Ok(frames)
}

fn find_non_finite(value: &Value) -> Option<String> {
    match value {
        Value::Float(f) if !f.is_finite() => Some(format!("non-finite float {f}")),
        Value::List(items) => items.iter().find_map(find_non_finite),
        Value::Map(map) => map.values().find_map(find_non_finite),
        _ => None,
    }
}

/// Replace non-finite floats with null. Returns whether anything changed.
fn nulls_for_non_finite(value: &mut Value) -> bool {
    match value {
        Value::Float(f) if !f.is_finite() => {
            *value = Value::Null;
            true
        }
        Value::List(items) => items
            .iter_mut()
            .fold(false, |changed, item| nulls_for_non_finite(item) | changed),
        Value::Map(map) => map
            .values_mut()
            .fold(false, |changed, item| nulls_for_non_finite(item) | changed),
        _ => false,
    }
}

fn take_buffers(message: &mut Message) -> Vec<Bytes> {
    let mut out = Vec::new();
    message.for_each_value_mut(&mut |value| {
        value.for_each_buffer_mut(&mut |buf| out.push(buf.take_bytes()));
    });
    out
}

fn put_buffers(message: &mut Message, buffers: Vec<Bytes>) -> Result<()> {
    let mut expected = 0;
    message.for_each_value_mut(&mut |value| value.for_each_buffer(&mut |_| expected += 1));
    if expected != buffers.len() {
        return Err(ProtocolError::BufferCount {
            expected,
            received: buffers.len(),
        });
    }
    let mut buffers = buffers.into_iter();
    message.for_each_value_mut(&mut |value| {
        value.for_each_buffer_mut(&mut |buf| {
            if let Some(bytes) = buffers.next() {
                buf.put_bytes(bytes);
                buf.set_transferable(true);
            }
        })
    });
    Ok(())
}

fn outcome_json(outcome: std::result::Result<Value, ErrorPayload>) -> Result<(bool, Json)> {
    Ok(match outcome {
        Ok(value) => (true, serde_json::to_value(value)?),
        Err(error) => (false, serde_json::to_value(error)?),
    })
}

fn envelope_json(message: Message) -> Result<(u16, Json)> {
    Ok(match message {
        Message::Call(call) => {
            let mut items = Vec::with_capacity(call.args.len() + 2);
            items.push(json!(call.id));
            items.push(json!(call.function));
            for arg in call.args {
                items.push(serde_json::to_value(arg)?);
            }
            (CALL, Json::Array(items))
        }
        Message::Reply(reply) => {
            let (success, result) = outcome_json(reply.outcome)?;
            (REPLY, json!([reply.id, reply.function, success, result]))
        }
        Message::Event(event) => {
            let name = event.kind.as_str();
            let (success, result) = outcome_json(event.outcome)?;
            (EVENT, json!([name, name, success, result]))
        }
        Message::Shutdown => (CONTROL, json!({ "type": CONTROL_SHUTDOWN })),
    })
}

/// Reassembles messages from incoming frames.
#[derive(Debug, Default)]
pub struct WireDecoder {
    buffers: Vec<Bytes>,
}

impl WireDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame. Returns a message once its envelope frame arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.channel {
            BUFFER => {
                self.buffers.push(frame.payload);
                Ok(None)
            }
            CONTROL => {
                let control: Json = serde_json::from_slice(&frame.payload)?;
                match control.get("type").and_then(Json::as_str) {
                    Some(CONTROL_SHUTDOWN) => Ok(Some(Message::Shutdown)),
                    other => Err(ProtocolError::Malformed(format!(
                        "unknown control message {other:?}"
                    ))),
                }
            }
            CALL | REPLY | EVENT => {
                let buffers = mem::take(&mut self.buffers);
                let mut message = parse_envelope(frame.channel, &frame.payload)?;
                put_buffers(&mut message, buffers)?;
                Ok(Some(message))
            }
            other => Err(ProtocolError::Malformed(format!("unexpected channel {other}"))),
        }
    }
}

fn parse_envelope(channel: u16, payload: &[u8]) -> Result<Message> {
    let items: Vec<Json> = serde_json::from_slice(payload)?;
    let mut items = items.into_iter();
    let mut next = |what: &str| {
        items
            .next()
            .ok_or_else(|| ProtocolError::Malformed(format!("missing {what}")))
    };

    match channel {
        CALL => {
            let id = as_call_id(next("id")?)?;
            let function = as_string(next("function")?)?;
            let args = items
                .map(serde_json::from_value::<Value>)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Message::Call(CallEnvelope { id, function, args }))
        }
        REPLY => {
            let id = as_call_id(next("id")?)?;
            let function = as_string(next("function")?)?;
            let success = as_bool(next("success flag")?)?;
            let outcome = parse_outcome(success, next("result")?)?;
            Ok(Message::Reply(ReplyEnvelope {
                id,
                function,
                outcome,
            }))
        }
        _ => {
            let name = as_string(next("event id")?)?;
            let kind = EventKind::from_name(&name)
                .ok_or_else(|| ProtocolError::Malformed(format!("unknown event id {name}")))?;
            let _function = next("function")?;
            let success = as_bool(next("success flag")?)?;
            let outcome = parse_outcome(success, next("result")?)?;
            Ok(Message::Event(EventEnvelope { kind, outcome }))
        }
    }
}

fn parse_outcome(success: bool, result: Json) -> Result<std::result::Result<Value, ErrorPayload>> {
    Ok(if success {
        Ok(serde_json::from_value(result)?)
    } else {
        Err(serde_json::from_value(result)?)
    })
}

fn as_call_id(value: Json) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| ProtocolError::Malformed(format!("call id must be an integer, got {value}")))
}

fn as_string(value: Json) -> Result<String> {
    match value {
        Json::String(s) => Ok(s),
        other => Err(ProtocolError::Malformed(format!("expected a string, got {other}"))),
    }
}

fn as_bool(value: Json) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| ProtocolError::Malformed(format!("expected a boolean, got {value}")))
}

#[cfg(test)]
mod tests {
    use avbridge_marshal::Buffer;

    use super::*;

    fn decode_all(frames: Vec<Frame>) -> Message {
        let mut decoder = WireDecoder::new();
        let mut out = None;
        for frame in frames {
            if let Some(message) = decoder.push(frame).expect("frames should decode") {
                out = Some(message);
            }
        }
        out.expect("a message should be produced")
    }

    #[test]
    fn call_travels_as_json_array_with_buffers_out_of_band() {
        let call = Message::Call(CallEnvelope {
            id: 3,
            function: "ff_reader_dev_send".into(),
            args: vec![
                Value::from("input"),
                Value::Buffer(Buffer::fresh(vec![9u8; 32])),
            ],
        });
        let frames = encode(call.clone(), &FrameConfig::default()).expect("call should encode");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].channel, BUFFER);
        assert_eq!(frames[0].payload.len(), 32);
        let json: Json = serde_json::from_slice(&frames[1].payload).expect("valid json");
        assert_eq!(json[0], json!(3));
        assert_eq!(json[1], json!("ff_reader_dev_send"));
        assert_eq!(decode_all(frames), call);
    }

    #[test]
    fn event_ids_are_strings() {
        let frames = encode(
            Message::Event(EventEnvelope::read("in", 0, 4096)),
            &FrameConfig::default(),
        )
        .expect("event should encode");
        let json: Json = serde_json::from_slice(&frames[0].payload).expect("valid json");
        assert_eq!(json[0], json!("onread"));
        assert_eq!(json[2], json!(true));
        let Message::Event(event) = decode_all(frames) else {
            panic!("event expected");
        };
        assert_eq!(event.kind, EventKind::Read);
    }

    #[test]
    fn non_finite_reply_is_degraded_not_lost() {
        let reply = ReplyEnvelope {
            id: 9,
            function: "ff_error".into(),
            outcome: Ok(Value::List(vec![Value::Float(f64::NAN), Value::Int(1)])),
        };
        let frames = encode(Message::Reply(reply), &FrameConfig::default()).expect("reply always encodes");
        let Message::Reply(back) = decode_all(frames) else {
            panic!("reply expected");
        };
        assert_eq!(back.id, 9);
        assert_eq!(back.outcome, Ok(Value::List(vec![Value::Null, Value::Int(1)])));
    }

    #[test]
    fn oversized_reply_becomes_a_description() {
        let reply = ReplyEnvelope {
            id: 2,
            function: "readFile".into(),
            outcome: Ok(Value::Buffer(Buffer::fresh(vec![0u8; 512]))),
        };
        let config = FrameConfig {
            max_payload_size: 200,
        };
        let frames = encode(Message::Reply(reply), &config).expect("reply always encodes");
        let Message::Reply(back) = decode_all(frames) else {
            panic!("reply expected");
        };
        let Ok(Value::Str(text)) = back.outcome else {
            panic!("description expected");
        };
        assert!(text.starts_with("buffer result of readFile"));
    }

    #[test]
    fn calls_with_non_finite_args_are_refused() {
        let call = Message::Call(CallEnvelope {
            id: 1,
            function: "f64_to_i64".into(),
            args: vec![Value::Float(f64::INFINITY)],
        });
        assert!(matches!(
            encode(call, &FrameConfig::default()),
            Err(ProtocolError::Unencodable(_))
        ));
    }

    #[test]
    fn missing_buffer_frames_are_detected() {
        let call = Message::Call(CallEnvelope {
            id: 1,
            function: "writeFile".into(),
            args: vec![Value::from("x"), Value::Buffer(Buffer::fresh(vec![1u8]))],
        });
        let mut frames = encode(call, &FrameConfig::default()).expect("call should encode");
        frames.remove(0);
        let mut decoder = WireDecoder::new();
        assert!(matches!(
            decoder.push(frames.remove(0)),
            Err(ProtocolError::BufferCount {
                expected: 1,
                received: 0
            })
        ));
    }

    #[test]
    fn failure_replies_keep_their_payload() {
        let reply = ReplyEnvelope {
            id: 4,
            function: "ff_init_demuxer_file".into(),
            outcome: Err(ErrorPayload::new("host", "fetch failed").with_code(-11)),
        };
        let frames = encode(Message::Reply(reply.clone()), &FrameConfig::default())
            .expect("reply should encode");
        assert_eq!(decode_all(frames), Message::Reply(reply));
        let shutdown = encode(Message::Shutdown, &FrameConfig::default()).expect("control encodes");
        assert_eq!(decode_all(shutdown), Message::Shutdown);
    }

    #[test]
    fn reply_outcomes_carry_a_success_flag() {
        let (ok, value) = outcome_json(Ok(Value::Int(7))).expect("success should serialize");
        assert!(ok);
        assert_eq!(value, serde_json::to_value(Value::Int(7)).expect("int should serialize"));

        let (ok, error) = outcome_json(Err(ErrorPayload::new("engine", "boom")))
            .expect("failure should serialize");
        assert!(!ok);
        assert_eq!(error["message"], "boom");
    }
}
