use std::path::{Path, PathBuf};
use std::sync::Arc;

use avbridge_device::ReadaheadSource;
use avbridge_dispatch::{Bridge, BridgeError, Builtin, Mode, ReadBatch};
use avbridge_engine::codes::AVERROR_EOF;
use avbridge_engine::{EngineFactory, MediaType};
use avbridge_marshal::{MarshalError, Value};
use avbridge_soft::SoftFactory;
use serde::Serialize;

use crate::cmd::{load_config, runtime, ProbeArgs};
use crate::exit::{bridge_error, io_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

const DEVICE: &str = "input";

#[derive(Serialize)]
struct StreamInfo {
    index: i64,
    codec_type: &'static str,
    codec_id: i64,
    time_base: String,
    packets: usize,
    bytes: usize,
}

#[derive(Serialize)]
struct ProbeOutput {
    path: PathBuf,
    mode: Mode,
    streams: Vec<StreamInfo>,
}

pub fn run(args: ProbeArgs, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    std::fs::metadata(&args.path)
        .map_err(|err| io_error(&format!("open {}", args.path.display()), err))?;
    let config = args.bridge.apply(load_config(config)?)?;
    let factory: Arc<dyn EngineFactory> = Arc::new(SoftFactory::new());

    let rt = runtime()?;
    let bridge = rt
        .block_on(Bridge::create(factory, config))
        .map_err(|err| bridge_error("create bridge", err))?;

    let result = rt.block_on(probe(&bridge, &args.path, args.input_format.as_deref()));
    bridge.terminate();
    let streams = result.map_err(|err| bridge_error("probe", err))?;

    let out = ProbeOutput {
        path: args.path,
        mode: bridge.mode(),
        streams,
    };
    print_probe(&out, format);
    Ok(SUCCESS)
}

async fn probe(
    bridge: &Bridge,
    path: &Path,
    format: Option<&str>,
) -> Result<Vec<StreamInfo>, BridgeError> {
    bridge
        .make_readahead_file(DEVICE, ReadaheadSource::File(path.to_path_buf()))
        .await?;

    let opened = bridge.init_demuxer_file(DEVICE, format, None).await?;
    let [fmt_ctx, streams]: [Value; 2] = opened.into_list()?.try_into().map_err(|_| {
        MarshalError::ShapeMismatch("demuxer result is not [fmt_ctx, streams]".to_string())
    })?;
    let fmt_ctx = fmt_ctx.as_handle()?;
    let pkt = bridge.call(Builtin::PacketAlloc, Vec::new()).await?.as_handle()?;

    let batch = bridge
        .read_frame_multi_until(fmt_ctx, pkt, DEVICE, Value::Int(0))
        .await?;

    bridge.call(Builtin::PacketFree, vec![pkt.into()]).await?;
    bridge.call(Builtin::CloseInput, vec![fmt_ctx.into()]).await?;
    bridge.unlink_readahead_file(DEVICE).await?;

    if batch.code != AVERROR_EOF && batch.code < 0 {
        return Err(BridgeError::engine("read packets", batch.code));
    }
    summarize(streams.as_list()?, &batch)
}

fn summarize(streams: &[Value], batch: &ReadBatch) -> Result<Vec<StreamInfo>, BridgeError> {
    streams
        .iter()
        .map(|stream| {
            let field = |key: &str| -> Result<i64, BridgeError> {
                let value = stream.get(key).cloned().unwrap_or_default();
                Ok(value.as_int()?)
            };
            let index = field("index")?;
            let (packets, bytes) = batch
                .packets
                .get(&index.to_string())
                .map(|list| {
                    let bytes = list
                        .iter()
                        .filter_map(|p| match p {
                            Value::Packet(packet) => Some(packet.data.len()),
                            _ => None,
                        })
                        .sum::<usize>();
                    (list.len(), bytes)
                })
                .unwrap_or((0, 0));
            Ok(StreamInfo {
                index,
                codec_type: media_type_name(MediaType::from_raw(field("codec_type")?)),
                codec_id: field("codec_id")?,
                time_base: format!("{}/{}", field("time_base_num")?, field("time_base_den")?),
                packets,
                bytes,
            })
        })
        .collect()
}

fn media_type_name(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Video => "video",
        MediaType::Audio => "audio",
        MediaType::Data => "data",
        MediaType::Subtitle => "subtitle",
        MediaType::Attachment => "attachment",
        MediaType::Unknown => "unknown",
    }
}

fn print_probe(out: &ProbeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            &["STREAM", "TYPE", "CODEC", "TIME BASE", "PACKETS", "BYTES"],
            out.streams
                .iter()
                .map(|s| {
                    vec![
                        s.index.to_string(),
                        s.codec_type.to_string(),
                        s.codec_id.to_string(),
                        s.time_base.clone(),
                        s.packets.to_string(),
                        s.bytes.to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            println!("{} ({} mode)", out.path.display(), out.mode);
            for s in &out.streams {
                println!(
                    "  #{} {} codec={} tb={} packets={} bytes={}",
                    s.index, s.codec_type, s.codec_id, s.time_base, s.packets, s.bytes
                );
            }
        }
        OutputFormat::Raw => {
            for s in &out.streams {
                println!("{}\t{}\t{}", s.index, s.packets, s.bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn stream(index: i64) -> Value {
        Value::map([
            ("index", Value::Int(index)),
            ("codec_type", Value::Int(1)),
            ("codec_id", Value::Int(2)),
            ("time_base_num", Value::Int(1)),
            ("time_base_den", Value::Int(48000)),
        ])
    }

    #[test]
    fn streams_without_packets_report_zero() {
        let batch = ReadBatch {
            code: AVERROR_EOF,
            packets: BTreeMap::new(),
        };
        let infos = summarize(&[stream(0)], &batch).expect("summary should build");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].codec_type, "audio");
        assert_eq!(infos[0].time_base, "1/48000");
        assert_eq!(infos[0].packets, 0);
    }

    #[test]
    fn missing_fields_are_rejected() {
        let batch = ReadBatch::default();
        let bare = Value::map([("index", Value::Int(0))]);
        assert!(summarize(&[bare], &batch).is_err());
    }
}
