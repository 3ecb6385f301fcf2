#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Arc;

use avbridge::engine::{EngineFactory, Rational, SampleFormat};
use avbridge::marshal::{AudioData, Buffer, Frame, Value};
use avbridge::soft::SoftFactory;
use avbridge::{Bridge, BridgeConfig, Builtin};

const RATE: i64 = 48_000;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/avbridge-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn avbridge(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_avbridge"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("avbridge should run")
}

fn json_stdout(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be json")
}

fn item(list: &Value, index: usize) -> Value {
    list.as_list().expect("result should be a list")[index].clone()
}

/// Mux three mono s16 frames through a direct bridge and return the file bytes.
fn muxed_tone() -> bytes::Bytes {
    let rt = tokio::runtime::Runtime::new().expect("runtime should start");
    rt.block_on(async {
        let factory: Arc<dyn EngineFactory> = Arc::new(SoftFactory::new());
        let bridge = Bridge::create(factory, BridgeConfig::direct())
            .await
            .expect("bridge should start");

        let encoder = bridge
            .call(
                Builtin::InitEncoder,
                vec![
                    "pcm_s16le".into(),
                    Value::map([(
                        "ctx",
                        Value::map([
                            ("sample_fmt", Value::Int(SampleFormat::S16.raw() as i64)),
                            ("sample_rate", Value::Int(RATE)),
                            ("channels", Value::Int(1)),
                        ]),
                    )]),
                ],
            )
            .await
            .expect("encoder should open");
        let (c, frame, pkt) = (item(&encoder, 1), item(&encoder, 2), item(&encoder, 3));

        let frames = (0..3)
            .map(|n| {
                let samples: Vec<i16> = (0..480).map(|i| (i * 3 + n) as i16).collect();
                Frame::audio(SampleFormat::S16, RATE as i32, 1, AudioData::Packed(Buffer::from_i16(&samples)))
                    .with_pts(n as i64 * 480, Rational::new(1, RATE as i32))
                    .into()
            })
            .collect();
        let packets = bridge
            .call(
                Builtin::EncodeMulti,
                vec![c.clone(), frame.clone(), pkt.clone(), Value::List(frames), Value::Bool(true)],
            )
            .await
            .expect("encoding should work");

        let muxer = bridge
            .call(
                Builtin::InitMuxer,
                vec![
                    Value::map([("filename", "tone.avbr".into()), ("open", Value::Bool(true))]),
                    Value::List(vec![Value::List(vec![c.clone(), Value::Int(1), Value::Int(RATE)])]),
                ],
            )
            .await
            .expect("muxer should open");
        let (oc, pb) = (item(&muxer, 0), item(&muxer, 2));
        bridge
            .call(Builtin::WriteHeader, vec![oc.clone()])
            .await
            .expect("header should be written");
        bridge
            .call(Builtin::WriteMulti, vec![oc.clone(), pkt.clone(), packets])
            .await
            .expect("packets should be written");
        bridge
            .call(Builtin::WriteTrailer, vec![oc.clone()])
            .await
            .expect("trailer should be written");
        bridge
            .call(Builtin::FreeMuxer, vec![oc, pb])
            .await
            .expect("muxer should close");
        bridge
            .call(Builtin::FreeEncoder, vec![c, frame, pkt])
            .await
            .expect("encoder should free");
        bridge.read_file("tone.avbr").await.expect("muxed file should exist")
    })
}

#[test]
fn version_prints_package_version() {
    let output = avbridge(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("avbridge "));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn functions_lists_metafunctions() {
    let output = avbridge(&["functions", "--kind", "meta"]);
    assert!(output.status.success());
    let json = json_stdout(&output);
    let names: Vec<&str> = json["functions"]
        .as_array()
        .expect("functions should be an array")
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert!(names.contains(&"ff_read_frame_multi"));
    assert!(names.contains(&"ff_init_muxer"));
    assert!(!names.contains(&"av_packet_alloc"));
}

#[test]
fn unknown_function_kind_is_a_usage_error() {
    let output = avbridge(&["functions", "--kind", "bogus"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn info_reports_the_selected_mode() {
    let direct = json_stdout(&avbridge(&["info", "--direct"]));
    assert_eq!(direct["mode"], "direct");
    assert_eq!(direct["engine"], "soft");

    let channel = json_stdout(&avbridge(&["info", "--socket"]));
    assert_eq!(channel["mode"], "channel");
    assert_eq!(channel["link"], "socket");
}

#[test]
fn probe_counts_packets_in_every_mode() {
    let dir = unique_temp_dir("probe");
    let path = dir.join("tone.avbr");
    std::fs::write(&path, muxed_tone()).expect("input should be writable");
    let path = path.to_str().expect("temp path should be utf-8");

    for flags in [&["--direct"][..], &[][..], &["--socket"][..], &["--threads", "--pool-size", "2"][..]] {
        let mut args = vec!["probe", path];
        args.extend_from_slice(flags);
        let output = avbridge(&args);
        assert!(
            output.status.success(),
            "{flags:?}: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        let json = json_stdout(&output);
        let streams = json["streams"].as_array().expect("streams should be an array");
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0]["codec_type"], "audio");
        assert_eq!(streams[0]["time_base"], "1/48000");
        assert_eq!(streams[0]["packets"], 3);
        assert_eq!(streams[0]["bytes"], 3 * 480 * 2);
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn probe_of_missing_file_fails() {
    let output = avbridge(&["probe", "/nonexistent/avbridge/input.avbr"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn malformed_config_is_invalid_data() {
    let dir = unique_temp_dir("config");
    let config = dir.join("bridge.json");
    std::fs::write(&config, "{ not json").expect("config should be writable");

    let output = avbridge(&["--config", config.to_str().expect("utf-8 path"), "info"]);
    assert_eq!(output.status.code(), Some(60));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn config_file_selects_direct_mode() {
    let dir = unique_temp_dir("direct");
    let config = dir.join("bridge.json");
    std::fs::write(&config, r#"{"isolate": false}"#).expect("config should be writable");

    let output = avbridge(&["--config", config.to_str().expect("utf-8 path"), "info"]);
    assert!(output.status.success());
    assert_eq!(json_stdout(&output)["mode"], "direct");

    let _ = std::fs::remove_dir_all(&dir);
}
