use std::sync::Arc;
use std::time::Duration;

use avbridge_device::{HostError, ReadRequest};
use avbridge_dispatch::{Bridge, BridgeConfig, BridgeError, Builtin, Function, LinkKind, Mode};
use avbridge_engine::codes::AVERROR_EOF;
use avbridge_engine::{EngineFactory, Field, Rational, SampleFormat};
use avbridge_marshal::{AudioData, Buffer, Frame, FrameData, Value};
use avbridge_soft::SoftFactory;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

const RATE: i64 = 48_000;

async fn start(config: BridgeConfig) -> Bridge {
    let factory: Arc<dyn EngineFactory> = Arc::new(SoftFactory::new());
    Bridge::create(factory, config).await.expect("bridge should start")
}

fn every_config() -> Vec<BridgeConfig> {
    vec![
        BridgeConfig::direct(),
        BridgeConfig::default(),
        BridgeConfig::default().with_link(LinkKind::Socket),
        BridgeConfig::default().with_threads(true).with_pool_size(2),
    ]
}

fn handle_at(list: &Value, index: usize) -> Value {
    list.as_list().expect("result should be a list")[index].clone()
}

fn tone(samples: usize, offset: i16) -> Vec<i16> {
    (0..samples).map(|i| (i as i16).wrapping_mul(7).wrapping_add(offset)).collect()
}

/// Encode two mono s16 frames and mux them into the in-memory file `out.avbr`.
async fn mux_tone(bridge: &Bridge) -> Bytes {
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
    let (c, frame, pkt) = (handle_at(&encoder, 1), handle_at(&encoder, 2), handle_at(&encoder, 3));

    let frames: Vec<Value> = (0..2)
        .map(|n| {
            let samples = Buffer::from_i16(&tone(480, n as i16));
            Frame::audio(SampleFormat::S16, RATE as i32, 1, AudioData::Packed(samples))
                .with_pts(n * 480, Rational::new(1, RATE as i32))
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
    assert_eq!(packets.as_list().expect("packets should be a list").len(), 2);

    let muxer = bridge
        .call(
            Builtin::InitMuxer,
            vec![
                Value::map([("filename", "out.avbr".into()), ("open", Value::Bool(true))]),
                Value::List(vec![Value::List(vec![c.clone(), Value::Int(1), Value::Int(RATE)])]),
            ],
        )
        .await
        .expect("muxer should open");
    assert_eq!(handle_at(&muxer, 1), Value::from("avbr"));
    let (oc, pb) = (handle_at(&muxer, 0), handle_at(&muxer, 2));

    let code = bridge
        .call(Builtin::WriteHeader, vec![oc.clone()])
        .await
        .expect("header call should work");
    assert_eq!(code, Value::Int(0));
    bridge
        .call(Builtin::WriteMulti, vec![oc.clone(), pkt.clone(), packets])
        .await
        .expect("packets should be written");
    let code = bridge
        .call(Builtin::WriteTrailer, vec![oc.clone()])
        .await
        .expect("trailer call should work");
    assert_eq!(code, Value::Int(0));
    bridge
        .call(Builtin::FreeMuxer, vec![oc, pb])
        .await
        .expect("muxer should close");
    bridge
        .call(Builtin::FreeEncoder, vec![c, frame, pkt])
        .await
        .expect("encoder should free");

    bridge.read_file("out.avbr").await.expect("muxed file should exist")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn planar_float_frames_round_trip() {
    let left: Vec<f32> = (0..960).map(|i| i as f32 / 960.0).collect();
    let right: Vec<f32> = left.iter().map(|s| -s).collect();

    for config in every_config() {
        let bridge = start(config).await;
        let record = Frame::audio(
            SampleFormat::Fltp,
            RATE as i32,
            2,
            AudioData::Planar(vec![Buffer::from_f32(&left), Buffer::from_f32(&right)]),
        )
        .with_pts(1920, Rational::new(1, RATE as i32));

        let frame = bridge
            .call(Builtin::FrameAlloc, vec![])
            .await
            .expect("frame alloc should work");
        bridge
            .call(Builtin::CopyinFrame, vec![frame.clone(), record.into()])
            .await
            .expect("copy-in should work");
        let nb_samples = bridge
            .call(Function::Get(Field::FrameNbSamples), vec![frame.clone()])
            .await
            .expect("getter should work");
        assert_eq!(nb_samples, Value::Int(960));

        let back = bridge
            .call(Builtin::CopyoutFrame, vec![frame.clone()])
            .await
            .expect("copy-out should work")
            .into_frame()
            .expect("copy-out should produce a frame record");
        assert_eq!(back.format, SampleFormat::Fltp.raw());
        assert_eq!(back.pts, Some(1920));
        let FrameData::Audio(audio) = back.data else {
            panic!("expected an audio frame");
        };
        assert_eq!((audio.channels, audio.nb_samples, audio.sample_rate), (2, 960, RATE as i32));
        let AudioData::Planar(planes) = audio.samples else {
            panic!("expected planar samples");
        };
        assert_eq!(planes[0].to_f32(), left, "{}", bridge.mode());
        assert_eq!(planes[1].to_f32(), right, "{}", bridge.mode());

        bridge
            .call(Builtin::FrameFree, vec![frame])
            .await
            .expect("frame free should work");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn encode_and_mux_into_a_memory_file() {
    for config in every_config() {
        let bridge = start(config).await;
        let file = mux_tone(&bridge).await;
        assert_eq!(&file[..4], b"AVBR", "{}", bridge.mode());
        // 2 x 480 s16 samples of payload at least
        assert!(file.len() > 1920);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn demux_from_a_stream_reader_fed_on_demand() {
    for config in every_config() {
        let bridge = Arc::new(start(config).await);
        let file = mux_tone(&bridge).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<ReadRequest>();
        bridge.on_read(move |request| {
            let _ = tx.send(request);
            async { Ok(()) }
        });
        let feeder = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move {
                let mut fed = false;
                while let Some(request) = rx.recv().await {
                    assert_eq!(request.name, "in.avbr");
                    if !fed {
                        fed = true;
                        bridge
                            .reader_send("in.avbr", Some(file.clone()), Default::default())
                            .await
                            .expect("feeding should work");
                    }
                    bridge
                        .reader_send("in.avbr", None, Default::default())
                        .await
                        .expect("end of stream should be accepted");
                }
            })
        };

        bridge.make_reader("in.avbr").await.expect("reader should be created");
        let opened = tokio::time::timeout(
            Duration::from_secs(10),
            bridge.init_demuxer_file("in.avbr", None, None),
        )
        .await
        .expect("demuxer should not hang")
        .expect("demuxer should open");
        let fmt_ctx = handle_at(&opened, 0).as_handle().expect("fmt_ctx should be a handle");
        let streams = handle_at(&opened, 1);
        let stream = &streams.as_list().expect("streams should be a list")[0];
        assert_eq!(stream.get("time_base_den"), Some(&Value::Int(RATE)));

        let pkt = bridge
            .call(Builtin::PacketAlloc, vec![])
            .await
            .expect("packet alloc should work")
            .as_handle()
            .expect("packet should be a handle");
        let batch = tokio::time::timeout(
            Duration::from_secs(10),
            bridge.read_frame_multi_until(fmt_ctx, pkt, "in.avbr", Value::Int(0)),
        )
        .await
        .expect("reading should not hang")
        .expect("reading should work");
        assert_eq!(batch.code, AVERROR_EOF, "{}", bridge.mode());
        let packets = &batch.packets["0"];
        assert_eq!(packets.len(), 2);
        let first = packets[0].clone().into_packet().expect("copy-out should produce packets");
        assert_eq!(first.data.to_i16(), tone(480, 0));
        assert_eq!(first.time_base, Some(Rational::new(1, RATE as i32)));

        feeder.abort();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn host_errors_surface_from_engine_reads() {
    for config in every_config() {
        let bridge = start(config).await;
        let raised = HostError::msg("upstream went away");
        let thrown = raised.clone();
        bridge.on_read(move |_| {
            let error = thrown.clone();
            async move { Err(error) }
        });
        bridge.make_reader("in.avbr").await.expect("reader should be created");

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            bridge.init_demuxer_file("in.avbr", None, None),
        )
        .await
        .expect("demuxer should not hang")
        .expect_err("probing should fail");
        let BridgeError::Host(seen) = err else {
            panic!("{}: expected a host error, got {err:?}", bridge.mode());
        };
        assert_eq!(seen.to_string(), "upstream went away");
        match bridge.mode() {
            // the host error object itself comes back where no wire is crossed
            Mode::Direct | Mode::ThreadPool => assert!(HostError::same(&seen, &raised)),
            Mode::Channel => assert!(!HostError::same(&seen, &raised)),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serialized_operations_finish_in_submission_order() {
    for config in every_config() {
        let bridge = start(config).await;
        let log = Arc::new(Mutex::new(Vec::new()));

        let op = |label: &'static str, delay: u64| {
            let log = Arc::clone(&log);
            bridge.serially(move |caller| async move {
                log.lock().push(format!("{label} start"));
                tokio::time::sleep(Duration::from_millis(delay)).await;
                caller.call(Builtin::PacketAlloc, vec![]).await?;
                log.lock().push(format!("{label} end"));
                Ok::<_, BridgeError>(label)
            })
        };
        let (a, b, c) = tokio::join!(op("a", 40), op("b", 0), op("c", 10));
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), ("a", "b", "c"));
        assert_eq!(
            *log.lock(),
            ["a start", "a end", "b start", "b end", "c start", "c end"],
            "{}",
            bridge.mode()
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_metafunctions_do_not_let_later_operations_overtake() {
    for config in every_config() {
        let bridge = start(config.with_call_timeout(Duration::from_millis(30))).await;
        let log = Arc::new(Mutex::new(Vec::new()));

        let long = {
            let log = Arc::clone(&log);
            bridge.serially(move |_| async move {
                log.lock().push("a start");
                tokio::time::sleep(Duration::from_millis(150)).await;
                log.lock().push("a end");
                Ok::<_, BridgeError>(())
            })
        };
        let behind = async {
            let err = bridge
                .call(Builtin::Error, vec![Value::Int(AVERROR_EOF as i64)])
                .await
                .expect_err("queued call should time out");
            assert!(matches!(err, BridgeError::Timeout { .. }), "{err:?}");
            let log = Arc::clone(&log);
            bridge
                .serially(move |_| async move {
                    log.lock().push("c start");
                    Ok::<_, BridgeError>(())
                })
                .await
        };
        let (a, c) = tokio::join!(long, behind);
        a.expect("a should finish");
        c.expect("c should finish");
        assert_eq!(*log.lock(), ["a start", "a end", "c start"], "{}", bridge.mode());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_metafunctions_do_not_block_the_queue() {
    for config in every_config() {
        let bridge = start(config).await;
        let err = bridge
            .call(Builtin::InitEncoder, vec!["h264".into(), Value::Null])
            .await
            .expect_err("unknown encoder should fail");
        assert!(err.code().is_some(), "{err:?}");
        let text = bridge.describe(AVERROR_EOF).await.expect("queue should move on");
        assert_eq!(text, "End of file");
    }
}
