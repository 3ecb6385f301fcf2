use std::sync::Arc;
use std::time::Duration;

use avbridge_device::DeviceError;
use avbridge_dispatch::{Bridge, BridgeConfig, BridgeError, Builtin, Function, LinkKind, Mode};
use avbridge_engine::codes::{averror, EAGAIN, EINVAL};
use avbridge_engine::{EngineError, EngineFactory, Field, Variant};
use avbridge_marshal::Value;
use avbridge_soft::SoftFactory;
use bytes::Bytes;

fn soft() -> Arc<dyn EngineFactory> {
    Arc::new(SoftFactory::new())
}

fn parallel() -> bool {
    std::thread::available_parallelism().map_or(1, |n| n.get()) > 1
}

async fn start(config: BridgeConfig) -> Bridge {
    Bridge::create(soft(), config).await.expect("bridge should start")
}

fn every_config() -> Vec<BridgeConfig> {
    vec![
        BridgeConfig::direct(),
        BridgeConfig::default(),
        BridgeConfig::default().with_link(LinkKind::Socket),
        BridgeConfig::default().with_threads(true).with_pool_size(2),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configurations_select_their_topology() {
    let direct = start(BridgeConfig::direct()).await;
    assert_eq!(direct.mode(), Mode::Direct);
    assert_eq!(direct.variant(), Variant::Accelerated);

    let channel = start(BridgeConfig::default()).await;
    assert_eq!(channel.mode(), Mode::Channel);

    let threaded = start(BridgeConfig::default().with_threads(true)).await;
    let expected = if parallel() { Mode::ThreadPool } else { Mode::Channel };
    assert_eq!(threaded.mode(), expected);

    let degraded = Bridge::create(
        Arc::new(SoftFactory::without_acceleration()),
        BridgeConfig::default().with_threads(true),
    )
    .await
    .expect("degraded bridge should start");
    assert_eq!(degraded.variant(), Variant::Degraded);
    assert_eq!(degraded.mode(), Mode::Channel);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn degraded_build_can_be_refused() {
    let err = Bridge::create(
        Arc::new(SoftFactory::without_acceleration()),
        BridgeConfig::direct().with_allow_degraded(false),
    )
    .await
    .expect_err("degraded engine should be refused");
    assert!(matches!(err, BridgeError::DegradedNotAllowed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_failures_fail_creation_in_every_mode() {
    for config in every_config() {
        let err = Bridge::create(Arc::new(SoftFactory::failing("no wasm today")), config.clone())
            .await
            .expect_err("creation should fail");
        match err {
            BridgeError::Load(EngineError::Load { reason, .. }) => {
                assert!(reason.contains("no wasm today"), "{config:?}: {reason}")
            }
            other => panic!("{config:?}: unexpected {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn primitives_and_accessors_work_everywhere() {
    for config in every_config() {
        let bridge = start(config).await;
        let frame = bridge
            .call(Builtin::FrameAlloc, vec![])
            .await
            .expect("frame alloc should work");
        assert!(frame.as_int().expect("handle should be an int") > 0);

        bridge
            .call(Function::Set(Field::FramePts), vec![frame.clone(), Value::Int(42)])
            .await
            .expect("setter should work");
        let pts = bridge
            .call_by_name("AVFrame_pts", vec![frame.clone()])
            .await
            .expect("getter should work");
        assert_eq!(pts, Value::Int(42), "{}", bridge.mode());

        bridge
            .call(Builtin::FrameFree, vec![frame])
            .await
            .expect("frame free should work");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_functions_are_rejected() {
    let bridge = start(BridgeConfig::direct()).await;
    let err = bridge
        .call_by_name("ff_rm_rf", vec![])
        .await
        .expect_err("unknown name should fail");
    assert!(matches!(err, BridgeError::UnknownFunction(name) if name == "ff_rm_rf"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn describe_names_engine_codes() {
    for config in every_config() {
        let bridge = start(config).await;
        let text = bridge.describe(averror(EAGAIN)).await.expect("describe should work");
        assert_eq!(text, "Resource temporarily unavailable");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn files_round_trip_in_every_mode() {
    for config in every_config() {
        let bridge = start(config).await;
        bridge
            .write_file("notes.txt", Bytes::from_static(b"hello"))
            .await
            .expect("write should work");
        let back = bridge.read_file("notes.txt").await.expect("read should work");
        assert_eq!(&back[..], b"hello");

        let path = bridge
            .make_workerfs_file("blob", Bytes::from_static(b"abc"))
            .await
            .expect("workerfs file should be created");
        assert_eq!(path, "/blob.d/blob");
        assert_eq!(&bridge.read_file(&path).await.expect("read should work")[..], b"abc");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unlinking_twice_fails_the_second_time() {
    for config in every_config() {
        let bridge = start(config).await;
        bridge.make_reader("in").await.expect("reader should be created");
        let err = bridge.make_reader("in").await.expect_err("duplicate name should fail");
        assert!(matches!(err, BridgeError::Device(DeviceError::AlreadyExists(_))));

        bridge.unlink("in").await.expect("first unlink should work");
        let err = bridge.unlink("in").await.expect_err("second unlink should fail");
        assert!(
            matches!(err, BridgeError::Device(DeviceError::NotRegistered(ref name)) if name == "in"),
            "{}: {err:?}",
            bridge.mode()
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unlink_cancels_pending_waits() {
    for config in every_config() {
        let bridge = Arc::new(start(config).await);
        bridge.make_reader("idle").await.expect("reader should be created");
        assert!(!bridge.reader_ready("idle").await.expect("ready check should work"));

        let waiter = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.wait_reader("idle").await })
        };
        // give the wait time to register on the engine side
        tokio::time::sleep(Duration::from_millis(50)).await;
        bridge.unlink("idle").await.expect("unlink should work");

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait should settle")
            .expect("task should not panic");
        assert!(
            matches!(outcome, Err(BridgeError::Device(DeviceError::Cancelled(_)))),
            "{}: {outcome:?}",
            bridge.mode()
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sends_wake_waiters() {
    for config in every_config() {
        let bridge = Arc::new(start(config).await);
        bridge.make_reader("in").await.expect("reader should be created");
        let waiter = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.wait_reader("in").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge
            .reader_send("in", Some(Bytes::from_static(b"data")), Default::default())
            .await
            .expect("send should work");
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait should settle")
            .expect("task should not panic")
            .expect("wait should resolve");
        assert!(bridge.reader_ready("in").await.expect("ready check should work"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn synchronous_calls_need_direct_mode() {
    let direct = start(BridgeConfig::direct()).await;
    let frame = direct
        .call_sync(Builtin::FrameAlloc, vec![])
        .expect("sync call should work in direct mode");
    direct
        .call_sync(Builtin::FrameFree, vec![frame])
        .expect("sync call should work in direct mode");

    direct.make_reader("idle").await.expect("reader should be created");
    let err = direct
        .call_sync(Builtin::ReaderDevWait, vec!["idle".into()])
        .expect_err("waiting cannot finish synchronously");
    assert!(matches!(err, BridgeError::WouldBlock(_)));

    let channel = start(BridgeConfig::default()).await;
    let err = channel
        .call_sync(Builtin::FrameAlloc, vec![])
        .expect_err("sync call should be refused");
    assert!(matches!(err, BridgeError::SyncUnavailable(Mode::Channel)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn calls_time_out() {
    for config in every_config() {
        let bridge = start(config.with_call_timeout(Duration::from_millis(50))).await;
        bridge.make_reader("idle").await.expect("reader should be created");
        let err = bridge.wait_reader("idle").await.expect_err("wait should time out");
        assert!(
            matches!(err, BridgeError::Timeout { ref function, .. } if function == "ff_reader_dev_wait"),
            "{}: {err:?}",
            bridge.mode()
        );
        // the bridge stays usable afterwards
        assert_eq!(bridge.describe(averror(EINVAL)).await.expect("describe should work"), "Invalid argument");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_calls_leave_nothing_outstanding() {
    for config in [
        BridgeConfig::default(),
        BridgeConfig::default().with_link(LinkKind::Socket),
    ] {
        let bridge = start(config.with_call_timeout(Duration::from_millis(30))).await;
        bridge.make_reader("never").await.expect("reader should be created");
        for _ in 0..3 {
            let err = bridge.wait_reader("never").await.expect_err("wait should time out");
            assert!(matches!(err, BridgeError::Timeout { .. }), "{err:?}");
        }
        assert_eq!(bridge.outstanding_calls(), 0, "{}", bridge.mode());
        assert!(!bridge.reader_ready("never").await.expect("readiness should be reported"));
        assert_eq!(bridge.outstanding_calls(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn termination_is_final_and_idempotent() {
    for config in [
        BridgeConfig::default(),
        BridgeConfig::default().with_threads(true).with_pool_size(2),
    ] {
        let bridge = Arc::new(start(config).await);
        bridge.make_reader("idle").await.expect("reader should be created");
        let outstanding = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.wait_reader("idle").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        bridge.terminate();
        bridge.terminate();
        assert!(bridge.is_terminated());

        let err = bridge
            .call(Builtin::FrameAlloc, vec![])
            .await
            .expect_err("terminated bridge should refuse calls");
        assert!(matches!(err, BridgeError::Terminated));

        if bridge.mode() == Mode::Channel {
            // outstanding calls are abandoned, not failed
            let settled = tokio::time::timeout(Duration::from_millis(100), outstanding).await;
            assert!(settled.is_err(), "outstanding call should never resolve");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn direct_mode_ignores_terminate() {
    let bridge = start(BridgeConfig::direct()).await;
    bridge.terminate();
    assert!(!bridge.is_terminated());
    bridge
        .call(Builtin::PacketAlloc, vec![])
        .await
        .expect("direct bridge keeps working");
}
