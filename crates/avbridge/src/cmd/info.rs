use std::path::Path;
use std::sync::Arc;

use avbridge_dispatch::{Bridge, LinkKind, Mode};
use avbridge_engine::{EngineFactory, Variant};
use avbridge_soft::SoftFactory;
use serde::Serialize;

use crate::cmd::{load_config, runtime, InfoArgs};
use crate::exit::{bridge_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct CapabilityInfo {
    accelerated: bool,
    degraded: bool,
    threaded: bool,
}

#[derive(Serialize)]
struct InfoOutput {
    engine: String,
    mode: Mode,
    variant: Variant,
    link: Option<LinkKind>,
    pool_size: Option<usize>,
    call_timeout_ms: Option<u64>,
    parallelism: usize,
    capabilities: CapabilityInfo,
}

pub fn run(args: InfoArgs, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    let config = args.bridge.apply(load_config(config)?)?;
    let factory: Arc<dyn EngineFactory> = Arc::new(SoftFactory::new());
    let caps = factory.capabilities();

    let rt = runtime()?;
    let bridge = rt
        .block_on(Bridge::create(Arc::clone(&factory), config))
        .map_err(|err| bridge_error("create bridge", err))?;

    let mode = bridge.mode();
    let out = InfoOutput {
        engine: factory.name().to_string(),
        mode,
        variant: bridge.variant(),
        link: (mode == Mode::Channel).then_some(bridge.config().link),
        pool_size: (mode == Mode::ThreadPool).then_some(bridge.config().pool_size),
        call_timeout_ms: bridge.config().call_timeout_ms,
        parallelism: std::thread::available_parallelism().map_or(1, |n| n.get()),
        capabilities: CapabilityInfo {
            accelerated: caps.accelerated,
            degraded: caps.degraded,
            threaded: caps.threaded,
        },
    };
    bridge.terminate();

    print_info(&out, format);
    Ok(SUCCESS)
}

fn variant_name(variant: Variant) -> &'static str {
    match variant {
        Variant::Accelerated => "accelerated",
        Variant::Degraded => "degraded",
    }
}

fn link_name(link: LinkKind) -> &'static str {
    match link {
        LinkKind::Memory => "memory",
        LinkKind::Socket => "socket",
    }
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    let rows = [
        ("engine", out.engine.clone()),
        ("mode", out.mode.to_string()),
        ("variant", variant_name(out.variant).to_string()),
        ("link", out.link.map_or("-", link_name).to_string()),
        (
            "pool_size",
            out.pool_size.map_or_else(|| "-".to_string(), |n| n.to_string()),
        ),
        (
            "call_timeout_ms",
            out.call_timeout_ms
                .map_or_else(|| "none".to_string(), |ms| ms.to_string()),
        ),
        ("parallelism", out.parallelism.to_string()),
        ("threaded", out.capabilities.threaded.to_string()),
    ];

    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            &["FIELD", "VALUE"],
            rows.into_iter()
                .map(|(k, v)| vec![k.to_string(), v])
                .collect(),
        ),
        OutputFormat::Pretty => {
            for (k, v) in rows {
                println!("{k:<16} {v}");
            }
        }
        OutputFormat::Raw => println!("{}", out.mode),
    }
}
