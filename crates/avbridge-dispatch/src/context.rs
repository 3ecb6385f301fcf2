use std::collections::HashMap;
use std::sync::Arc;

use avbridge_device::DeviceTable;
use avbridge_engine::codes::{averror, ECANCELED};
use avbridge_engine::{Engine, Handle, Rational};
use avbridge_marshal::Value;
use futures::future::BoxFuture;

use crate::error::{BridgeError, Result};
use crate::function::{Function, FunctionKind};
use crate::{devices, meta, primitive};

/// Result of running a function: a value now, or one to await.
///
/// Only device functions produce pending outcomes; the engine itself is
/// never entered from the future.
pub enum Outcome {
    Ready(Value),
    Pending(BoxFuture<'static, Result<Value>>),
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Outcome::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Engine-side state of one bridge: the engine, its device table and the
/// bookkeeping metafunctions keep between calls.
pub struct EngineContext {
    engine: Box<dyn Engine>,
    devices: Arc<DeviceTable>,
    /// Inputs opened by a demuxer init that has not finished probing.
    pub(crate) pending_opens: HashMap<String, Handle>,
    /// Output time base of each filter graph sink.
    pub(crate) sink_time_bases: HashMap<Handle, Rational>,
    /// Sinks of each filter graph.
    pub(crate) graph_sinks: HashMap<Handle, Vec<Handle>>,
}

impl EngineContext {
    pub fn new(engine: Box<dyn Engine>, devices: Arc<DeviceTable>) -> Self {
        Self {
            engine,
            devices,
            pending_opens: HashMap::new(),
            sink_time_bases: HashMap::new(),
            graph_sinks: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn Engine {
        self.engine.as_mut()
    }

    pub fn devices(&self) -> &Arc<DeviceTable> {
        &self.devices
    }

    /// Drop the bookkeeping of a freed filter graph.
    pub(crate) fn forget_graph(&mut self, graph: Handle) {
        if let Some(sinks) = self.graph_sinks.remove(&graph) {
            for sink in sinks {
                self.sink_time_bases.remove(&sink);
            }
        }
    }

    /// Turn a failure code into an error. A cancelled trap carrying a host
    /// error re-raises that error.
    pub(crate) fn check(&self, context: &str, code: i32) -> Result<i32> {
        if code >= 0 {
            return Ok(code);
        }
        Err(self.failure(context, code))
    }

    pub(crate) fn failure(&self, context: &str, code: i32) -> BridgeError {
        if code == averror(ECANCELED) {
            if let Some(error) = self.devices.take_thrown_error() {
                return BridgeError::Host(error);
            }
        }
        BridgeError::engine(context, code)
    }

    /// Re-raise a host error thrown by a trap during a primitive call.
    fn surface_thrown(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Int(code) if *code == averror(ECANCELED) as i64) {
            if let Some(error) = self.devices.take_thrown_error() {
                return Err(BridgeError::Host(error));
            }
        }
        Ok(())
    }
}

/// Run one function against the engine context.
pub fn invoke(ctx: &mut EngineContext, function: Function, args: Vec<Value>) -> Result<Outcome> {
    tracing::trace!(%function, args = args.len(), "invoke");
    // a host error thrown into a call that swallowed it must not leak into this one
    let _ = ctx.devices.take_thrown_error();
    match function {
        Function::Get(field) => primitive::get(ctx, field, args).map(Outcome::Ready),
        Function::Set(field) => primitive::set(ctx, field, args).map(Outcome::Ready),
        Function::Builtin(builtin) => match builtin.kind() {
            FunctionKind::Primitive => {
                let value = primitive::call(ctx, builtin, args)?;
                ctx.surface_thrown(&value)?;
                Ok(Outcome::Ready(value))
            }
            FunctionKind::Device => devices::call(&ctx.devices, builtin, args),
            FunctionKind::Meta => meta::call(ctx, builtin, args).map(Outcome::Ready),
        },
    }
}
