//! Direct mode: the engine lives in the caller's context.

use std::sync::Arc;

use avbridge_device::{DeviceConfig, DeviceTable};
use avbridge_engine::{EngineFactory, EngineOptions, Variant};
use avbridge_marshal::Value;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::context::{invoke, EngineContext, Outcome};
use crate::error::{BridgeError, Result};
use crate::function::Function;

pub(crate) struct Direct {
    ctx: Arc<Mutex<EngineContext>>,
    devices: Arc<DeviceTable>,
}

impl Direct {
    pub(crate) fn load(factory: &dyn EngineFactory, variant: Variant, devices: DeviceConfig) -> Result<Self> {
        let devices = DeviceTable::new(devices);
        let options = EngineOptions { variant, threads: 1 };
        let engine = factory.create(&options, devices.clone())?;
        tracing::debug!(engine = factory.name(), ?variant, "engine loaded in caller context");
        Ok(Self {
            ctx: Arc::new(Mutex::new(EngineContext::new(engine, Arc::clone(&devices)))),
            devices,
        })
    }

    pub(crate) fn devices(&self) -> &Arc<DeviceTable> {
        &self.devices
    }

    /// Run `function` now. The engine lock is held only for the
    /// synchronous part.
    pub(crate) fn invoke(&self, function: Function, args: Vec<Value>) -> Result<Outcome> {
        let mut ctx = self.ctx.lock();
        invoke(&mut ctx, function, args)
    }

    /// Run `function` when the returned future is first polled.
    pub(crate) fn call(&self, function: Function, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        let ctx = Arc::clone(&self.ctx);
        async move {
            let outcome = {
                let mut ctx = ctx.lock();
                invoke(&mut ctx, function, args)?
            };
            match outcome {
                Outcome::Ready(value) => Ok(value),
                Outcome::Pending(pending) => pending.await,
            }
        }
        .boxed()
    }

    pub(crate) fn call_sync(&self, function: Function, args: Vec<Value>) -> Result<Value> {
        match self.invoke(function, args)? {
            Outcome::Ready(value) => Ok(value),
            Outcome::Pending(_) => Err(BridgeError::WouldBlock(function.name().into_owned())),
        }
    }
}
