use avbridge_engine::codes::{averror, is_again, is_eof, ENOMEM};
use avbridge_engine::Handle;
use avbridge_marshal::{copyin_codecpar, copyin_packet, copyout_packet_as, PacketCopyout, Value};

use super::{config_map, packet_copyout};
use crate::args::{opt_bool, Args};
use crate::context::EngineContext;
use crate::error::{BridgeError, Result};

/// `ff_init_bsf(name, codecpar?) -> [bsf, pkt]`
pub(super) fn init_bsf(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let name = args.string()?;
    let par_arg = args.next();

    let (par, temporary) = match par_arg {
        Value::Null => (None, false),
        Value::CodecParameters(record) => {
            let par = ctx.engine_mut().codecpar_alloc();
            if par.is_null() {
                return Err(BridgeError::engine("failed to allocate codec parameters", averror(ENOMEM)));
            }
            if let Err(error) = copyin_codecpar(ctx.engine_mut(), par, &record) {
                ctx.engine_mut().codecpar_free(par);
                return Err(error.into());
            }
            (Some(par), true)
        }
        other => {
            let par = other.as_handle().map_err(|e| args.bad(e))?;
            ((!par.is_null()).then_some(par), false)
        }
    };

    let created = ctx.engine_mut().bsf_create(&name, par);
    if let (Some(par), true) = (par, temporary) {
        ctx.engine_mut().codecpar_free(par);
    }
    let bsf = match created {
        Ok(bsf) => bsf,
        Err(code) => return Err(ctx.failure(&format!("failed to create bitstream filter {name}"), code)),
    };
    let pkt = ctx.engine_mut().packet_alloc();
    Ok(Value::List(vec![bsf.into(), pkt.into()]))
}

/// `ff_bsf_multi(bsf, pkt, packets, fin | {fin, copyoutPacket}) -> packets`
pub(super) fn bsf_multi(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let bsf = args.handle()?;
    let pkt = args.handle()?;
    let packets = args.list()?;
    let config = config_map(args.next());
    let mode = packet_copyout(&args, &config, "copyoutPacket")?;

    let mut out = Vec::new();
    let inputs = packets.into_iter().map(Some).chain(opt_bool(&config, "fin").then_some(None));
    for input in inputs {
        let code = match input {
            Some(src) => {
                let src = src.into_packet_ref().map_err(|e| args.bad(e))?;
                copyin_packet(ctx.engine_mut(), pkt, src)?;
                ctx.engine_mut().bsf_send_packet(bsf, Some(pkt))
            }
            None => ctx.engine_mut().bsf_send_packet(bsf, None),
        };
        ctx.check("error while feeding the bitstream filter", code)?;
        ctx.engine_mut().packet_unref(pkt);
        drain(ctx, bsf, pkt, mode, &mut out)?;
    }
    Ok(Value::List(out))
}

fn drain(
    ctx: &mut EngineContext,
    bsf: Handle,
    pkt: Handle,
    mode: PacketCopyout,
    out: &mut Vec<Value>,
) -> Result<()> {
    loop {
        let code = ctx.engine_mut().bsf_receive_packet(bsf, pkt);
        if is_again(code) || is_eof(code) {
            return Ok(());
        }
        ctx.check("error while receiving a packet from the bitstream filter", code)?;
        out.push(copyout_packet_as(ctx.engine_mut(), pkt, mode)?);
        ctx.engine_mut().packet_unref(pkt);
    }
}

/// `ff_free_bsf(bsf, pkt)`
pub(super) fn free_bsf(ctx: &mut EngineContext, mut args: Args) -> Result<Value> {
    let bsf = args.handle()?;
    let pkt = args.handle()?;
    let engine = ctx.engine_mut();
    engine.bsf_free(bsf);
    engine.packet_free(pkt);
    Ok(Value::Null)
}
