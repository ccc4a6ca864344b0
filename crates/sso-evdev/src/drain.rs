//! Workslot reset and group drain performed when the device starts or stops.

use std::hint::spin_loop;

use crate::io::RegisterIo;
use crate::port::{EventPort, Workslot};
use crate::regs::{
    self, PendState, SchedType, GETWRK_GROUPED, GETWRK_WAIT, GGRP_INT_CNT_CQ_DS_MASK,
    SSOW_LF_GWS_OP_DESCHED, SSOW_LF_GWS_OP_GET_WORK, SSOW_LF_GWS_OP_GWC_INVAL,
    SSOW_LF_GWS_OP_SWTAG_FLUSH, SSOW_LF_GWS_OP_SWTAG_UNTAG, SSOW_LF_GWS_PENDSTATE,
    SSOW_LF_GWS_TAG, SSOW_LF_GWS_WQP, SSO_LF_GGRP_AQ_CNT, SSO_LF_GGRP_INT_CNT,
    SSO_LF_GGRP_MISC_CNT, SSO_LF_GGRP_QCTL, TAG_GRP_SHIFT, TAG_PEND_GET_WORK, TAG_TT_SHIFT,
};

/// A residual event pulled out of a group during drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub queue: u16,
    pub sched_type: SchedType,
    pub tag: u32,
    /// Work-queue entry pointer as the hardware reported it.
    pub wqe: u64,
}

fn wait_pendstate(io: &dyn RegisterIo, ws: &Workslot, busy: PendState) {
    while PendState::from_bits_truncate(io.read64(ws.reg(SSOW_LF_GWS_PENDSTATE))).intersects(busy)
    {
        spin_loop();
    }
}

/// Returns a workslot to the idle state, descheduling anything it still holds.
pub fn reset_workslot(io: &dyn RegisterIo, ws: &Workslot) {
    wait_pendstate(io, ws, PendState::all());

    let tag = io.read64(ws.reg(SSOW_LF_GWS_TAG));
    let tt = SchedType::from_bits(tag >> TAG_TT_SHIFT);
    if tt != SchedType::Empty {
        if matches!(tt, SchedType::Atomic | SchedType::Ordered) {
            io.write64(ws.reg(SSOW_LF_GWS_OP_SWTAG_UNTAG), 0);
        }
        io.write64(ws.reg(SSOW_LF_GWS_OP_DESCHED), 0);
    }

    wait_pendstate(io, ws, PendState::PEND_DESCHED);
}

/// Grouped get-work on `queue`. Hands a non-empty event to `on_event`, then drops the tag.
fn get_work(
    io: &dyn RegisterIo,
    ws: &mut Workslot,
    queue: u16,
    on_event: &mut dyn FnMut(Event),
) -> bool {
    io.write64(
        ws.reg(SSOW_LF_GWS_OP_GET_WORK),
        u64::from(queue) | GETWRK_GROUPED | GETWRK_WAIT,
    );
    let tag = loop {
        let tag = io.read64(ws.reg(SSOW_LF_GWS_TAG));
        if tag & TAG_PEND_GET_WORK == 0 {
            break tag;
        }
        spin_loop();
    };
    let wqe = io.read64(ws.reg(SSOW_LF_GWS_WQP));

    ws.cur_tt = SchedType::from_bits(tag >> TAG_TT_SHIFT);
    ws.cur_grp = ((tag >> TAG_GRP_SHIFT) & 0x3ff) as u16;

    let got = wqe != 0;
    if got {
        on_event(Event {
            queue: ws.cur_grp,
            sched_type: ws.cur_tt,
            tag: tag as u32,
            wqe,
        });
    }
    if ws.cur_tt != SchedType::Empty {
        io.write64(ws.reg(SSOW_LF_GWS_OP_SWTAG_FLUSH), 0);
        ws.cur_tt = SchedType::Empty;
    }
    got
}

fn group_has_work(io: &dyn RegisterIo, grp_base: u64) -> bool {
    let aq = io.read64(grp_base + SSO_LF_GGRP_AQ_CNT);
    let cq_ds = io.read64(grp_base + SSO_LF_GGRP_INT_CNT) & GGRP_INT_CNT_CQ_DS_MASK;
    let misc = io.read64(grp_base + SSO_LF_GGRP_MISC_CNT);
    aq != 0 || cq_ds != 0 || misc != 0
}

/// Pulls every pending event out of group `queue` through `ws`.
///
/// Returns the number of events handed to `on_event`.
pub fn flush_group(
    io: &dyn RegisterIo,
    ws: &mut Workslot,
    queue: u16,
    grp_base: u64,
    on_event: &mut dyn FnMut(Event),
) -> usize {
    let mut flushed = 0;
    while group_has_work(io, grp_base) {
        if get_work(io, ws, queue, on_event) {
            flushed += 1;
        }
    }
    io.write64(ws.reg(SSOW_LF_GWS_OP_GWC_INVAL), 0);
    flushed
}

/// Resets every workslot, drains the groups through the first workslot of port 0, and leaves
/// each group's dispatch enabled or disabled per `enable`.
///
/// When enabling, every group is drained before its QCTL is set, including groups a previous
/// stop left disabled. When disabling, groups whose QCTL already reads 0 are skipped.
pub fn cleanup(
    io: &dyn RegisterIo,
    bar2: u64,
    ports: &mut [EventPort],
    nb_queues: u16,
    enable: bool,
    on_event: &mut dyn FnMut(Event),
) -> usize {
    for port in ports.iter_mut() {
        for ws in port.slots_mut().as_mut_slice() {
            reset_workslot(io, ws);
            ws.clear_tracking();
        }
    }
    io.barrier();

    let Some(port0) = ports.first_mut() else {
        return 0;
    };
    let ws = port0.slots_mut().first_mut();
    let mut flushed = 0;
    for queue in 0..nb_queues {
        let base = regs::ggrp_base(bar2, queue);
        if enable || io.read64(base + SSO_LF_GGRP_QCTL) != 0 {
            flushed += flush_group(io, ws, queue, base, on_event);
        }
        io.write64(base + SSO_LF_GGRP_QCTL, u64::from(enable));
    }
    ws.clear_tracking();
    io.barrier();

    tracing::debug!(flushed, nb_queues, enable, "groups drained");
    flushed
}
