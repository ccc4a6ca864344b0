//! Queue-to-workslot link changes through `GRPMSK_CHG`.

use crate::io::RegisterIo;
use crate::port::{EventPort, Workslot};
use crate::regs::{
    GRPMSK_CHG_ENABLE_SHIFT, GRPMSK_CHG_GRP_MASK, GRPMSK_CHG_KEEP_OTHERS, SSOW_LF_GWS_GRPMSK_CHG,
};

/// `GRPMSK_CHG` word adding (or removing) `queue` in mask set 0 (set bit left clear).
pub fn grpmsk_chg_word(queue: u16, enable: bool) -> u64 {
    (u64::from(queue) & GRPMSK_CHG_GRP_MASK)
        | GRPMSK_CHG_KEEP_OTHERS
        | (u64::from(enable) << GRPMSK_CHG_ENABLE_SHIFT)
}

fn modify(io: &dyn RegisterIo, ws: &Workslot, queue: u16, enable: bool) {
    io.write64(ws.reg(SSOW_LF_GWS_GRPMSK_CHG), grpmsk_chg_word(queue, enable));
}

/// Sets membership of `queue` on every workslot of `port`. No barrier; callers batch.
pub fn set_port_link(io: &dyn RegisterIo, port: &EventPort, queue: u16, enable: bool) {
    for ws in port.workslots() {
        modify(io, ws, queue, enable);
    }
}

/// Unlinks every queue from every port, then issues one barrier.
pub fn clear_all_links(io: &dyn RegisterIo, ports: &[EventPort], nb_queues: u16) {
    for port in ports {
        for queue in 0..nb_queues {
            set_port_link(io, port, queue, false);
        }
    }
    io.barrier();
}
