//! Human-readable register dump.

use std::fmt::{self, Write};

use crate::dev::SsoDevice;
use crate::regs::{self, *};

const GWS_REGS: &[(&str, u64)] = &[
    ("LINKS", SSOW_LF_GWS_LINKS),
    ("PENDWQP", SSOW_LF_GWS_PENDWQP),
    ("PENDSTATE", SSOW_LF_GWS_PENDSTATE),
    ("NW_TIM", SSOW_LF_GWS_NW_TIM),
    ("TAG", SSOW_LF_GWS_TAG),
    ("WQP", SSOW_LF_GWS_WQP),
    ("SWTP", SSOW_LF_GWS_SWTP),
    ("PENDTAG", SSOW_LF_GWS_PENDTAG),
];

const GGRP_REGS: &[(&str, u64)] = &[
    ("QCTL", SSO_LF_GGRP_QCTL),
    ("INT", SSO_LF_GGRP_INT),
    ("INT_THR", SSO_LF_GGRP_INT_THR),
    ("INT_CNT", SSO_LF_GGRP_INT_CNT),
    ("XAQ_CNT", SSO_LF_GGRP_XAQ_CNT),
    ("AQ_CNT", SSO_LF_GGRP_AQ_CNT),
    ("AQ_THR", SSO_LF_GGRP_AQ_THR),
    ("MISC_CNT", SSO_LF_GGRP_MISC_CNT),
];

impl SsoDevice {
    /// Writes the workslot and group register state of the current configuration.
    pub fn dump(&self, out: &mut impl Write) -> fmt::Result {
        let io = self.regs();
        writeln!(
            out,
            "SSO: {} ports ({}), {} queues, configured={}",
            self.nb_ports(),
            if self.dual_ws() { "dual" } else { "single" },
            self.nb_queues(),
            self.is_configured()
        )?;
        for port in self.ports() {
            for ws in port.workslots() {
                writeln!(out, "port {} ws {} @ {:#x}", port.id(), ws.lf(), ws.base())?;
                for &(name, off) in GWS_REGS {
                    writeln!(out, "  {name:<10} {:#018x}", io.read64(ws.reg(off)))?;
                }
            }
        }
        for queue in 0..self.nb_queues() {
            let base = regs::ggrp_base(self.bar2(), queue);
            writeln!(out, "grp {queue} @ {base:#x}")?;
            for &(name, off) in GGRP_REGS {
                writeln!(out, "  {name:<10} {:#018x}", io.read64(base + off))?;
            }
        }
        Ok(())
    }
}
