//! SSO / SSOW LF register map (BAR2 relative).

use bitflags::bitflags;

pub const RVU_BLOCK_ADDR_SSO: u64 = 0x7;
pub const RVU_BLOCK_ADDR_SSOW: u64 = 0x8;

/// Hardware ceilings independent of what the AF provisions.
pub const SSO_MAX_VHGRP: u16 = 256;
pub const SSO_MAX_VHWS: u16 = 52;

// Group (GGRP) LF registers.
pub const SSO_LF_GGRP_QCTL: u64 = 0x20;
pub const SSO_LF_GGRP_INT: u64 = 0x100;
pub const SSO_LF_GGRP_INT_THR: u64 = 0x140;
pub const SSO_LF_GGRP_INT_CNT: u64 = 0x180;
pub const SSO_LF_GGRP_XAQ_CNT: u64 = 0x1b0;
pub const SSO_LF_GGRP_AQ_CNT: u64 = 0x1c0;
pub const SSO_LF_GGRP_AQ_THR: u64 = 0x1e0;
pub const SSO_LF_GGRP_MISC_CNT: u64 = 0x200;

// Workslot (GWS) LF registers.
pub const SSOW_LF_GWS_LINKS: u64 = 0x10;
pub const SSOW_LF_GWS_PENDWQP: u64 = 0x40;
pub const SSOW_LF_GWS_PENDSTATE: u64 = 0x50;
pub const SSOW_LF_GWS_NW_TIM: u64 = 0x70;
pub const SSOW_LF_GWS_GRPMSK_CHG: u64 = 0x80;
pub const SSOW_LF_GWS_TAG: u64 = 0x200;
pub const SSOW_LF_GWS_WQP: u64 = 0x210;
pub const SSOW_LF_GWS_SWTP: u64 = 0x220;
pub const SSOW_LF_GWS_PENDTAG: u64 = 0x230;
pub const SSOW_LF_GWS_OP_GET_WORK: u64 = 0x600;
pub const SSOW_LF_GWS_OP_SWTAG_FLUSH: u64 = 0x800;
pub const SSOW_LF_GWS_OP_SWTAG_UNTAG: u64 = 0x810;
pub const SSOW_LF_GWS_OP_DESCHED: u64 = 0x880;
pub const SSOW_LF_GWS_OP_GWC_INVAL: u64 = 0xe00;

/// `GRPMSK_CHG`: leave the other three membership-change slots untouched. The mask set
/// selector (bit 12) stays 0.
pub const GRPMSK_CHG_KEEP_OTHERS: u64 = 0x8000_8000_8000_0000;
pub const GRPMSK_CHG_ENABLE_SHIFT: u32 = 14;
pub const GRPMSK_CHG_GRP_MASK: u64 = 0x3ff;

/// `GET_WORK`: restrict the request to the group in bits 9:0.
pub const GETWRK_GROUPED: u64 = 1 << 18;
/// `GET_WORK`: wait for work instead of returning immediately.
pub const GETWRK_WAIT: u64 = 1 << 16;

/// `TAG`: get-work still in flight.
pub const TAG_PEND_GET_WORK: u64 = 1 << 63;
pub const TAG_TT_SHIFT: u32 = 32;
pub const TAG_GRP_SHIFT: u32 = 36;

/// `INT_CNT` fields that count work sitting in the conflicted/descheduled lists.
pub const GGRP_INT_CNT_CQ_DS_MASK: u64 = 0x3FFF_3FFF_0000;

bitflags! {
    /// Busy bits of `SSOW_LF_GWS_PENDSTATE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PendState: u64 {
        const PEND_GET_WORK = 1 << 63;
        const PEND_SWITCH = 1 << 62;
        const PEND_DESCHED = 1 << 58;
    }
}

/// Scheduling type tracked by a workslot (`TAG[33:32]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SchedType {
    Ordered = 0,
    Atomic = 1,
    Untagged = 2,
    Empty = 3,
}

impl SchedType {
    pub fn from_bits(bits: u64) -> Self {
        match bits & 0x3 {
            0 => SchedType::Ordered,
            1 => SchedType::Atomic,
            2 => SchedType::Untagged,
            _ => SchedType::Empty,
        }
    }
}

/// Base address of LF `lf` of `block` inside BAR2.
pub const fn lf_base(bar2: u64, block: u64, lf: u64) -> u64 {
    bar2 + ((block << 20) | (lf << 12))
}

pub const fn ggrp_base(bar2: u64, grp: u16) -> u64 {
    lf_base(bar2, RVU_BLOCK_ADDR_SSO, grp as u64)
}

pub const fn gws_base(bar2: u64, ws: u16) -> u64 {
    lf_base(bar2, RVU_BLOCK_ADDR_SSOW, ws as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lf_bases_are_page_strided_per_block() {
        let bar2 = 0x8000_0000;
        assert_eq!(ggrp_base(bar2, 0), 0x8070_0000);
        assert_eq!(ggrp_base(bar2, 3), 0x8070_3000);
        assert_eq!(gws_base(bar2, 1), 0x8080_1000);
    }

    #[test]
    fn sched_type_ignores_upper_bits() {
        assert_eq!(SchedType::from_bits(0x4 | 1), SchedType::Atomic);
        assert_eq!(SchedType::from_bits(3), SchedType::Empty);
    }
}
