//! SSO/SSOW LF register file.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use sso_evdev::regs::*;
use sso_evdev::{RegisterIo, SchedType};

/// Work sitting in a group or held by a workslot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimWork {
    pub tag: u32,
    pub sched_type: SchedType,
    pub wqe: u64,
}

/// Side effects worth asserting on, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwOp {
    Link { ws: u16, grp: u16, enable: bool },
    NwTim { ws: u16, value: u64 },
    GetWork { ws: u16, grp: u16, wqe: Option<u64> },
    SwtagFlush { ws: u16 },
    Untag { ws: u16 },
    Desched { ws: u16 },
    GwcInval { ws: u16 },
    Qctl { grp: u16, value: u64 },
    Barrier,
}

#[derive(Debug, Default)]
struct Gws {
    links: BTreeSet<u16>,
    nw_tim: u64,
    held: Option<(u16, SimWork)>,
}

#[derive(Debug)]
struct Grp {
    qctl: u64,
    pending: VecDeque<SimWork>,
}

impl Default for Grp {
    fn default() -> Self {
        Self {
            qctl: 1,
            pending: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct HwState {
    bar2: u64,
    gws: BTreeMap<u16, Gws>,
    grps: BTreeMap<u16, Grp>,
    ops: Vec<HwOp>,
}

enum Target {
    Gws(u16),
    Grp(u16),
}

impl HwState {
    fn decode(&self, addr: u64) -> Option<(Target, u64)> {
        let off = addr.checked_sub(self.bar2)?;
        let lf = ((off >> 12) & 0xff) as u16;
        let reg = off & 0xfff;
        match off >> 20 {
            RVU_BLOCK_ADDR_SSO => Some((Target::Grp(lf), reg)),
            RVU_BLOCK_ADDR_SSOW => Some((Target::Gws(lf), reg)),
            _ => None,
        }
    }

    fn read(&mut self, addr: u64) -> u64 {
        let Some((target, reg)) = self.decode(addr) else {
            tracing::warn!(addr, "read outside SSO LF space");
            return 0;
        };
        match target {
            Target::Gws(ws) => {
                let gws = self.gws.entry(ws).or_default();
                match reg {
                    SSOW_LF_GWS_LINKS => gws
                        .links
                        .iter()
                        .filter(|&&g| g < 64)
                        .fold(0, |acc, &g| acc | 1 << g),
                    SSOW_LF_GWS_NW_TIM => gws.nw_tim,
                    SSOW_LF_GWS_TAG => match gws.held {
                        Some((grp, work)) => {
                            (work.sched_type as u64) << TAG_TT_SHIFT
                                | u64::from(grp) << TAG_GRP_SHIFT
                                | u64::from(work.tag)
                        }
                        None => (SchedType::Empty as u64) << TAG_TT_SHIFT,
                    },
                    SSOW_LF_GWS_WQP => gws.held.map_or(0, |(_, work)| work.wqe),
                    _ => 0,
                }
            }
            Target::Grp(grp) => {
                let g = self.grps.entry(grp).or_default();
                match reg {
                    SSO_LF_GGRP_QCTL => g.qctl,
                    SSO_LF_GGRP_AQ_CNT => g.pending.len() as u64,
                    _ => 0,
                }
            }
        }
    }

    fn write(&mut self, addr: u64, value: u64) {
        let Some((target, reg)) = self.decode(addr) else {
            tracing::warn!(addr, value, "write outside SSO LF space");
            return;
        };
        match target {
            Target::Gws(ws) => self.write_gws(ws, reg, value),
            Target::Grp(grp) => {
                if reg == SSO_LF_GGRP_QCTL {
                    self.grps.entry(grp).or_default().qctl = value;
                    self.ops.push(HwOp::Qctl { grp, value });
                }
            }
        }
    }

    fn write_gws(&mut self, ws: u16, reg: u64, value: u64) {
        match reg {
            SSOW_LF_GWS_GRPMSK_CHG => {
                let grp = (value & GRPMSK_CHG_GRP_MASK) as u16;
                let enable = (value >> GRPMSK_CHG_ENABLE_SHIFT) & 1 == 1;
                let links = &mut self.gws.entry(ws).or_default().links;
                if enable {
                    links.insert(grp);
                } else {
                    links.remove(&grp);
                }
                self.ops.push(HwOp::Link { ws, grp, enable });
            }
            SSOW_LF_GWS_NW_TIM => {
                self.gws.entry(ws).or_default().nw_tim = value;
                self.ops.push(HwOp::NwTim { ws, value });
            }
            SSOW_LF_GWS_OP_GET_WORK => {
                let grp = (value & GRPMSK_CHG_GRP_MASK) as u16;
                let work = if value & GETWRK_GROUPED != 0 {
                    self.grps.entry(grp).or_default().pending.pop_front()
                } else {
                    None
                };
                self.gws.entry(ws).or_default().held = work.map(|w| (grp, w));
                self.ops.push(HwOp::GetWork {
                    ws,
                    grp,
                    wqe: work.map(|w| w.wqe),
                });
            }
            SSOW_LF_GWS_OP_SWTAG_FLUSH => {
                self.gws.entry(ws).or_default().held = None;
                self.ops.push(HwOp::SwtagFlush { ws });
            }
            SSOW_LF_GWS_OP_SWTAG_UNTAG => {
                if let Some((_, work)) = &mut self.gws.entry(ws).or_default().held {
                    work.sched_type = SchedType::Untagged;
                }
                self.ops.push(HwOp::Untag { ws });
            }
            SSOW_LF_GWS_OP_DESCHED => {
                if let Some((grp, work)) = self.gws.entry(ws).or_default().held.take() {
                    self.grps.entry(grp).or_default().pending.push_front(work);
                }
                self.ops.push(HwOp::Desched { ws });
            }
            SSOW_LF_GWS_OP_GWC_INVAL => self.ops.push(HwOp::GwcInval { ws }),
            _ => {}
        }
    }
}

/// Emulated BAR2 window. Clones share state.
#[derive(Debug, Clone)]
pub struct SimSso {
    state: Arc<Mutex<HwState>>,
}

impl SimSso {
    pub fn new(bar2: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(HwState {
                bar2,
                ..HwState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HwState> {
        self.state.lock().unwrap()
    }

    /// Queues `work` on group `grp` as if a producer had added it.
    pub fn add_work(&self, grp: u16, work: SimWork) {
        self.state()
            .grps
            .entry(grp)
            .or_default()
            .pending
            .push_back(work);
    }

    /// Leaves `work` from `grp` held by workslot `ws`.
    pub fn hold_work(&self, ws: u16, grp: u16, work: SimWork) {
        self.state().gws.entry(ws).or_default().held = Some((grp, work));
    }

    pub fn pending(&self, grp: u16) -> usize {
        self.state().grps.get(&grp).map_or(0, |g| g.pending.len())
    }

    pub fn held(&self, ws: u16) -> Option<SimWork> {
        self.state()
            .gws
            .get(&ws)
            .and_then(|g| g.held.map(|(_, w)| w))
    }

    pub fn links(&self, ws: u16) -> Vec<u16> {
        self.state()
            .gws
            .get(&ws)
            .map(|g| g.links.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every `(workslot, group)` link currently set.
    pub fn all_links(&self) -> Vec<(u16, u16)> {
        self.state()
            .gws
            .iter()
            .flat_map(|(&ws, g)| g.links.iter().map(move |&grp| (ws, grp)))
            .collect()
    }

    pub fn qctl(&self, grp: u16) -> u64 {
        self.state().grps.get(&grp).map_or(1, |g| g.qctl)
    }

    pub fn set_qctl(&self, grp: u16, value: u64) {
        self.state().grps.entry(grp).or_default().qctl = value;
    }

    pub fn nw_tim(&self, ws: u16) -> u64 {
        self.state().gws.get(&ws).map_or(0, |g| g.nw_tim)
    }

    pub fn ops(&self) -> Vec<HwOp> {
        self.state().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }
}

impl RegisterIo for SimSso {
    fn read64(&self, addr: u64) -> u64 {
        self.state().read(addr)
    }

    fn write64(&self, addr: u64, value: u64) {
        self.state().write(addr, value);
    }

    fn barrier(&self) {
        fence(Ordering::SeqCst);
        self.state().ops.push(HwOp::Barrier);
    }
}
