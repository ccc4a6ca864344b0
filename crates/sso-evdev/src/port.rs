//! Event ports and the hardware workslots behind them.

use sso_mbox::{LfClass, MboxClient, MboxTransport};

use crate::arena::{release_lf_resource, Resource, ResourceArena};
use crate::error::{Result, SsoError};
use crate::regs::{self, SchedType};

/// Software view of one hardware workslot (GWS LF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workslot {
    lf: u16,
    base: u64,
    pub cur_grp: u16,
    pub cur_tt: SchedType,
    pub swtag_req: bool,
}

impl Workslot {
    pub fn new(bar2: u64, lf: u16) -> Self {
        Self {
            lf,
            base: regs::gws_base(bar2, lf),
            cur_grp: 0,
            cur_tt: SchedType::Empty,
            swtag_req: false,
        }
    }

    pub fn lf(&self) -> u16 {
        self.lf
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn reg(&self, offset: u64) -> u64 {
        self.base + offset
    }

    /// Forgets any tag/group the slot was tracking.
    pub fn clear_tracking(&mut self) {
        self.cur_grp = 0;
        self.cur_tt = SchedType::Empty;
        self.swtag_req = false;
    }
}

/// One workslot, or a pair driven alternately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSlots {
    Single(Workslot),
    Dual([Workslot; 2]),
}

impl PortSlots {
    pub fn as_slice(&self) -> &[Workslot] {
        match self {
            PortSlots::Single(ws) => std::slice::from_ref(ws),
            PortSlots::Dual(pair) => pair,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [Workslot] {
        match self {
            PortSlots::Single(ws) => std::slice::from_mut(ws),
            PortSlots::Dual(pair) => pair,
        }
    }

    pub fn first_mut(&mut self) -> &mut Workslot {
        match self {
            PortSlots::Single(ws) => ws,
            PortSlots::Dual([ws, _]) => ws,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPort {
    id: u16,
    slots: PortSlots,
    pub(crate) grps_base: Vec<u64>,
    pub(crate) fc_iova: u64,
    pub(crate) xaq_lmt: u32,
}

impl EventPort {
    fn new(id: u16, slots: PortSlots) -> Self {
        Self {
            id,
            slots,
            grps_base: Vec::new(),
            fc_iova: 0,
            xaq_lmt: 0,
        }
    }

    /// Caches the bases of groups `0..nb_queues` and the XAQ flow-control state.
    pub(crate) fn cache_groups(&mut self, bar2: u64, nb_queues: u16, fc_iova: u64, xaq_lmt: u32) {
        self.grps_base = (0..nb_queues).map(|q| regs::ggrp_base(bar2, q)).collect();
        self.fc_iova = fc_iova;
        self.xaq_lmt = xaq_lmt;
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn workslots(&self) -> &[Workslot] {
        self.slots.as_slice()
    }

    pub(crate) fn slots_mut(&mut self) -> &mut PortSlots {
        &mut self.slots
    }

    pub fn is_dual(&self) -> bool {
        matches!(self.slots, PortSlots::Dual(_))
    }

    /// Group base addresses cached by port setup; empty before it.
    pub fn group_bases(&self) -> &[u64] {
        &self.grps_base
    }

    pub fn fc_iova(&self) -> u64 {
        self.fc_iova
    }

    pub fn xaq_limit(&self) -> u32 {
        self.xaq_lmt
    }
}

/// Workslot LFs needed for `nb_ports` ports.
pub fn workslots_needed(nb_ports: u16, dual: bool) -> u16 {
    if dual {
        nb_ports * 2
    } else {
        nb_ports
    }
}

fn build_ports(bar2: u64, nb_ports: u16, dual: bool) -> Result<Vec<EventPort>> {
    let mut ports = Vec::new();
    ports
        .try_reserve_exact(usize::from(nb_ports))
        .map_err(|_| SsoError::OutOfMemory {
            what: "event port table",
        })?;
    for id in 0..nb_ports {
        let slots = if dual {
            PortSlots::Dual([
                Workslot::new(bar2, 2 * id),
                Workslot::new(bar2, 2 * id + 1),
            ])
        } else {
            PortSlots::Single(Workslot::new(bar2, id))
        };
        ports.push(EventPort::new(id, slots));
    }
    Ok(ports)
}

/// Attaches and allocates the workslot LFs, then builds the port table.
///
/// On failure everything taken here has been handed back. On success the returned arena holds
/// the AF-side resources.
pub fn configure_ports<T: MboxTransport>(
    mbox: &mut MboxClient<T>,
    bar2: u64,
    nb_ports: u16,
    dual: bool,
) -> Result<(Vec<EventPort>, ResourceArena)> {
    configure_ports_with(mbox, bar2, nb_ports, dual, build_ports)
}

fn configure_ports_with<T: MboxTransport>(
    mbox: &mut MboxClient<T>,
    bar2: u64,
    nb_ports: u16,
    dual: bool,
    build: impl FnOnce(u64, u16, bool) -> Result<Vec<EventPort>>,
) -> Result<(Vec<EventPort>, ResourceArena)> {
    let nb_lf = workslots_needed(nb_ports, dual);
    let mut arena = ResourceArena::new();

    let step = (|| -> Result<Vec<EventPort>> {
        mbox.attach_resources(LfClass::Gws, nb_lf)
            .map_err(|source| SsoError::ResourceUnavailable {
                class: LfClass::Gws,
                source,
            })?;
        arena.push(Resource::Attached {
            class: LfClass::Gws,
            count: nb_lf,
        });

        mbox.lf_alloc(LfClass::Gws, nb_lf)
            .map_err(|source| SsoError::ResourceUnavailable {
                class: LfClass::Gws,
                source,
            })?;
        arena.push(Resource::Lfs {
            class: LfClass::Gws,
            count: nb_lf,
        });

        build(bar2, nb_ports, dual)
    })();

    match step {
        Ok(ports) => {
            tracing::debug!(nb_ports, nb_lf, dual, "workslots attached");
            Ok((ports, arena))
        }
        Err(err) => {
            arena.unwind(|r| release_lf_resource(&mut *mbox, r));
            Err(err)
        }
    }
}
