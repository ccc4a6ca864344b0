//! Software stand-ins for the platform pieces an [`SsoDevice`] talks to: the AF mailbox, the
//! BAR2 register window, the memory-pool subsystem and the interrupt layer.

pub mod agent;
pub mod hw;
pub mod irq;
pub mod pool;

use std::sync::Arc;

use sso_evdev::{SsoConfig, SsoDevice, SsoPlatform};

pub use agent::SimAgent;
pub use hw::{HwOp, SimSso, SimWork};
pub use irq::SimIrq;
pub use pool::SimPool;

pub const SIM_BAR2: u64 = 0x8_4000_0000;
pub const SIM_PCIFUNC: u16 = 0x0400;
pub const SIM_NPA_PF_FUNC: u16 = 0x0400;

/// One emulated RVU function. Clones share state.
#[derive(Debug, Clone)]
pub struct SimBoard {
    pub agent: SimAgent,
    pub hw: SimSso,
    pub pool: SimPool,
    pub irq: SimIrq,
}

impl SimBoard {
    /// A function provisioned with `sso` group LFs and `ssow` workslot LFs.
    pub fn new(sso: u16, ssow: u16) -> Self {
        Self {
            agent: SimAgent::new(sso, ssow),
            hw: SimSso::new(SIM_BAR2),
            pool: SimPool::new(),
            irq: SimIrq::new(),
        }
    }

    pub fn platform(&self) -> SsoPlatform {
        SsoPlatform {
            mbox: Box::new(self.agent.clone()),
            pcifunc: SIM_PCIFUNC,
            npa_pf_func: SIM_NPA_PF_FUNC,
            bar2: SIM_BAR2,
            regs: Arc::new(self.hw.clone()),
            pool: Box::new(self.pool.clone()),
            irq: Box::new(self.irq.clone()),
        }
    }

    pub fn probe(&self, config: SsoConfig) -> sso_evdev::Result<SsoDevice> {
        SsoDevice::new(self.platform(), config)
    }
}
