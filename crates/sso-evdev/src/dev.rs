//! The event device: probe, configuration state machine, setup, links, start/stop, close.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;

use sso_mbox::{LfClass, MboxClient, MboxTransport, MsixOffsetRsp};

use crate::arena::{release_lf_resource, Resource, ResourceArena};
use crate::config::{DeviceInfo, EventDevConfig, PortConf, QueueConf, SsoConfig};
use crate::drain::{self, Event};
use crate::error::{Result, SsoError, ValidationError};
use crate::fastpath::FastPathOps;
use crate::io::RegisterIo;
use crate::irq::{IrqRegistrar, IrqVector, MsixOffsets};
use crate::link;
use crate::pool::XaqPoolBackend;
use crate::port::{self, workslots_needed, EventPort};
use crate::queue::{self, EventQueue, HW_PRIORITY_LEVELS, PRIORITY_NORMAL};
use crate::regs::{self, SSOW_LF_GWS_NW_TIM, SSO_MAX_VHGRP, SSO_MAX_VHWS};
use crate::xaq::{XaqAllocator, XaqGeometry, XaqPool};

pub const MIN_DEQ_TIMEOUT_NS: u32 = 1_000;
/// `NW_TIM` holds at most 0x3ff microseconds.
pub const MAX_DEQ_TIMEOUT_NS: u32 = 0x3ff * 1_000;
pub const MAX_QUEUE_FLOWS: u32 = 1 << 20;
pub const MAX_PORT_DEPTH: u32 = 1;

pub type SsoMbox = MboxClient<Box<dyn MboxTransport + Send>>;

/// Everything the device needs from its surroundings.
pub struct SsoPlatform {
    pub mbox: Box<dyn MboxTransport + Send>,
    /// PCI function the mailbox speaks for.
    pub pcifunc: u16,
    /// PCI function owning the NPA LF that backs the XAQ aura.
    pub npa_pf_func: u16,
    pub bar2: u64,
    pub regs: Arc<dyn RegisterIo>,
    pub pool: Box<dyn XaqPoolBackend>,
    pub irq: Box<dyn IrqRegistrar>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    Unconfigured,
    Validating,
    TearingDownPrevious,
    AttachingPorts,
    AttachingQueues,
    AllocatingBufferPool,
    Linking,
    BindingBufferPool,
    FetchingInterruptOffsets,
    RegisteringInterrupts,
    Configured,
}

pub struct SsoDevice {
    mbox: SsoMbox,
    regs: Arc<dyn RegisterIo>,
    bar2: u64,
    npa_pf_func: u16,
    pool: Box<dyn XaqPoolBackend>,
    irq: Box<dyn IrqRegistrar>,

    xae_cnt: Option<u32>,
    dual_ws: bool,
    max_ports: u16,
    max_queues: u16,

    nb_ports: u16,
    nb_queues: u16,
    deq_tmo_ns: u32,
    is_timeout_deq: bool,

    ports: Vec<EventPort>,
    queues: Vec<EventQueue>,
    geometry: Option<XaqGeometry>,
    xaq: XaqAllocator,
    msix: MsixOffsets,

    state: ConfigState,
    configured: AtomicBool,
    fastpath: Option<FastPathOps>,
}

impl SsoDevice {
    /// Probes the AF for provisioned LFs and derives the device ceilings.
    pub fn new(platform: SsoPlatform, config: SsoConfig) -> Result<Self> {
        if platform.bar2 == 0 {
            return Err(SsoError::ConfigurationInconsistent("BAR2 is not mapped"));
        }
        let mut mbox = MboxClient::new(platform.mbox, platform.pcifunc);
        let free = mbox.free_rsrc_cnt()?;

        let dual_ws = !config.single_ws;
        let mut max_ports = free.ssow.min(SSO_MAX_VHWS);
        let max_queues = free.sso.min(SSO_MAX_VHGRP);
        if dual_ws {
            max_ports /= 2;
        }
        if max_ports == 0 || max_queues == 0 {
            tracing::error!(
                ssow = free.ssow,
                sso = free.sso,
                dual_ws,
                "not enough SSO LFs provisioned"
            );
            return Err(SsoError::NotProvisioned {
                queues: max_queues,
                ports: max_ports,
            });
        }
        tracing::info!(max_ports, max_queues, dual_ws, "SSO event device probed");

        Ok(Self {
            mbox,
            regs: platform.regs,
            bar2: platform.bar2,
            npa_pf_func: platform.npa_pf_func,
            pool: platform.pool,
            irq: platform.irq,
            xae_cnt: config.xae_cnt.filter(|&n| n > 0),
            dual_ws,
            max_ports,
            max_queues,
            nb_ports: 0,
            nb_queues: 0,
            deq_tmo_ns: MIN_DEQ_TIMEOUT_NS,
            is_timeout_deq: false,
            ports: Vec::new(),
            queues: Vec::new(),
            geometry: None,
            xaq: XaqAllocator::new(config.xaq_sizing),
            msix: MsixOffsets::default(),
            state: ConfigState::Unconfigured,
            configured: AtomicBool::new(false),
            fastpath: None,
        })
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            min_dequeue_timeout_ns: MIN_DEQ_TIMEOUT_NS,
            max_dequeue_timeout_ns: MAX_DEQ_TIMEOUT_NS,
            max_event_queues: self.max_queues,
            max_event_queue_flows: MAX_QUEUE_FLOWS,
            max_event_queue_priority_levels: HW_PRIORITY_LEVELS,
            max_event_priority_levels: 1,
            max_event_ports: self.max_ports,
            max_event_port_dequeue_depth: MAX_PORT_DEPTH,
            max_event_port_enqueue_depth: MAX_PORT_DEPTH,
            max_num_events: self.max_num_events(),
        }
    }

    fn max_num_events(&self) -> i32 {
        self.xae_cnt
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(-1)
    }

    pub fn queue_def_conf(&self) -> QueueConf {
        QueueConf {
            nb_atomic_flows: MAX_QUEUE_FLOWS,
            nb_atomic_order_sequences: MAX_QUEUE_FLOWS,
            priority: PRIORITY_NORMAL,
        }
    }

    pub fn port_def_conf(&self) -> PortConf {
        PortConf {
            new_event_threshold: self.max_num_events(),
            dequeue_depth: MAX_PORT_DEPTH,
            enqueue_depth: MAX_PORT_DEPTH,
        }
    }

    fn validate(&self, conf: &EventDevConfig) -> std::result::Result<u32, ValidationError> {
        if conf.nb_event_ports == 0 || conf.nb_event_queues == 0 {
            return Err(ValidationError::Empty);
        }
        if conf.nb_event_ports > self.max_ports {
            return Err(ValidationError::TooManyPorts {
                requested: conf.nb_event_ports,
                max: self.max_ports,
            });
        }
        if conf.nb_event_queues > self.max_queues {
            return Err(ValidationError::TooManyQueues {
                requested: conf.nb_event_queues,
                max: self.max_queues,
            });
        }
        let deq_tmo_ns = match conf.dequeue_timeout_ns {
            0 => MIN_DEQ_TIMEOUT_NS,
            ns if (MIN_DEQ_TIMEOUT_NS..=MAX_DEQ_TIMEOUT_NS).contains(&ns) => ns,
            ns => {
                return Err(ValidationError::DequeueTimeout {
                    ns,
                    min: MIN_DEQ_TIMEOUT_NS,
                    max: MAX_DEQ_TIMEOUT_NS,
                })
            }
        };
        for (which, depth) in [
            ("dequeue", conf.nb_event_port_dequeue_depth),
            ("enqueue", conf.nb_event_port_enqueue_depth),
        ] {
            if depth > MAX_PORT_DEPTH {
                return Err(ValidationError::Depth { which, depth });
            }
        }
        Ok(deq_tmo_ns)
    }

    fn enter(&mut self, state: ConfigState) {
        tracing::debug!(from = ?self.state, to = ?state, "configure step");
        self.state = state;
    }

    /// Provisions ports, queues and the XAQ for `conf`, replacing any previous configuration.
    ///
    /// Validation failures leave the device untouched. Any later failure releases everything
    /// acquired and leaves the device unconfigured with no ports or queues.
    pub fn configure(&mut self, conf: &EventDevConfig) -> Result<()> {
        let prev = self.state;
        self.enter(ConfigState::Validating);
        let deq_tmo_ns = match self.validate(conf) {
            Ok(ns) => ns,
            Err(err) => {
                tracing::error!(error = %err, "rejecting configuration");
                self.state = prev;
                return Err(err.into());
            }
        };
        self.deq_tmo_ns = deq_tmo_ns;
        self.is_timeout_deq = conf.per_dequeue_timeout;

        if self.nb_ports > 0 || self.nb_queues > 0 {
            self.enter(ConfigState::TearingDownPrevious);
            if let Some(err) = self.teardown(false) {
                tracing::error!(
                    error = %err,
                    "previous configuration not fully released; continuing"
                );
            }
        }
        self.nb_ports = conf.nb_event_ports;
        self.nb_queues = conf.nb_event_queues;

        let mut arena = ResourceArena::new();
        if let Err(err) = self.acquire(&mut arena) {
            return Err(self.abort(arena, err));
        }
        arena.commit();

        fence(Ordering::SeqCst);
        self.configured.store(true, Ordering::Release);
        self.enter(ConfigState::Configured);
        tracing::info!(
            nb_ports = self.nb_ports,
            nb_queues = self.nb_queues,
            dual_ws = self.dual_ws,
            deq_tmo_ns,
            "SSO configured"
        );
        Ok(())
    }

    fn acquire(&mut self, arena: &mut ResourceArena) -> Result<()> {
        self.enter(ConfigState::AttachingPorts);
        let (ports, held) =
            port::configure_ports(&mut self.mbox, self.bar2, self.nb_ports, self.dual_ws)?;
        arena.append(held);
        self.ports = ports;

        self.enter(ConfigState::AttachingQueues);
        let (geom, held) = queue::configure_queues(&mut self.mbox, self.nb_queues)?;
        arena.append(held);
        self.queues = (0..self.nb_queues).map(EventQueue::new).collect();
        self.geometry = Some(geom);

        self.enter(ConfigState::AllocatingBufferPool);
        let xaq = self
            .xaq
            .allocate(&mut *self.pool, self.nb_queues, self.xae_cnt, &geom)?;
        let (aura_id, fc_iova, limit) = (xaq.aura_id, xaq.fc.iova, xaq.limit);
        arena.push(Resource::XaqPool);
        for p in &mut self.ports {
            p.cache_groups(self.bar2, self.nb_queues, fc_iova, limit);
        }

        self.enter(ConfigState::Linking);
        link::clear_all_links(&*self.regs, &self.ports, self.nb_queues);

        self.enter(ConfigState::BindingBufferPool);
        self.mbox
            .hw_setconfig(aura_id, self.npa_pf_func, self.nb_queues)?;

        self.enter(ConfigState::FetchingInterruptOffsets);
        let rsp = self.mbox.msix_offset()?;
        self.msix = self.select_msix(rsp)?;

        self.enter(ConfigState::RegisteringInterrupts);
        let vectors = self.irq_vectors();
        self.irq.register(&vectors)?;
        arena.push(Resource::Interrupts);
        Ok(())
    }

    fn select_msix(&self, rsp: MsixOffsetRsp) -> Result<MsixOffsets> {
        let nb_ws = usize::from(workslots_needed(self.nb_ports, self.dual_ws));
        let nb_grp = usize::from(self.nb_queues);
        if rsp.ssow_msixoff.len() < nb_ws || rsp.sso_msixoff.len() < nb_grp {
            return Err(SsoError::ConfigurationInconsistent(
                "AF reported fewer MSI-X offsets than attached LFs",
            ));
        }
        Ok(MsixOffsets {
            gws: rsp.ssow_msixoff[..nb_ws].to_vec(),
            ggrp: rsp.sso_msixoff[..nb_grp].to_vec(),
        })
    }

    fn irq_vectors(&self) -> Vec<IrqVector> {
        let gws = self.msix.gws.iter().zip(0u16..).map(|(&msix, lf)| IrqVector {
            class: LfClass::Gws,
            lf,
            msix,
            base: regs::gws_base(self.bar2, lf),
        });
        let ggrp = self.msix.ggrp.iter().zip(0u16..).map(|(&msix, lf)| IrqVector {
            class: LfClass::Ggrp,
            lf,
            msix,
            base: regs::ggrp_base(self.bar2, lf),
        });
        gws.chain(ggrp).collect()
    }

    /// Resources held by the current configuration, in acquisition order.
    fn held_resources(&self, include_pool: bool) -> ResourceArena {
        let mut arena = ResourceArena::new();
        if self.nb_ports > 0 {
            let count = workslots_needed(self.nb_ports, self.dual_ws);
            arena.push(Resource::Attached {
                class: LfClass::Gws,
                count,
            });
            arena.push(Resource::Lfs {
                class: LfClass::Gws,
                count,
            });
        }
        if self.nb_queues > 0 {
            let count = self.nb_queues;
            arena.push(Resource::Attached {
                class: LfClass::Ggrp,
                count,
            });
            arena.push(Resource::Lfs {
                class: LfClass::Ggrp,
                count,
            });
        }
        if include_pool && self.xaq.pool().is_some() {
            arena.push(Resource::XaqPool);
        }
        if self.is_configured() {
            arena.push(Resource::Interrupts);
        }
        arena
    }

    fn release(&mut self, arena: ResourceArena) -> Option<SsoError> {
        let vectors = self.irq_vectors();
        let Self {
            mbox,
            xaq,
            pool,
            irq,
            ..
        } = self;
        arena.unwind(|resource| match resource {
            Resource::XaqPool => {
                xaq.release(&mut **pool);
                Ok(())
            }
            Resource::Interrupts => {
                irq.unregister(&vectors);
                Ok(())
            }
            lf => release_lf_resource(&mut *mbox, lf),
        })
    }

    fn forget_configuration(&mut self) {
        self.configured.store(false, Ordering::Release);
        self.ports.clear();
        self.queues.clear();
        self.geometry = None;
        self.msix = MsixOffsets::default();
        self.fastpath = None;
        self.nb_ports = 0;
        self.nb_queues = 0;
        self.state = ConfigState::Unconfigured;
    }

    /// Releases the current configuration. The XAQ pool survives unless `include_pool`.
    fn teardown(&mut self, include_pool: bool) -> Option<SsoError> {
        let arena = self.held_resources(include_pool);
        tracing::debug!(resources = ?arena.resources(), "tearing down");
        self.configured.store(false, Ordering::Release);
        let first = self.release(arena);
        self.forget_configuration();
        first
    }

    fn abort(&mut self, arena: ResourceArena, err: SsoError) -> SsoError {
        tracing::error!(state = ?self.state, error = %err, "configuration failed, rolling back");
        self.configured.store(false, Ordering::Release);
        self.release(arena);
        self.forget_configuration();
        err
    }

    fn check_configured(&self) -> Result<()> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(SsoError::NotConfigured)
        }
    }

    fn check_queue(&self, queue: u16) -> Result<()> {
        if queue < self.nb_queues {
            Ok(())
        } else {
            Err(ValidationError::InvalidQueue {
                queue,
                nb_queues: self.nb_queues,
            }
            .into())
        }
    }

    fn port_index(&self, port: u16) -> Result<usize> {
        if port < self.nb_ports {
            Ok(usize::from(port))
        } else {
            Err(ValidationError::InvalidPort {
                port,
                nb_ports: self.nb_ports,
            }
            .into())
        }
    }

    pub fn queue_setup(&mut self, queue: u16, conf: &QueueConf) -> Result<()> {
        self.set_queue_priority(queue, conf.priority)
    }

    /// Programs the scheduling priority of `queue` (0 highest, 255 lowest).
    pub fn set_queue_priority(&mut self, queue: u16, priority: u8) -> Result<()> {
        self.check_configured()?;
        self.check_queue(queue)?;
        let level = queue::set_priority(&mut self.mbox, queue, priority)?;
        self.queues[usize::from(queue)].set_hw_priority(level);
        Ok(())
    }

    pub fn queue_release(&mut self, queue: u16) {
        tracing::trace!(queue, "queue release");
    }

    /// Caches group bases, flow-control address and XAQ limit on `port` and programs its
    /// get-work timeout.
    pub fn port_setup(&mut self, port: u16) -> Result<()> {
        self.check_configured()?;
        let idx = self.port_index(port)?;
        let (fc_iova, limit) = match self.xaq.pool() {
            Some(pool) => (pool.fc.iova, pool.limit),
            None => return Err(SsoError::NotConfigured),
        };
        let nw_tim = u64::from(self.deq_tmo_ns / 1_000).saturating_sub(1);

        let p = &mut self.ports[idx];
        p.cache_groups(self.bar2, self.nb_queues, fc_iova, limit);
        for ws in p.workslots() {
            self.regs.write64(ws.reg(SSOW_LF_GWS_NW_TIM), nw_tim);
        }
        tracing::debug!(port, nw_tim, "port setup");
        Ok(())
    }

    /// Drops the flow-control state port setup cached. Group bases and workslots stay until
    /// reconfigure or close.
    pub fn port_release(&mut self, port: u16) -> Result<()> {
        let idx = self.port_index(port)?;
        let p = &mut self.ports[idx];
        p.fc_iova = 0;
        p.xaq_lmt = 0;
        Ok(())
    }

    fn write_links(&self, port: u16, queues: &[u16], enable: bool) -> Result<usize> {
        let idx = self.port_index(port)?;
        for &queue in queues {
            self.check_queue(queue)?;
        }
        let p = &self.ports[idx];
        for &queue in queues {
            link::set_port_link(&*self.regs, p, queue, enable);
        }
        self.regs.barrier();
        Ok(queues.len())
    }

    /// Adds `queues` to the set `port` pulls work from. Returns the number of links made.
    pub fn port_link(&mut self, port: u16, queues: &[u16]) -> Result<usize> {
        let n = self.write_links(port, queues, true)?;
        tracing::debug!(port, ?queues, "linked");
        Ok(n)
    }

    pub fn port_unlink(&mut self, port: u16, queues: &[u16]) -> Result<usize> {
        let n = self.write_links(port, queues, false)?;
        tracing::debug!(port, ?queues, "unlinked");
        Ok(n)
    }

    pub fn set_link(&mut self, port: u16, queue: u16, enable: bool) -> Result<()> {
        self.write_links(port, &[queue], enable).map(|_| ())
    }

    pub fn clear_all_links(&mut self) {
        link::clear_all_links(&*self.regs, &self.ports, self.nb_queues);
    }

    /// Drains residual events into `flush`, enables every group and installs the fast path.
    ///
    /// Returns the number of events flushed.
    pub fn start(&mut self, mut flush: impl FnMut(Event)) -> Result<usize> {
        self.check_configured()?;
        let flushed = drain::cleanup(
            &*self.regs,
            self.bar2,
            &mut self.ports,
            self.nb_queues,
            true,
            &mut flush,
        );
        self.mbox.ws_cache_inv()?;
        let ops = FastPathOps::select(self.dual_ws, self.is_timeout_deq);
        self.fastpath = Some(ops);
        fence(Ordering::SeqCst);
        tracing::info!(flushed, ?ops, "SSO started");
        Ok(flushed)
    }

    /// Drains residual events into `flush` and disables every group.
    pub fn stop(&mut self, mut flush: impl FnMut(Event)) -> Result<usize> {
        self.check_configured()?;
        let flushed = drain::cleanup(
            &*self.regs,
            self.bar2,
            &mut self.ports,
            self.nb_queues,
            false,
            &mut flush,
        );
        self.fastpath = None;
        fence(Ordering::SeqCst);
        tracing::info!(flushed, "SSO stopped");
        Ok(flushed)
    }

    /// Releases every LF, the XAQ pool and the interrupts. Failures are logged; the first is
    /// returned after everything has been attempted.
    pub fn close(&mut self) -> Result<()> {
        tracing::info!(
            nb_ports = self.nb_ports,
            nb_queues = self.nb_queues,
            "closing SSO event device"
        );
        match self.teardown(true) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Converts a dequeue timeout into timer ticks at `timer_hz`.
    pub fn timeout_ticks(ns: u64, timer_hz: u64) -> u64 {
        (u128::from(ns) * u128::from(timer_hz) / 1_000_000_000) as u64
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConfigState {
        self.state
    }

    pub fn nb_ports(&self) -> u16 {
        self.nb_ports
    }

    pub fn nb_queues(&self) -> u16 {
        self.nb_queues
    }

    pub fn max_ports(&self) -> u16 {
        self.max_ports
    }

    pub fn max_queues(&self) -> u16 {
        self.max_queues
    }

    pub fn dual_ws(&self) -> bool {
        self.dual_ws
    }

    pub fn dequeue_timeout_ns(&self) -> u32 {
        self.deq_tmo_ns
    }

    pub fn bar2(&self) -> u64 {
        self.bar2
    }

    pub fn ports(&self) -> &[EventPort] {
        &self.ports
    }

    pub fn port(&self, port: u16) -> Option<&EventPort> {
        self.ports.get(usize::from(port))
    }

    pub fn queues(&self) -> &[EventQueue] {
        &self.queues
    }

    pub fn xaq_geometry(&self) -> Option<XaqGeometry> {
        self.geometry
    }

    pub fn xaq_pool(&self) -> Option<&XaqPool> {
        self.xaq.pool()
    }

    pub fn msix_offsets(&self) -> &MsixOffsets {
        &self.msix
    }

    pub fn fastpath(&self) -> Option<FastPathOps> {
        self.fastpath
    }

    pub(crate) fn regs(&self) -> &dyn RegisterIo {
        &*self.regs
    }
}
