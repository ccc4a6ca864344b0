//! Admin-function side of the mailbox.

use std::sync::{Arc, Mutex, MutexGuard};

use sso_mbox::msg::{decode_request, encode_response};
use sso_mbox::{
    FreeRsrcCntRsp, LfClass, MboxTimeout, MboxTransport, MsgId, MsixOffsetRsp, Request, Response,
    SsoLfAllocRsp, TransportError,
};

pub const EBUSY: i32 = -16;
pub const ENODEV: i32 = -19;
pub const EINVAL: i32 = -22;
pub const ENOSPC: i32 = -28;

/// First MSI-X vector handed to workslot and group LFs.
pub const SSOW_MSIX_BASE: u16 = 0x40;
pub const SSO_MSIX_BASE: u16 = 0x100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrpPriority {
    pub weight: u8,
    pub affinity: u8,
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwSetconfig {
    pub npa_aura_id: u32,
    pub npa_pf_func: u16,
    pub hwgrps: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Injected {
    id: MsgId,
    class: Option<LfClass>,
    rc: i32,
    once: bool,
}

/// Per-class LF bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LfState {
    pub provisioned: u16,
    pub attached: u16,
    pub allocated: u16,
}

#[derive(Debug)]
pub struct AgentState {
    pub sso: LfState,
    pub ssow: LfState,
    pub xaq_buf_size: u32,
    pub xaq_wq_entries: u32,
    pub in_unit_entries: u32,
    pub priorities: std::collections::BTreeMap<u16, GrpPriority>,
    pub setconfig: Option<HwSetconfig>,
    pub cache_invalidations: u32,
    /// Every request the AF received, with the timeout the caller asked for.
    pub log: Vec<(Request, MboxTimeout)>,
    injected: Vec<Injected>,
}

impl AgentState {
    fn lf_mut(&mut self, class: LfClass) -> &mut LfState {
        match class {
            LfClass::Ggrp => &mut self.sso,
            LfClass::Gws => &mut self.ssow,
        }
    }

    fn injected_rc(&mut self, req: &Request) -> Option<i32> {
        let class = match req {
            Request::AttachResources { class, .. }
            | Request::DetachResources { class, .. }
            | Request::LfAlloc { class, .. }
            | Request::LfFree { class, .. } => Some(*class),
            _ => None,
        };
        let id = req.id();
        let pos = self
            .injected
            .iter()
            .position(|f| f.id == id && (f.class.is_none() || f.class == class))?;
        let hit = self.injected[pos];
        if hit.once {
            self.injected.remove(pos);
        }
        Some(hit.rc)
    }

    fn handle(&mut self, req: &Request) -> (i32, Response) {
        if let Some(rc) = self.injected_rc(req) {
            tracing::debug!(id = ?req.id(), rc, "injected AF failure");
            return (rc, Response::Ack);
        }
        match *req {
            Request::AttachResources { class, count, .. } => {
                let lf = self.lf_mut(class);
                if lf.allocated > 0 {
                    return (EBUSY, Response::Ack);
                }
                if count > lf.provisioned {
                    return (ENOSPC, Response::Ack);
                }
                lf.attached = count;
            }
            Request::DetachResources { class, .. } => {
                let lf = self.lf_mut(class);
                lf.allocated = 0;
                lf.attached = 0;
            }
            Request::LfAlloc { class, count } => {
                let lf = self.lf_mut(class);
                if lf.allocated > 0 {
                    return (EBUSY, Response::Ack);
                }
                if count > lf.attached {
                    return (ENODEV, Response::Ack);
                }
                lf.allocated = count;
                if class == LfClass::Ggrp {
                    return (
                        0,
                        Response::SsoLfAlloc(SsoLfAllocRsp {
                            xaq_buf_size: self.xaq_buf_size,
                            xaq_wq_entries: self.xaq_wq_entries,
                            in_unit_entries: self.in_unit_entries,
                            hwgrps: count,
                        }),
                    );
                }
            }
            Request::LfFree { class, count } => {
                let lf = self.lf_mut(class);
                if count > lf.allocated {
                    return (EINVAL, Response::Ack);
                }
                lf.allocated -= count;
            }
            Request::GrpSetPriority {
                grp,
                weight,
                affinity,
                priority,
            } => {
                if grp >= self.sso.allocated {
                    return (EINVAL, Response::Ack);
                }
                self.priorities.insert(
                    grp,
                    GrpPriority {
                        weight,
                        affinity,
                        priority,
                    },
                );
            }
            Request::HwSetconfig {
                npa_aura_id,
                npa_pf_func,
                hwgrps,
            } => {
                if hwgrps > self.sso.allocated {
                    return (EINVAL, Response::Ack);
                }
                self.setconfig = Some(HwSetconfig {
                    npa_aura_id,
                    npa_pf_func,
                    hwgrps,
                });
            }
            Request::MsixOffset => {
                return (
                    0,
                    Response::MsixOffset(MsixOffsetRsp {
                        ssow_msixoff: (0..self.ssow.attached).map(|i| SSOW_MSIX_BASE + i).collect(),
                        sso_msixoff: (0..self.sso.attached).map(|i| SSO_MSIX_BASE + i).collect(),
                    }),
                );
            }
            Request::FreeRsrcCnt => {
                return (
                    0,
                    Response::FreeRsrcCnt(FreeRsrcCntRsp {
                        npa: 1,
                        sso: self.sso.provisioned,
                        ssow: self.ssow.provisioned,
                    }),
                );
            }
            Request::WsCacheInv => self.cache_invalidations += 1,
        }
        (0, Response::Ack)
    }
}

/// Emulated AF. Clones share state, so a test can keep one handle and give another to the
/// device.
#[derive(Debug, Clone)]
pub struct SimAgent {
    state: Arc<Mutex<AgentState>>,
}

impl SimAgent {
    pub fn new(sso: u16, ssow: u16) -> Self {
        let lf = |provisioned| LfState {
            provisioned,
            ..LfState::default()
        };
        Self {
            state: Arc::new(Mutex::new(AgentState {
                sso: lf(sso),
                ssow: lf(ssow),
                xaq_buf_size: 4096,
                xaq_wq_entries: 32,
                in_unit_entries: 4096,
                priorities: Default::default(),
                setconfig: None,
                cache_invalidations: 0,
                log: Vec::new(),
                injected: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap()
    }

    /// Answers every `id` request with `rc` until cleared.
    pub fn fail(&self, id: MsgId, rc: i32) {
        self.inject(id, None, rc, false);
    }

    pub fn fail_once(&self, id: MsgId, rc: i32) {
        self.inject(id, None, rc, true);
    }

    /// Like [`SimAgent::fail`], restricted to requests about `class`.
    pub fn fail_class(&self, id: MsgId, class: LfClass, rc: i32) {
        self.inject(id, Some(class), rc, false);
    }

    fn inject(&self, id: MsgId, class: Option<LfClass>, rc: i32, once: bool) {
        self.state().injected.push(Injected {
            id,
            class,
            rc,
            once,
        });
    }

    pub fn clear_failures(&self) {
        self.state().injected.clear();
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state().log.iter().map(|(req, _)| req.clone()).collect()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn lf(&self, class: LfClass) -> LfState {
        *self.state().lf_mut(class)
    }
}

impl MboxTransport for SimAgent {
    fn exchange(
        &mut self,
        request: &[u8],
        timeout: MboxTimeout,
    ) -> Result<Vec<u8>, TransportError> {
        let (hdr, req) = decode_request(request).map_err(|err| {
            tracing::warn!(error = %err, "AF dropped malformed request");
            TransportError::Disconnected
        })?;
        let mut state = self.state();
        let (rc, rsp) = state.handle(&req);
        state.log.push((req.clone(), timeout));
        Ok(encode_response(req.id(), hdr.pcifunc, rc, &rsp))
    }
}
