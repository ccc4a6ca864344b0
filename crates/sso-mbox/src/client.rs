//! Synchronous request/response client for the AF mailbox.

use std::time::Duration;

use thiserror::Error;

use crate::msg::{
    decode_response, encode_request, DecodeError, FreeRsrcCntRsp, LfClass, MsgId, MsixOffsetRsp,
    Request, Response, SsoLfAllocRsp,
};

/// Default response timeout used for everything except LF provisioning.
pub const MBOX_RSP_TIMEOUT: Duration = Duration::from_millis(3000);

/// How long a caller is willing to block for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MboxTimeout {
    /// [`MBOX_RSP_TIMEOUT`].
    Default,
    Bounded(Duration),
    /// Wait until the AF answers. Used for LF alloc/free, where provisioning time is unbounded.
    Infinite,
}

impl MboxTimeout {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            MboxTimeout::Default => Some(MBOX_RSP_TIMEOUT),
            MboxTimeout::Bounded(d) => Some(d),
            MboxTimeout::Infinite => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("mailbox response timed out after {0:?}")]
    Timeout(Duration),
    #[error("mailbox device is gone")]
    Disconnected,
}

/// Raw byte channel to the admin function.
///
/// Implementations deliver one request and block until its response arrives (or the timeout
/// elapses). They never pipeline.
pub trait MboxTransport {
    fn exchange(&mut self, request: &[u8], timeout: MboxTimeout)
        -> std::result::Result<Vec<u8>, TransportError>;
}

impl<T: MboxTransport + ?Sized> MboxTransport for Box<T> {
    fn exchange(
        &mut self,
        request: &[u8],
        timeout: MboxTimeout,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        (**self).exchange(request, timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MboxError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed mailbox response: {0}")]
    Decode(#[from] DecodeError),
    #[error("AF rejected {id:?} (rc={rc})")]
    Rejected { id: MsgId, rc: i32 },
    #[error("expected response to {expected:?}, got id {found:#x}")]
    UnexpectedResponse { expected: MsgId, found: u16 },
}

pub type Result<T> = std::result::Result<T, MboxError>;

/// Mailbox client bound to one PCI function.
///
/// All methods take `&mut self`, so there is never more than one outstanding request.
pub struct MboxClient<T> {
    transport: T,
    pcifunc: u16,
}

impl<T: MboxTransport> MboxClient<T> {
    pub fn new(transport: T, pcifunc: u16) -> Self {
        Self { transport, pcifunc }
    }

    pub fn pcifunc(&self) -> u16 {
        self.pcifunc
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Sends `req` and waits for its response.
    pub fn process(&mut self, req: &Request, timeout: MboxTimeout) -> Result<Response> {
        let id = req.id();
        let bytes = encode_request(self.pcifunc, req);
        tracing::trace!(?id, len = bytes.len(), "mbox request");

        let raw = self.transport.exchange(&bytes, timeout)?;
        let (hdr, rsp) = decode_response(&raw)?;
        if hdr.id != id as u16 {
            return Err(MboxError::UnexpectedResponse {
                expected: id,
                found: hdr.id,
            });
        }
        if hdr.rc < 0 {
            tracing::debug!(?id, rc = hdr.rc, "mbox request rejected");
            return Err(MboxError::Rejected { id, rc: hdr.rc });
        }
        Ok(rsp)
    }

    fn process_ack(&mut self, req: &Request, timeout: MboxTimeout) -> Result<()> {
        self.process(req, timeout).map(|_| ())
    }

    pub fn attach_resources(&mut self, class: LfClass, count: u16) -> Result<()> {
        self.process_ack(
            &Request::AttachResources {
                class,
                count,
                modify: true,
            },
            MboxTimeout::Default,
        )
    }

    pub fn detach_resources(&mut self, class: LfClass) -> Result<()> {
        self.process_ack(
            &Request::DetachResources {
                class,
                partial: true,
            },
            MboxTimeout::Default,
        )
    }

    /// Allocates `count` LFs. Group allocations also report the XAQ geometry.
    pub fn lf_alloc(&mut self, class: LfClass, count: u16) -> Result<Option<SsoLfAllocRsp>> {
        let rsp = self.process(&Request::LfAlloc { class, count }, MboxTimeout::Infinite)?;
        match (class, rsp) {
            (LfClass::Ggrp, Response::SsoLfAlloc(body)) => Ok(Some(body)),
            (LfClass::Gws, _) => Ok(None),
            (LfClass::Ggrp, _) => Err(MboxError::Decode(DecodeError::InvalidField)),
        }
    }

    pub fn lf_free(&mut self, class: LfClass, count: u16) -> Result<()> {
        self.process_ack(&Request::LfFree { class, count }, MboxTimeout::Infinite)
    }

    pub fn grp_set_priority(&mut self, grp: u16, weight: u8, affinity: u8, priority: u8) -> Result<()> {
        self.process_ack(
            &Request::GrpSetPriority {
                grp,
                weight,
                affinity,
                priority,
            },
            MboxTimeout::Default,
        )
    }

    pub fn hw_setconfig(&mut self, npa_aura_id: u32, npa_pf_func: u16, hwgrps: u16) -> Result<()> {
        self.process_ack(
            &Request::HwSetconfig {
                npa_aura_id,
                npa_pf_func,
                hwgrps,
            },
            MboxTimeout::Default,
        )
    }

    pub fn msix_offset(&mut self) -> Result<MsixOffsetRsp> {
        match self.process(&Request::MsixOffset, MboxTimeout::Default)? {
            Response::MsixOffset(body) => Ok(body),
            _ => Err(MboxError::Decode(DecodeError::InvalidField)),
        }
    }

    pub fn free_rsrc_cnt(&mut self) -> Result<FreeRsrcCntRsp> {
        match self.process(&Request::FreeRsrcCnt, MboxTimeout::Default)? {
            Response::FreeRsrcCnt(body) => Ok(body),
            _ => Err(MboxError::Decode(DecodeError::InvalidField)),
        }
    }

    pub fn ws_cache_inv(&mut self) -> Result<()> {
        self.process_ack(&Request::WsCacheInv, MboxTimeout::Default)
    }
}
