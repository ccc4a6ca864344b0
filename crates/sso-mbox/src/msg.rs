//! AF mailbox message format.
//!
//! Every message is a fixed little-endian header followed by a per-message body:
//!
//! ```text
//! u16 id | u16 sig | u16 ver | u16 pcifunc | i32 rc | body...
//! ```
//!
//! Requests carry [`REQ_SIG`], responses [`RSP_SIG`]. The response body layout is selected by the
//! header id, so a response can be decoded without remembering which request produced it.

use thiserror::Error;

pub const REQ_SIG: u16 = 0xdead;
pub const RSP_SIG: u16 = 0xbeef;
pub const MBOX_VERSION: u16 = 0x0001;

pub const HEADER_LEN: usize = 12;

/// Largest message the decoders accept.
pub const MAX_MESSAGE_BYTES: usize = 1 << 16;

/// Message ids understood by the admin function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgId {
    AttachResources = 0x002,
    DetachResources = 0x003,
    FreeRsrcCnt = 0x004,
    MsixOffset = 0x005,
    SsoLfAlloc = 0x600,
    SsoLfFree = 0x601,
    SsowLfAlloc = 0x602,
    SsowLfFree = 0x603,
    SsoHwSetconfig = 0x604,
    SsoGrpSetPriority = 0x605,
    SsoWsCacheInv = 0x607,
}

impl MsgId {
    pub fn from_u16(v: u16) -> Result<Self, DecodeError> {
        Ok(match v {
            0x002 => MsgId::AttachResources,
            0x003 => MsgId::DetachResources,
            0x004 => MsgId::FreeRsrcCnt,
            0x005 => MsgId::MsixOffset,
            0x600 => MsgId::SsoLfAlloc,
            0x601 => MsgId::SsoLfFree,
            0x602 => MsgId::SsowLfAlloc,
            0x603 => MsgId::SsowLfFree,
            0x604 => MsgId::SsoHwSetconfig,
            0x605 => MsgId::SsoGrpSetPriority,
            0x607 => MsgId::SsoWsCacheInv,
            other => return Err(DecodeError::UnknownId(other)),
        })
    }
}

/// Hardware unit class managed through the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LfClass {
    /// Scheduler groups (`SSO` block, event queues).
    Ggrp,
    /// Scheduler workslots (`SSOW` block, event ports).
    Gws,
}

impl std::fmt::Display for LfClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LfClass::Ggrp => f.write_str("SSO GGRP"),
            LfClass::Gws => f.write_str("SSO GWS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Attach `count` units of `class` to this function. With `modify` set the AF replaces the
    /// current attachment count instead of failing when units are already attached.
    AttachResources {
        class: LfClass,
        count: u16,
        modify: bool,
    },
    /// Detach every unit of `class`. `partial` leaves other classes attached.
    DetachResources { class: LfClass, partial: bool },
    LfAlloc { class: LfClass, count: u16 },
    LfFree { class: LfClass, count: u16 },
    GrpSetPriority {
        grp: u16,
        weight: u8,
        affinity: u8,
        priority: u8,
    },
    /// Bind the XAQ aura to the first `hwgrps` groups.
    HwSetconfig {
        npa_aura_id: u32,
        npa_pf_func: u16,
        hwgrps: u16,
    },
    MsixOffset,
    FreeRsrcCnt,
    WsCacheInv,
}

impl Request {
    pub fn id(&self) -> MsgId {
        match self {
            Request::AttachResources { .. } => MsgId::AttachResources,
            Request::DetachResources { .. } => MsgId::DetachResources,
            Request::LfAlloc {
                class: LfClass::Ggrp,
                ..
            } => MsgId::SsoLfAlloc,
            Request::LfAlloc {
                class: LfClass::Gws,
                ..
            } => MsgId::SsowLfAlloc,
            Request::LfFree {
                class: LfClass::Ggrp,
                ..
            } => MsgId::SsoLfFree,
            Request::LfFree {
                class: LfClass::Gws,
                ..
            } => MsgId::SsowLfFree,
            Request::GrpSetPriority { .. } => MsgId::SsoGrpSetPriority,
            Request::HwSetconfig { .. } => MsgId::SsoHwSetconfig,
            Request::MsixOffset => MsgId::MsixOffset,
            Request::FreeRsrcCnt => MsgId::FreeRsrcCnt,
            Request::WsCacheInv => MsgId::SsoWsCacheInv,
        }
    }
}

/// Body of a successful `SSO_LF_ALLOC` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SsoLfAllocRsp {
    pub xaq_buf_size: u32,
    pub xaq_wq_entries: u32,
    pub in_unit_entries: u32,
    pub hwgrps: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsixOffsetRsp {
    /// Vector offset per attached workslot unit.
    pub ssow_msixoff: Vec<u16>,
    /// Vector offset per attached group.
    pub sso_msixoff: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeRsrcCntRsp {
    pub npa: u8,
    pub sso: u16,
    pub ssow: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Header-only acknowledgement.
    Ack,
    SsoLfAlloc(SsoLfAllocRsp),
    MsixOffset(MsixOffsetRsp),
    FreeRsrcCnt(FreeRsrcCntRsp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub id: u16,
    pub sig: u16,
    pub ver: u16,
    pub pcifunc: u16,
    pub rc: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected EOF")]
    UnexpectedEof,
    #[error("unknown message id {0:#x}")]
    UnknownId(u16),
    #[error("bad signature {0:#x}")]
    BadSignature(u16),
    #[error("invalid field value")]
    InvalidField,
    #[error("trailing bytes after message body")]
    TrailingBytes,
    #[error("payload too large")]
    OversizedPayload,
}

pub fn encode_request(pcifunc: u16, req: &Request) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 16);
    push_header(
        &mut out,
        MsgHeader {
            id: req.id() as u16,
            sig: REQ_SIG,
            ver: MBOX_VERSION,
            pcifunc,
            rc: 0,
        },
    );
    match req {
        Request::AttachResources {
            class,
            count,
            modify,
        } => {
            let (sso, ssow) = match class {
                LfClass::Ggrp => (*count, 0),
                LfClass::Gws => (0, *count),
            };
            push_u16(&mut out, sso);
            push_u16(&mut out, ssow);
            out.push(u8::from(*modify));
        }
        Request::DetachResources { class, partial } => {
            out.push(u8::from(*partial));
            out.push(u8::from(*class == LfClass::Ggrp));
            out.push(u8::from(*class == LfClass::Gws));
        }
        Request::LfAlloc { count, .. } | Request::LfFree { count, .. } => {
            push_u16(&mut out, *count);
        }
        Request::GrpSetPriority {
            grp,
            weight,
            affinity,
            priority,
        } => {
            push_u16(&mut out, *grp);
            out.push(*weight);
            out.push(*affinity);
            out.push(*priority);
        }
        Request::HwSetconfig {
            npa_aura_id,
            npa_pf_func,
            hwgrps,
        } => {
            push_u32(&mut out, *npa_aura_id);
            push_u16(&mut out, *npa_pf_func);
            push_u16(&mut out, *hwgrps);
        }
        Request::MsixOffset | Request::FreeRsrcCnt | Request::WsCacheInv => {}
    }
    out
}

pub fn decode_request(bytes: &[u8]) -> Result<(MsgHeader, Request), DecodeError> {
    let mut r = Reader::new(bytes)?;
    let hdr = r.read_header()?;
    if hdr.sig != REQ_SIG {
        return Err(DecodeError::BadSignature(hdr.sig));
    }
    let req = match MsgId::from_u16(hdr.id)? {
        MsgId::AttachResources => {
            let sso = r.read_u16()?;
            let ssow = r.read_u16()?;
            let modify = r.read_bool()?;
            let (class, count) = match (sso, ssow) {
                (n, 0) => (LfClass::Ggrp, n),
                (0, n) => (LfClass::Gws, n),
                _ => return Err(DecodeError::InvalidField),
            };
            Request::AttachResources {
                class,
                count,
                modify,
            }
        }
        MsgId::DetachResources => {
            let partial = r.read_bool()?;
            let sso = r.read_bool()?;
            let ssow = r.read_bool()?;
            let class = match (sso, ssow) {
                (true, false) => LfClass::Ggrp,
                (false, true) => LfClass::Gws,
                _ => return Err(DecodeError::InvalidField),
            };
            Request::DetachResources { class, partial }
        }
        MsgId::SsoLfAlloc => Request::LfAlloc {
            class: LfClass::Ggrp,
            count: r.read_u16()?,
        },
        MsgId::SsowLfAlloc => Request::LfAlloc {
            class: LfClass::Gws,
            count: r.read_u16()?,
        },
        MsgId::SsoLfFree => Request::LfFree {
            class: LfClass::Ggrp,
            count: r.read_u16()?,
        },
        MsgId::SsowLfFree => Request::LfFree {
            class: LfClass::Gws,
            count: r.read_u16()?,
        },
        MsgId::SsoGrpSetPriority => Request::GrpSetPriority {
            grp: r.read_u16()?,
            weight: r.read_u8()?,
            affinity: r.read_u8()?,
            priority: r.read_u8()?,
        },
        MsgId::SsoHwSetconfig => Request::HwSetconfig {
            npa_aura_id: r.read_u32()?,
            npa_pf_func: r.read_u16()?,
            hwgrps: r.read_u16()?,
        },
        MsgId::MsixOffset => Request::MsixOffset,
        MsgId::FreeRsrcCnt => Request::FreeRsrcCnt,
        MsgId::SsoWsCacheInv => Request::WsCacheInv,
    };
    r.finish()?;
    Ok((hdr, req))
}

/// Encodes a response. A negative `rc` is sent header-only; the body is ignored.
pub fn encode_response(id: MsgId, pcifunc: u16, rc: i32, rsp: &Response) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 16);
    push_header(
        &mut out,
        MsgHeader {
            id: id as u16,
            sig: RSP_SIG,
            ver: MBOX_VERSION,
            pcifunc,
            rc,
        },
    );
    if rc < 0 {
        return out;
    }
    match rsp {
        Response::Ack => {}
        Response::SsoLfAlloc(body) => {
            push_u32(&mut out, body.xaq_buf_size);
            push_u32(&mut out, body.xaq_wq_entries);
            push_u32(&mut out, body.in_unit_entries);
            push_u16(&mut out, body.hwgrps);
        }
        Response::MsixOffset(body) => {
            push_u16(&mut out, body.ssow_msixoff.len() as u16);
            for off in &body.ssow_msixoff {
                push_u16(&mut out, *off);
            }
            push_u16(&mut out, body.sso_msixoff.len() as u16);
            for off in &body.sso_msixoff {
                push_u16(&mut out, *off);
            }
        }
        Response::FreeRsrcCnt(body) => {
            out.push(body.npa);
            push_u16(&mut out, body.sso);
            push_u16(&mut out, body.ssow);
        }
    }
    out
}

pub fn decode_response(bytes: &[u8]) -> Result<(MsgHeader, Response), DecodeError> {
    let mut r = Reader::new(bytes)?;
    let hdr = r.read_header()?;
    if hdr.sig != RSP_SIG {
        return Err(DecodeError::BadSignature(hdr.sig));
    }
    let id = MsgId::from_u16(hdr.id)?;
    if hdr.rc < 0 {
        r.finish()?;
        return Ok((hdr, Response::Ack));
    }
    let rsp = match id {
        MsgId::SsoLfAlloc => Response::SsoLfAlloc(SsoLfAllocRsp {
            xaq_buf_size: r.read_u32()?,
            xaq_wq_entries: r.read_u32()?,
            in_unit_entries: r.read_u32()?,
            hwgrps: r.read_u16()?,
        }),
        MsgId::MsixOffset => {
            let ssow_msixoff = r.read_u16_array()?;
            let sso_msixoff = r.read_u16_array()?;
            Response::MsixOffset(MsixOffsetRsp {
                ssow_msixoff,
                sso_msixoff,
            })
        }
        MsgId::FreeRsrcCnt => Response::FreeRsrcCnt(FreeRsrcCntRsp {
            npa: r.read_u8()?,
            sso: r.read_u16()?,
            ssow: r.read_u16()?,
        }),
        _ => Response::Ack,
    };
    r.finish()?;
    Ok((hdr, rsp))
}

fn push_header(out: &mut Vec<u8>, hdr: MsgHeader) {
    push_u16(out, hdr.id);
    push_u16(out, hdr.sig);
    push_u16(out, hdr.ver);
    push_u16(out, hdr.pcifunc);
    out.extend_from_slice(&hdr.rc.to_le_bytes());
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_MESSAGE_BYTES {
            return Err(DecodeError::OversizedPayload);
        }
        Ok(Self { bytes, pos: 0 })
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn finish(&self) -> Result<(), DecodeError> {
        if self.remaining() != 0 {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(())
    }

    fn read_header(&mut self) -> Result<MsgHeader, DecodeError> {
        Ok(MsgHeader {
            id: self.read_u16()?,
            sig: self.read_u16()?,
            ver: self.read_u16()?,
            pcifunc: self.read_u16()?,
            rc: self.read_u32()? as i32,
        })
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.bytes.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidField),
        }
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u16_array(&mut self) -> Result<Vec<u16>, DecodeError> {
        let len = usize::from(self.read_u16()?);
        if self.remaining() < len * 2 {
            return Err(DecodeError::UnexpectedEof);
        }
        (0..len).map(|_| self.read_u16()).collect()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let bytes = encode_request(0x0400, &Request::WsCacheInv);
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..2], &0x607u16.to_le_bytes());
        assert_eq!(&bytes[2..4], &REQ_SIG.to_le_bytes());
        assert_eq!(&bytes[6..8], &0x0400u16.to_le_bytes());
    }

    #[test]
    fn lf_alloc_id_follows_class() {
        let ggrp = Request::LfAlloc {
            class: LfClass::Ggrp,
            count: 4,
        };
        let gws = Request::LfFree {
            class: LfClass::Gws,
            count: 4,
        };
        assert_eq!(ggrp.id(), MsgId::SsoLfAlloc);
        assert_eq!(gws.id(), MsgId::SsowLfFree);
    }

    #[test]
    fn rejected_response_has_no_body() {
        let bytes = encode_response(
            MsgId::SsoLfAlloc,
            0,
            -28,
            &Response::SsoLfAlloc(SsoLfAllocRsp::default()),
        );
        assert_eq!(bytes.len(), HEADER_LEN);
        let (hdr, rsp) = decode_response(&bytes).unwrap();
        assert_eq!(hdr.rc, -28);
        assert_eq!(rsp, Response::Ack);
    }

    #[test]
    fn attach_with_both_classes_is_rejected() {
        let mut bytes = encode_request(
            0,
            &Request::AttachResources {
                class: LfClass::Gws,
                count: 2,
                modify: true,
            },
        );
        // Patch the `sso` count so both classes are requested at once.
        bytes[HEADER_LEN] = 1;
        assert_eq!(decode_request(&bytes), Err(DecodeError::InvalidField));
    }

    #[test]
    fn request_signature_is_checked() {
        let bytes = encode_response(MsgId::SsoWsCacheInv, 0, 0, &Response::Ack);
        assert_eq!(
            decode_request(&bytes),
            Err(DecodeError::BadSignature(RSP_SIG))
        );
    }

    #[test]
    fn truncated_msix_array_is_eof() {
        let mut bytes = encode_response(
            MsgId::MsixOffset,
            0,
            0,
            &Response::MsixOffset(MsixOffsetRsp {
                ssow_msixoff: vec![0x10, 0x11],
                sso_msixoff: vec![0x20],
            }),
        );
        bytes.truncate(bytes.len() - 3);
        assert_eq!(decode_response(&bytes), Err(DecodeError::UnexpectedEof));
    }
}
