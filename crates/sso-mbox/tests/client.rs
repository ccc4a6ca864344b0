use std::collections::VecDeque;
use std::time::Duration;

use sso_mbox::msg::{decode_request, encode_response, MsgHeader};
use sso_mbox::{
    LfClass, MboxClient, MboxError, MboxTimeout, MboxTransport, MsgId, Request, Response,
    SsoLfAllocRsp, TransportError,
};

/// Answers each request with the next scripted `(rc, response)` and records what it saw.
#[derive(Default)]
struct ScriptedAf {
    replies: VecDeque<(i32, Response)>,
    seen: Vec<(MsgHeader, Request, MboxTimeout)>,
    answer_with_id: Option<MsgId>,
}

impl ScriptedAf {
    fn reply(mut self, rc: i32, rsp: Response) -> Self {
        self.replies.push_back((rc, rsp));
        self
    }
}

impl MboxTransport for ScriptedAf {
    fn exchange(
        &mut self,
        request: &[u8],
        timeout: MboxTimeout,
    ) -> Result<Vec<u8>, TransportError> {
        let (hdr, req) = decode_request(request).expect("client sent a malformed request");
        let id = self.answer_with_id.unwrap_or(req.id());
        self.seen.push((hdr, req, timeout));
        let (rc, rsp) = self
            .replies
            .pop_front()
            .ok_or(TransportError::Timeout(Duration::from_millis(3000)))?;
        Ok(encode_response(id, hdr.pcifunc, rc, &rsp))
    }
}

#[test]
fn ggrp_lf_alloc_reports_xaq_geometry_and_blocks_indefinitely() {
    let geometry = SsoLfAllocRsp {
        xaq_buf_size: 4096,
        xaq_wq_entries: 32,
        in_unit_entries: 4096,
        hwgrps: 4,
    };
    let af = ScriptedAf::default().reply(0, Response::SsoLfAlloc(geometry));
    let mut mbox = MboxClient::new(af, 0x0400);

    let info = mbox.lf_alloc(LfClass::Ggrp, 4).unwrap();
    assert_eq!(info, Some(geometry));

    let (hdr, req, timeout) = &mbox.transport().seen[0];
    assert_eq!(hdr.pcifunc, 0x0400);
    assert_eq!(
        *req,
        Request::LfAlloc {
            class: LfClass::Ggrp,
            count: 4
        }
    );
    assert_eq!(*timeout, MboxTimeout::Infinite);
}

#[test]
fn attach_requests_modify_and_detach_requests_partial() {
    let af = ScriptedAf::default()
        .reply(0, Response::Ack)
        .reply(0, Response::Ack);
    let mut mbox = MboxClient::new(af, 0);

    mbox.attach_resources(LfClass::Gws, 8).unwrap();
    mbox.detach_resources(LfClass::Gws).unwrap();

    let seen: Vec<_> = mbox.transport().seen.iter().map(|s| s.1.clone()).collect();
    assert_eq!(
        seen,
        vec![
            Request::AttachResources {
                class: LfClass::Gws,
                count: 8,
                modify: true
            },
            Request::DetachResources {
                class: LfClass::Gws,
                partial: true
            },
        ]
    );
}

#[test]
fn negative_rc_surfaces_as_rejection() {
    let af = ScriptedAf::default().reply(-28, Response::Ack);
    let mut mbox = MboxClient::new(af, 0);

    let err = mbox.attach_resources(LfClass::Ggrp, 300).unwrap_err();
    assert_eq!(
        err,
        MboxError::Rejected {
            id: MsgId::AttachResources,
            rc: -28
        }
    );
}

#[test]
fn mismatched_response_id_is_an_error() {
    let mut af = ScriptedAf::default().reply(0, Response::Ack);
    af.answer_with_id = Some(MsgId::SsoWsCacheInv);
    let mut mbox = MboxClient::new(af, 0);

    let err = mbox.hw_setconfig(7, 0x0400, 2).unwrap_err();
    assert_eq!(
        err,
        MboxError::UnexpectedResponse {
            expected: MsgId::SsoHwSetconfig,
            found: MsgId::SsoWsCacheInv as u16
        }
    );
}

#[test]
fn transport_failure_is_not_retried() {
    let mut mbox = MboxClient::new(ScriptedAf::default(), 0);

    let err = mbox.ws_cache_inv().unwrap_err();
    assert!(matches!(err, MboxError::Transport(TransportError::Timeout(_))));
    assert_eq!(mbox.transport().seen.len(), 1);
}

#[test]
fn boxed_transports_forward_exchanges() {
    let af: Box<dyn MboxTransport> = Box::new(ScriptedAf::default().reply(0, Response::Ack));
    let mut mbox = MboxClient::new(af, 0x0400);

    mbox.ws_cache_inv().unwrap();
    assert!(matches!(
        mbox.ws_cache_inv(),
        Err(MboxError::Transport(TransportError::Timeout(_)))
    ));
}
