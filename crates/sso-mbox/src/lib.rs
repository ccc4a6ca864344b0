//! Mailbox channel to the RVU admin function (AF) for the SSO event device.
//!
//! [`msg`] defines the wire format of the SSO-related AF messages; [`client`] wraps a raw
//! [`MboxTransport`] into a typed, strictly serialized request/response client.

pub mod client;
pub mod msg;

pub use client::{MboxClient, MboxError, MboxTimeout, MboxTransport, TransportError};
pub use msg::{FreeRsrcCntRsp, LfClass, MsgId, MsixOffsetRsp, Request, Response, SsoLfAllocRsp};
