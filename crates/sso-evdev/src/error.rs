use sso_mbox::{LfClass, MboxError};
use thiserror::Error;

use crate::irq::IrqError;
use crate::pool::PoolError;

/// Rejections raised before any resource is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{requested} ports requested but only {max} are available")]
    TooManyPorts { requested: u16, max: u16 },
    #[error("{requested} queues requested but only {max} are available")]
    TooManyQueues { requested: u16, max: u16 },
    #[error("at least one port and one queue are required")]
    Empty,
    #[error("dequeue timeout {ns}ns outside [{min}, {max}]")]
    DequeueTimeout { ns: u32, min: u32, max: u32 },
    #[error("{which} depth {depth} is not supported")]
    Depth { which: &'static str, depth: u32 },
    #[error("queue {queue} is not configured (have {nb_queues})")]
    InvalidQueue { queue: u16, nb_queues: u16 },
    #[error("port {port} is not configured (have {nb_ports})")]
    InvalidPort { port: u16, nb_ports: u16 },
}

#[derive(Debug, Error)]
pub enum SsoError {
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("{class} resources unavailable: {source}")]
    ResourceUnavailable {
        class: LfClass,
        #[source]
        source: MboxError,
    },
    #[error("AF provisions too few LFs (queues={queues}, ports={ports})")]
    NotProvisioned { queues: u16, ports: u16 },
    #[error("out of memory allocating {what}")]
    OutOfMemory { what: &'static str },
    #[error("XAQ buffer pool setup failed: {0}")]
    BufferPoolBind(#[source] PoolError),
    #[error("mailbox request failed: {0}")]
    Rpc(#[from] MboxError),
    #[error("interrupt registration failed: {0}")]
    Interrupt(#[from] IrqError),
    #[error("inconsistent configuration: {0}")]
    ConfigurationInconsistent(&'static str),
    #[error("device is not configured")]
    NotConfigured,
}

impl From<PoolError> for SsoError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NoMemory { what } => SsoError::OutOfMemory { what },
            other => SsoError::BufferPoolBind(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SsoError>;
