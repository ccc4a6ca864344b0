//! Control plane for an SSO hardware event scheduler.
//!
//! Provisions workslots (ports) and groups (queues) through the AF mailbox, sizes the XAQ
//! buffer pool, programs port/queue links and drains residual work on start.

pub mod arena;
pub mod config;
pub mod dev;
mod dump;
pub mod drain;
pub mod error;
pub mod fastpath;
pub mod io;
pub mod irq;
pub mod link;
pub mod pool;
pub mod port;
pub mod queue;
pub mod regs;
pub mod xaq;

pub use config::{DeviceInfo, EventDevConfig, PortConf, QueueConf, SsoConfig};
pub use dev::{ConfigState, SsoDevice, SsoPlatform};
pub use drain::Event;
pub use error::{Result, SsoError, ValidationError};
pub use io::RegisterIo;
pub use irq::{IrqError, IrqRegistrar, IrqVector, MsixOffsets};
pub use pool::{FcRegion, NpaAuraConfig, PoolError, PoolId, XaqPoolBackend};
pub use regs::SchedType;
pub use xaq::{XaqPool, XaqSizing};
