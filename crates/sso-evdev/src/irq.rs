//! Interrupt vectors owned by the SSO and SSOW LFs.

use sso_mbox::LfClass;
use thiserror::Error;

/// One LF error interrupt to hook up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqVector {
    pub class: LfClass,
    pub lf: u16,
    pub msix: u16,
    /// LF register base the handler reads its cause register from.
    pub base: u64,
}

/// MSI-X vector offsets reported by the AF, indexed by LF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsixOffsets {
    pub gws: Vec<u16>,
    pub ggrp: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to register {class} LF {lf} interrupt (vector {msix})")]
pub struct IrqError {
    pub class: LfClass,
    pub lf: u16,
    pub msix: u16,
}

pub trait IrqRegistrar: Send {
    /// Registers all vectors or none of them.
    fn register(&mut self, vectors: &[IrqVector]) -> Result<(), IrqError>;
    fn unregister(&mut self, vectors: &[IrqVector]);
}
