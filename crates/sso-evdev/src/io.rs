//! Register access seam between the control plane and the BAR2 window.

use std::sync::atomic::{fence, Ordering};

/// 64-bit MMIO access to the BAR2 window holding the SSO/SSOW LFs.
///
/// Accessors take `&self`; implementations handle their own interior mutability.
pub trait RegisterIo: Send + Sync {
    fn read64(&self, addr: u64) -> u64;
    fn write64(&self, addr: u64, value: u64);

    /// Store barrier. Must order every prior `write64` before any later one.
    fn barrier(&self) {
        fence(Ordering::SeqCst);
    }
}
