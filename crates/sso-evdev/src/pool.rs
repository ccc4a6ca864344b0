//! Buffer-pool collaborator backing the XAQ.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u32);

/// DMA-able region the hardware writes its flow-control count into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcRegion {
    pub name: String,
    pub iova: u64,
    pub len: usize,
}

/// NPA aura context fields the SSO cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NpaAuraConfig {
    pub fc_ena: bool,
    pub fc_addr: u64,
    pub fc_hyst_bits: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no memory for {what}")]
    NoMemory { what: &'static str },
    #[error("pool name {0:?} already in use")]
    NameInUse(String),
    #[error("failed to bind pool ops: {0}")]
    Ops(String),
    #[error("failed to populate pool: {0}")]
    Populate(String),
}

/// Memory-pool operations needed to stand up an XAQ pool.
pub trait XaqPoolBackend: Send {
    /// Returns a zeroed region of at least `len` bytes aligned to `align`, reusing an existing
    /// region of the same name if one is still reserved.
    fn reserve_fc_region(&mut self, name: &str, len: usize, align: usize)
        -> Result<FcRegion, PoolError>;
    fn free_fc_region(&mut self, region: &FcRegion);

    fn create_empty(&mut self, name: &str, count: u32, elt_size: u32) -> Result<PoolId, PoolError>;
    /// Binds the hardware aura ops with the given aura context.
    fn set_ops(&mut self, pool: PoolId, aura: &NpaAuraConfig) -> Result<(), PoolError>;
    fn populate(&mut self, pool: PoolId) -> Result<(), PoolError>;
    fn aura_id(&self, pool: PoolId) -> u32;
    fn free(&mut self, pool: PoolId);
}
