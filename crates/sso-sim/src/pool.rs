use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use sso_evdev::{FcRegion, NpaAuraConfig, PoolError, PoolId, XaqPoolBackend};

const IOVA_BASE: u64 = 0x1_0000_0000;
const AURA_ID_BASE: u32 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimMempool {
    pub name: String,
    pub count: u32,
    pub elt_size: u32,
    pub aura: Option<NpaAuraConfig>,
    pub populated: bool,
}

/// Live objects plus one-shot failure switches (each cleared when it fires).
#[derive(Debug, Default)]
pub struct PoolState {
    pub regions: BTreeMap<String, FcRegion>,
    pub pools: BTreeMap<PoolId, SimMempool>,
    /// Names of every pool ever created, in order.
    pub created: Vec<String>,
    pub fail_region: bool,
    pub fail_create: bool,
    pub fail_ops: bool,
    pub fail_populate: bool,
    next_id: u32,
    next_iova: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SimPool {
    state: Arc<Mutex<PoolState>>,
}

impl SimPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap()
    }

    pub fn live_pools(&self) -> Vec<SimMempool> {
        self.state().pools.values().cloned().collect()
    }

    pub fn live_regions(&self) -> usize {
        self.state().regions.len()
    }

    pub fn created(&self) -> Vec<String> {
        self.state().created.clone()
    }
}

impl XaqPoolBackend for SimPool {
    fn reserve_fc_region(
        &mut self,
        name: &str,
        len: usize,
        align: usize,
    ) -> Result<FcRegion, PoolError> {
        let mut st = self.state();
        if std::mem::take(&mut st.fail_region) {
            return Err(PoolError::NoMemory {
                what: "flow-control region",
            });
        }
        if let Some(region) = st.regions.get(name) {
            return Ok(region.clone());
        }
        let align = align.max(1) as u64;
        let iova = (IOVA_BASE + st.next_iova + align - 1) / align * align;
        st.next_iova = iova - IOVA_BASE + len as u64;
        let region = FcRegion {
            name: name.to_owned(),
            iova,
            len,
        };
        st.regions.insert(name.to_owned(), region.clone());
        Ok(region)
    }

    fn free_fc_region(&mut self, region: &FcRegion) {
        self.state().regions.remove(&region.name);
    }

    fn create_empty(&mut self, name: &str, count: u32, elt_size: u32) -> Result<PoolId, PoolError> {
        let mut st = self.state();
        if std::mem::take(&mut st.fail_create) {
            return Err(PoolError::NoMemory { what: "XAQ pool" });
        }
        if st.pools.values().any(|p| p.name == name) {
            return Err(PoolError::NameInUse(name.to_owned()));
        }
        let id = PoolId(st.next_id);
        st.next_id += 1;
        st.pools.insert(
            id,
            SimMempool {
                name: name.to_owned(),
                count,
                elt_size,
                aura: None,
                populated: false,
            },
        );
        st.created.push(name.to_owned());
        Ok(id)
    }

    fn set_ops(&mut self, pool: PoolId, aura: &NpaAuraConfig) -> Result<(), PoolError> {
        let mut st = self.state();
        if std::mem::take(&mut st.fail_ops) {
            return Err(PoolError::Ops("aura ops rejected".into()));
        }
        let p = st
            .pools
            .get_mut(&pool)
            .ok_or_else(|| PoolError::Ops(format!("no pool {pool:?}")))?;
        p.aura = Some(*aura);
        Ok(())
    }

    fn populate(&mut self, pool: PoolId) -> Result<(), PoolError> {
        let mut st = self.state();
        if std::mem::take(&mut st.fail_populate) {
            return Err(PoolError::Populate("out of hugepages".into()));
        }
        let p = st
            .pools
            .get_mut(&pool)
            .ok_or_else(|| PoolError::Populate(format!("no pool {pool:?}")))?;
        p.populated = true;
        Ok(())
    }

    fn aura_id(&self, pool: PoolId) -> u32 {
        AURA_ID_BASE + pool.0
    }

    fn free(&mut self, pool: PoolId) {
        self.state().pools.remove(&pool);
    }
}
