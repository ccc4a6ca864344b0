//! XAQ (external admission queue) sizing and buffer-pool lifecycle.

use sso_mbox::SsoLfAllocRsp;

use crate::error::{Result, SsoError};
use crate::pool::{FcRegion, NpaAuraConfig, PoolId, XaqPoolBackend};

pub const SSO_ALIGN: usize = 128;
/// Hardware NPA aura context size.
pub const NPA_AURA_SIZE: usize = 128;
/// Flow-control word, padded to a cache line, followed by the aura context.
pub const FC_REGION_LEN: usize = SSO_ALIGN + NPA_AURA_SIZE;
pub const FC_REGION_NAME: &str = "sso_xaq_fc_mem";

/// Tuning constants for XAQ buffer count and limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XaqSizing {
    /// Buffers reserved per queue for the hardware XAQ cache.
    pub cache_cnt: u32,
    /// Per-queue headroom; half of it is withheld from the limit.
    pub slack: u32,
}

impl Default for XaqSizing {
    fn default() -> Self {
        Self {
            cache_cnt: 7,
            slack: 8,
        }
    }
}

/// XAQ buffer geometry reported by the AF on group LF allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XaqGeometry {
    pub buf_size: u32,
    pub wq_entries: u32,
    pub in_unit_entries: u32,
}

impl From<SsoLfAllocRsp> for XaqGeometry {
    fn from(rsp: SsoLfAllocRsp) -> Self {
        Self {
            buf_size: rsp.xaq_buf_size,
            wq_entries: rsp.xaq_wq_entries,
            in_unit_entries: rsp.in_unit_entries,
        }
    }
}

impl XaqSizing {
    /// Returns `(count, limit)` for `nb_queues` queues.
    ///
    /// With `xae_cnt` set it bounds the backlog; otherwise the in-unit entry count plus slack
    /// does.
    pub fn size(
        &self,
        nb_queues: u16,
        xae_cnt: Option<u32>,
        geom: &XaqGeometry,
    ) -> Result<(u32, u32)> {
        if geom.wq_entries == 0 {
            return Err(SsoError::ConfigurationInconsistent(
                "AF reported zero work entries per XAQ buffer",
            ));
        }
        if self.slack < 2 || self.cache_cnt < self.slack / 2 {
            return Err(SsoError::ConfigurationInconsistent(
                "XAQ slack must be at least 2 and no more than twice the cache count",
            ));
        }

        let nbq = u64::from(nb_queues);
        let wq = u64::from(geom.wq_entries);
        let backlog = match xae_cnt {
            Some(xae) if xae > 0 => u64::from(xae) / wq,
            _ => u64::from(geom.in_unit_entries) / wq + u64::from(self.slack) * nbq,
        };
        let count = u64::from(self.cache_cnt) * nbq + backlog;
        let limit = count - u64::from(self.slack / 2) * nbq;

        let count = u32::try_from(count)
            .map_err(|_| SsoError::ConfigurationInconsistent("XAQ buffer count overflows"))?;
        // limit <= count, so it fits as well.
        Ok((count, limit as u32))
    }
}

/// A live XAQ pool plus its flow-control region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XaqPool {
    pub id: PoolId,
    pub name: String,
    pub count: u32,
    pub limit: u32,
    pub buf_size: u32,
    pub aura_id: u32,
    pub fc: FcRegion,
}

/// Owns at most one XAQ pool per device.
#[derive(Debug, Default)]
pub struct XaqAllocator {
    sizing: XaqSizing,
    /// Bumped on every successful allocation so pool names never repeat.
    reconfig_cnt: u32,
    pool: Option<XaqPool>,
}

impl XaqAllocator {
    pub fn new(sizing: XaqSizing) -> Self {
        Self {
            sizing,
            ..Self::default()
        }
    }

    pub fn sizing(&self) -> XaqSizing {
        self.sizing
    }

    pub fn pool(&self) -> Option<&XaqPool> {
        self.pool.as_ref()
    }

    pub fn reconfig_count(&self) -> u32 {
        self.reconfig_cnt
    }

    /// Replaces any existing pool with one sized for `nb_queues`.
    pub fn allocate(
        &mut self,
        backend: &mut dyn XaqPoolBackend,
        nb_queues: u16,
        xae_cnt: Option<u32>,
        geom: &XaqGeometry,
    ) -> Result<&XaqPool> {
        self.release(backend);
        let (count, limit) = self.sizing.size(nb_queues, xae_cnt, geom)?;

        let fc = backend.reserve_fc_region(FC_REGION_NAME, FC_REGION_LEN, SSO_ALIGN)?;
        let aura = NpaAuraConfig {
            fc_ena: true,
            fc_addr: fc.iova,
            fc_hyst_bits: 0,
        };

        let name = format!("sso_xaq_buf_pool_{}", self.reconfig_cnt);
        let id = match backend.create_empty(&name, count, geom.buf_size) {
            Ok(id) => id,
            Err(err) => {
                backend.free_fc_region(&fc);
                return Err(err.into());
            }
        };
        if let Err(err) = backend
            .set_ops(id, &aura)
            .and_then(|()| backend.populate(id))
        {
            backend.free(id);
            backend.free_fc_region(&fc);
            return Err(err.into());
        }

        self.reconfig_cnt += 1;
        let pool = XaqPool {
            id,
            aura_id: backend.aura_id(id),
            name,
            count,
            limit,
            buf_size: geom.buf_size,
            fc,
        };
        tracing::debug!(
            name = %pool.name,
            count,
            limit,
            aura = pool.aura_id,
            "XAQ pool ready"
        );
        Ok(&*self.pool.insert(pool))
    }

    /// Frees the pool and its flow-control region. Returns whether anything was held.
    pub fn release(&mut self, backend: &mut dyn XaqPoolBackend) -> bool {
        match self.pool.take() {
            Some(pool) => {
                backend.free(pool.id);
                backend.free_fc_region(&pool.fc);
                true
            }
            None => false,
        }
    }
}
