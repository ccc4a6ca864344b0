//! Event queues (hardware groups, GGRP LFs).

use sso_mbox::{LfClass, MboxClient, MboxTransport};

use crate::arena::{release_lf_resource, Resource, ResourceArena};
use crate::error::{Result, SsoError};
use crate::xaq::XaqGeometry;

/// Scheduling weight and affinity given to every group.
pub const GRP_WEIGHT: u8 = 0xff;
pub const GRP_AFFINITY: u8 = 0xff;

/// Number of hardware priority levels.
pub const HW_PRIORITY_LEVELS: u8 = 8;
pub const PRIORITY_HIGHEST: u8 = 0;
pub const PRIORITY_NORMAL: u8 = 128;
pub const PRIORITY_LOWEST: u8 = 255;

/// Maps a 0 (highest) ..= 255 (lowest) priority onto the eight hardware levels.
pub fn hw_priority(priority: u8) -> u8 {
    priority / (u8::MAX / HW_PRIORITY_LEVELS + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQueue {
    id: u16,
    priority: Option<u8>,
}

impl EventQueue {
    pub fn new(id: u16) -> Self {
        Self { id, priority: None }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Hardware priority last programmed, if any.
    pub fn hw_priority(&self) -> Option<u8> {
        self.priority
    }

    pub(crate) fn set_hw_priority(&mut self, level: u8) {
        self.priority = Some(level);
    }
}

/// Attaches and allocates `nb_queues` group LFs and returns the XAQ geometry the AF reports.
///
/// Same ownership contract as [`crate::port::configure_ports`].
pub fn configure_queues<T: MboxTransport>(
    mbox: &mut MboxClient<T>,
    nb_queues: u16,
) -> Result<(XaqGeometry, ResourceArena)> {
    let mut arena = ResourceArena::new();

    let step = (|| -> Result<XaqGeometry> {
        mbox.attach_resources(LfClass::Ggrp, nb_queues)
            .map_err(|source| SsoError::ResourceUnavailable {
                class: LfClass::Ggrp,
                source,
            })?;
        arena.push(Resource::Attached {
            class: LfClass::Ggrp,
            count: nb_queues,
        });

        let rsp = mbox
            .lf_alloc(LfClass::Ggrp, nb_queues)
            .map_err(|source| SsoError::ResourceUnavailable {
                class: LfClass::Ggrp,
                source,
            })?;
        arena.push(Resource::Lfs {
            class: LfClass::Ggrp,
            count: nb_queues,
        });

        let rsp = rsp.ok_or(SsoError::ConfigurationInconsistent(
            "group allocation returned no XAQ geometry",
        ))?;
        Ok(rsp.into())
    })();

    match step {
        Ok(geom) => {
            tracing::debug!(nb_queues, ?geom, "groups attached");
            Ok((geom, arena))
        }
        Err(err) => {
            arena.unwind(|r| release_lf_resource(&mut *mbox, r));
            Err(err)
        }
    }
}

/// Programs group `queue` with the default weight/affinity and the mapped priority.
pub fn set_priority<T: MboxTransport>(
    mbox: &mut MboxClient<T>,
    queue: u16,
    priority: u8,
) -> Result<u8> {
    let level = hw_priority(priority);
    tracing::debug!(queue, priority, level, "setting group priority");
    mbox.grp_set_priority(queue, GRP_WEIGHT, GRP_AFFINITY, level)?;
    Ok(level)
}
