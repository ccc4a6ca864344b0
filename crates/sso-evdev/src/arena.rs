//! Tracks resources acquired during a multi-step configuration so a failure can release exactly
//! what was taken, newest first.

use sso_mbox::{LfClass, MboxClient, MboxTransport};

use crate::error::SsoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// `count` LFs of `class` attached to this function.
    Attached { class: LfClass, count: u16 },
    /// `count` LFs of `class` allocated (initialized) by the AF.
    Lfs { class: LfClass, count: u16 },
    XaqPool,
    Interrupts,
}

#[derive(Debug, Default)]
pub struct ResourceArena {
    stack: Vec<Resource>,
}

impl ResourceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: Resource) {
        self.stack.push(resource);
    }

    /// Moves everything held by `other` on top of this arena.
    pub fn append(&mut self, mut other: ResourceArena) {
        self.stack.append(&mut other.stack);
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.stack
    }

    /// Ownership of everything held passes to the caller; nothing is released.
    pub fn commit(mut self) {
        self.stack.clear();
    }

    /// Releases every held resource in reverse acquisition order.
    ///
    /// A failed release is logged and does not stop the unwind. Returns the first failure.
    pub fn unwind(
        mut self,
        mut release: impl FnMut(Resource) -> Result<(), SsoError>,
    ) -> Option<SsoError> {
        let mut first = None;
        while let Some(resource) = self.stack.pop() {
            tracing::debug!(?resource, "releasing");
            if let Err(err) = release(resource) {
                tracing::warn!(?resource, error = %err, "failed to release resource");
                first.get_or_insert(err);
            }
        }
        first
    }
}

/// Releases an AF-side resource. Anything else is left to its owner.
pub fn release_lf_resource<T: MboxTransport>(
    mbox: &mut MboxClient<T>,
    resource: Resource,
) -> Result<(), SsoError> {
    match resource {
        Resource::Attached { class, .. } => mbox.detach_resources(class)?,
        Resource::Lfs { class, count } => mbox.lf_free(class, count)?,
        Resource::XaqPool | Resource::Interrupts => {}
    }
    Ok(())
}

impl Drop for ResourceArena {
    fn drop(&mut self) {
        if !self.is_empty() {
            tracing::error!(
                resources = ?self.stack,
                "resource arena dropped without commit or unwind; leaking"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_is_lifo_and_continues_past_failures() {
        let mut arena = ResourceArena::new();
        arena.push(Resource::Attached {
            class: LfClass::Gws,
            count: 2,
        });
        arena.push(Resource::Lfs {
            class: LfClass::Gws,
            count: 2,
        });
        arena.push(Resource::XaqPool);

        let mut order = Vec::new();
        let first = arena.unwind(|r| {
            order.push(r);
            match r {
                Resource::Lfs { .. } => Err(SsoError::NotConfigured),
                _ => Ok(()),
            }
        });

        assert!(matches!(first, Some(SsoError::NotConfigured)));
        assert_eq!(
            order,
            vec![
                Resource::XaqPool,
                Resource::Lfs {
                    class: LfClass::Gws,
                    count: 2
                },
                Resource::Attached {
                    class: LfClass::Gws,
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn appended_resources_unwind_first() {
        let mut outer = ResourceArena::new();
        outer.push(Resource::XaqPool);
        let mut inner = ResourceArena::new();
        inner.push(Resource::Interrupts);
        outer.append(inner);

        let mut order = Vec::new();
        assert!(outer
            .unwind(|r| {
                order.push(r);
                Ok(())
            })
            .is_none());
        assert_eq!(order, vec![Resource::Interrupts, Resource::XaqPool]);
    }
}
