use std::sync::{Arc, Mutex, MutexGuard};

use sso_evdev::{IrqError, IrqRegistrar, IrqVector};
use sso_mbox::LfClass;

#[derive(Debug, Default)]
pub struct IrqState {
    pub registered: Vec<IrqVector>,
    pub register_calls: u32,
    pub unregister_calls: u32,
    /// Fails the next registration.
    pub fail_register: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SimIrq {
    state: Arc<Mutex<IrqState>>,
}

impl SimIrq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, IrqState> {
        self.state.lock().unwrap()
    }

    pub fn registered(&self) -> Vec<IrqVector> {
        self.state().registered.clone()
    }
}

impl IrqRegistrar for SimIrq {
    fn register(&mut self, vectors: &[IrqVector]) -> Result<(), IrqError> {
        let mut st = self.state();
        st.register_calls += 1;
        if std::mem::take(&mut st.fail_register) {
            let first = vectors.first().copied().unwrap_or(IrqVector {
                class: LfClass::Gws,
                lf: 0,
                msix: 0,
                base: 0,
            });
            return Err(IrqError {
                class: first.class,
                lf: first.lf,
                msix: first.msix,
            });
        }
        st.registered.extend_from_slice(vectors);
        Ok(())
    }

    fn unregister(&mut self, vectors: &[IrqVector]) {
        let mut st = self.state();
        st.unregister_calls += 1;
        st.registered.retain(|v| !vectors.contains(v));
    }
}
