//! Selection of the per-event enqueue/dequeue variants installed at start.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueVariant {
    Single,
    Dual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueVariant {
    Single,
    SingleTimeout,
    Dual,
    DualTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastPathOps {
    pub enqueue: EnqueueVariant,
    pub dequeue: DequeueVariant,
}

impl FastPathOps {
    pub fn select(dual_ws: bool, timeout_deq: bool) -> Self {
        let (enqueue, dequeue) = match (dual_ws, timeout_deq) {
            (false, false) => (EnqueueVariant::Single, DequeueVariant::Single),
            (false, true) => (EnqueueVariant::Single, DequeueVariant::SingleTimeout),
            (true, false) => (EnqueueVariant::Dual, DequeueVariant::Dual),
            (true, true) => (EnqueueVariant::Dual, DequeueVariant::DualTimeout),
        };
        Self { enqueue, dequeue }
    }
}
