//! Device options, configure requests and reported capabilities.

use crate::xaq::XaqSizing;

/// Options fixed for the lifetime of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SsoConfig {
    /// Expected number of in-flight events; sizes the XAQ instead of the in-unit entry count.
    pub xae_cnt: Option<u32>,
    /// Back each port with one workslot instead of a pair.
    pub single_ws: bool,
    pub xaq_sizing: XaqSizing,
}

/// Arguments to [`crate::SsoDevice::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDevConfig {
    pub nb_event_ports: u16,
    pub nb_event_queues: u16,
    /// 0 selects the minimum supported timeout.
    pub dequeue_timeout_ns: u32,
    /// Per-dequeue timeouts requested: installs the timeout dequeue variant.
    pub per_dequeue_timeout: bool,
    pub nb_event_port_dequeue_depth: u32,
    pub nb_event_port_enqueue_depth: u32,
}

impl EventDevConfig {
    pub fn new(nb_event_ports: u16, nb_event_queues: u16) -> Self {
        Self {
            nb_event_ports,
            nb_event_queues,
            dequeue_timeout_ns: 0,
            per_dequeue_timeout: false,
            nb_event_port_dequeue_depth: 1,
            nb_event_port_enqueue_depth: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConf {
    pub nb_atomic_flows: u32,
    pub nb_atomic_order_sequences: u32,
    /// 0 (highest) ..= 255 (lowest).
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConf {
    pub new_event_threshold: i32,
    pub dequeue_depth: u32,
    pub enqueue_depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub min_dequeue_timeout_ns: u32,
    pub max_dequeue_timeout_ns: u32,
    pub max_event_queues: u16,
    pub max_event_queue_flows: u32,
    pub max_event_queue_priority_levels: u8,
    pub max_event_priority_levels: u8,
    pub max_event_ports: u16,
    pub max_event_port_dequeue_depth: u32,
    pub max_event_port_enqueue_depth: u32,
    /// -1 when unbounded.
    pub max_num_events: i32,
}
