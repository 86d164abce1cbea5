//! Admin-queue command processor for an emulated NVMe controller.
//!
//! This crate owns everything that happens between a decoded admin SQE
//! arriving and a CQE going back out: queue pair lifecycle, identify/log
//! pages, feature registers, the security lock state machine, PRP-based
//! host-memory DMA, deferred async-event delivery, firmware management, and
//! the vendor "AON" namespace/protection-domain extensions. It does not
//! implement a PCIe front-end, an I/O command path, or a host driver — all
//! of that lives above and below this crate's `Controller`.

pub mod async_events;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod firmware;
pub mod host;
pub mod identify;
pub mod queue;
pub mod security;
pub mod vendor;
pub mod wire;

pub use controller::Controller;
pub use dispatch::process_admin;
pub use error::{HostError, StatusClass, StatusCode};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::AdmConfig;
    use crate::controller::Controller;
    use crate::host::{FlatHostMemory, MemBackingStore};

    pub type TestController = Controller<FlatHostMemory, MemBackingStore>;

    pub fn test_controller() -> TestController {
        Controller::new(AdmConfig::default(), 64 * 1024 * 1024, FlatHostMemory::new(1024 * 1024), MemBackingStore::default())
    }
}
