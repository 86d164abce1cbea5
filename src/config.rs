//! Controller configuration: queue/namespace limits, AON object-table
//! bounds, and backing-file paths — the register/capability values that in
//! real hardware live in `CAP`/`VS`/vendor-specific identify pages, loaded
//! here from TOML the way the hypervisor's own subsystems load their
//! `*Config` structs at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmConfig {
    /// Highest valid submission/completion queue id (slot 0 is the admin pair).
    pub qmax: u16,
    /// Maximum Queue Entries Supported (CAP.MQES), zero-based.
    pub mqes: u16,
    /// Highest valid namespace id.
    pub nsmax: u32,
    /// Asynchronous Event Request Limit (zero-based, as on the wire).
    pub aerl: u8,
    /// AON protection-domain table size.
    pub mnpd: u16,
    /// AON storage-tag table size.
    pub mnhr: u16,
    /// AON namespace-tag table size.
    pub mnon: u16,
    pub smpsmin: u8,
    pub smpsmax: u8,
    /// Minimum namespace size, expressed as a power of two, enforced by
    /// `CREATE_NAMESPACE`.
    pub mns: u8,
    /// Controller page size used by the PRP walker.
    pub page_size: usize,
    /// CAP.CQR: queues must be physically contiguous.
    pub cap_cqr: bool,
    /// Number of configured MSI-X vectors (0 disables the vector check).
    pub msix_entries_nr: u16,
    /// Enables the vendor-extension AON command set.
    pub use_aon: bool,
    /// SMART available-spare threshold below which the critical-warning bit is set.
    pub spare_threshold: u8,
    /// Sticky backing file for pending firmware images.
    pub firmware_image_path: PathBuf,
    pub max_password_retry: u8,
}

impl Default for AdmConfig {
    fn default() -> Self {
        Self {
            qmax: 64,
            mqes: 4095,
            nsmax: 1024,
            aerl: 3,
            mnpd: 64,
            mnhr: 256,
            mnon: 256,
            smpsmin: 0,
            smpsmax: 8,
            mns: 9, // 512 bytes
            page_size: 4096,
            cap_cqr: false,
            msix_entries_nr: 32,
            use_aon: true,
            spare_threshold: 10,
            firmware_image_path: PathBuf::from("nvme_firmware_disk.img"),
            max_password_retry: 5,
        }
    }
}

impl AdmConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&text)?)
    }
}
