//! Controller-wide state: queue pairs, namespace table, feature registers,
//! firmware-slot log, security state, async-event queue, and the AON vendor
//! object tables. One `Controller` is threaded explicitly through every
//! handler; there are no hidden globals.

use crate::config::AdmConfig;
use crate::host::{BackingStore, HostMemory};
use std::collections::VecDeque;

pub const PASSWORD_LEN: usize = 32;

/// ATA/NVMe-style security lock states (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    /// Initial state: no password has ever been set.
    A,
    /// Unlocked, no password configured.
    B,
    /// Locked, password set, not yet presented for unlock this session.
    C,
    /// Locked, ready for `UNLOCK`.
    D,
    /// Erase prepared (`FREEZE_LOCK`/`ERASE_PREP` armed `ERASE_UNIT`).
    E1,
    /// Locked out after too many failed unlock attempts.
    G,
    /// Unlocked, password configured and verified.
    H,
}

impl SecurityState {
    pub fn is_unlocked(self) -> bool {
        matches!(self, SecurityState::A | SecurityState::B | SecurityState::H)
    }
}

/// A submission queue slot.
#[derive(Debug, Clone, Default)]
pub struct Sq {
    pub allocated: bool,
    pub id: u16,
    pub cq_id: u16,
    pub head: u16,
    pub tail: u16,
    pub size: u16,
    pub prio: u8,
    pub phys_contig: bool,
    pub dma_addr: u64,
    /// Outstanding commands tracked for `ABORT`: (command id, opcode).
    pub cmd_list: Vec<(u16, u8)>,
}

/// A completion queue slot.
#[derive(Debug, Clone, Default)]
pub struct Cq {
    pub allocated: bool,
    pub id: u16,
    pub head: u16,
    pub tail: u16,
    pub size: u16,
    pub dma_addr: u64,
    pub phys_contig: bool,
    pub irq_enabled: bool,
    pub vector: u16,
    pub phase_tag: bool,
    /// Number of SQs whose `cq_id` points at this CQ.
    pub usage_cnt: u32,
    /// Owning AON protection domain, or 0.
    pub pdid: u16,
}

/// Per-LBA-format descriptor of a namespace identify structure.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lbaf {
    pub ms: u16,
    pub lbads: u8,
}

/// Subset of the namespace identify structure this controller maintains.
#[derive(Debug, Clone)]
pub struct IdentifyNamespace {
    pub nsze: u64,
    pub ncap: u64,
    pub nuse: u64,
    pub nlbaf: u8,
    pub flbas: u8,
    pub lbaf: Vec<Lbaf>,
    pub mc: u8,
    pub dpc: u8,
    pub dps: u8,
    pub nsfeat: u8,
}

impl Default for IdentifyNamespace {
    fn default() -> Self {
        Self {
            nsze: 0,
            ncap: 0,
            nuse: 0,
            nlbaf: 0,
            flbas: 0,
            lbaf: vec![Lbaf::default()],
            mc: 0,
            dpc: 0,
            dps: 0,
            nsfeat: 0,
        }
    }
}

/// Per-namespace SMART counters kept as 128-bit (lo, hi) pairs, matching
/// the wire representation of the aggregate SMART log's data-unit/error
/// counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmartCounter {
    pub lo: u64,
    pub hi: u64,
}

impl SmartCounter {
    pub fn add(&mut self, amount: u64) {
        let (new_lo, carried) = self.lo.overflowing_add(amount);
        if carried || new_lo < self.lo {
            self.hi = self.hi.wrapping_add(1);
        }
        self.lo = new_lo;
    }
}

/// An LBA range-type record (Features: `LBA_RANGE_TYPE`).
#[derive(Debug, Clone, Copy, Default)]
pub struct LbaRangeType {
    pub kind: u8,
    pub attributes: u8,
    pub slba: u64,
    pub nlb: u64,
}

/// A namespace: identify structure, on-disk usage bitmap, per-namespace
/// SMART counters, and its backing-store handle (the backing store itself
/// lives in `Controller::store`, keyed by namespace id).
#[derive(Debug, Clone)]
pub struct DiskInfo {
    pub idtfy_ns: IdentifyNamespace,
    pub ns_util: Vec<bool>,
    pub has_meta_mapping: bool,
    pub data_units_read: SmartCounter,
    pub data_units_written: SmartCounter,
    pub host_read_commands: SmartCounter,
    pub host_write_commands: SmartCounter,
    pub range_type: LbaRangeType,
    pub available_spare: u8,
    pub thresh_warn_issued: bool,
}

impl DiskInfo {
    fn new(nsze: u64, block_size: u32, mc: u8, dpc: u8, dps: u8) -> Self {
        Self {
            idtfy_ns: IdentifyNamespace {
                nsze,
                ncap: nsze,
                nuse: 0,
                nlbaf: 0,
                flbas: 0,
                lbaf: vec![Lbaf {
                    lbads: block_size.trailing_zeros() as u8,
                    ms: 0,
                }],
                mc,
                dpc,
                dps,
                nsfeat: 0,
            },
            ns_util: vec![false; nsze as usize],
            has_meta_mapping: false,
            data_units_read: SmartCounter::default(),
            data_units_written: SmartCounter::default(),
            host_read_commands: SmartCounter::default(),
            host_write_commands: SmartCounter::default(),
            range_type: LbaRangeType::default(),
            available_spare: 100,
            thresh_warn_issued: false,
        }
    }
}

/// AON protection domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pd {
    pub allocated: bool,
    pub usage_count: u32,
}

/// AON storage tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct STag {
    pub allocated: bool,
    pub pdid: u16,
    pub smps_bytes: u64,
    pub prp: u64,
    pub nmp: u32,
}

/// AON namespace tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct NsTag {
    pub allocated: bool,
    pub pdid: u16,
    pub at: u8,
    pub nsid: u32,
}

/// One entry in the injected media-error list (capped at 8, spec.md §4.6).
#[derive(Debug, Clone, Copy)]
pub struct MediaError {
    pub slba: u64,
    pub elba: u64,
    pub io_error: u32,
}

/// Scalar feature registers keyed by feature id (spec.md §4.5). `LBA_RANGE_TYPE`
/// is stored per-namespace (`DiskInfo::range_type`) rather than here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureId {
    Arbitration,
    PowerManagement,
    LbaRangeType,
    TemperatureThreshold,
    ErrorRecovery,
    VolatileWriteCache,
    NumberOfQueues,
    InterruptCoalescing,
    InterruptVectorConfig,
    WriteAtomicity,
    AsyncEventConfig,
    SoftwareProgressMarker,
    VendorStriping,
}

impl FeatureId {
    pub fn from_u8(id: u8) -> Option<Self> {
        use FeatureId::*;
        Some(match id {
            0x01 => Arbitration,
            0x02 => PowerManagement,
            0x03 => LbaRangeType,
            0x04 => TemperatureThreshold,
            0x05 => ErrorRecovery,
            0x06 => VolatileWriteCache,
            0x07 => NumberOfQueues,
            0x08 => InterruptCoalescing,
            0x09 => InterruptVectorConfig,
            0x0A => WriteAtomicity,
            0x0B => AsyncEventConfig,
            0x80 => SoftwareProgressMarker,
            0xC0 => VendorStriping,
            _ => return None,
        })
    }

    /// Index into `Controller::features` for scalar (non-LBA-range) ids.
    fn slot(self) -> usize {
        use FeatureId::*;
        match self {
            Arbitration => 0,
            PowerManagement => 1,
            LbaRangeType => 2,
            TemperatureThreshold => 3,
            ErrorRecovery => 4,
            VolatileWriteCache => 5,
            NumberOfQueues => 6,
            InterruptCoalescing => 7,
            InterruptVectorConfig => 8,
            WriteAtomicity => 9,
            AsyncEventConfig => 10,
            SoftwareProgressMarker => 11,
            VendorStriping => 12,
        }
    }
}

pub const FEATURE_SLOTS: usize = 13;

/// Event categories for the async-event delivery pipeline (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEventType {
    Error,
    Smart,
    Notice,
    IoCmd,
    Vendor,
}

/// Event-specific info carried by a pending async event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEventInfo {
    SmartTempThresh,
    SmartSpareBelowThreshold,
    Generic(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct PendingAsyncEvent {
    pub kind: AsyncEventType,
    pub info: AsyncEventInfo,
    pub log_page: u8,
}

/// The controller's mutable, non-I/O state: everything except the host
/// memory/backing-store collaborators, factored out so tests can assert on
/// it without threading trait bounds through every helper.
pub struct ControllerState {
    pub cfg: AdmConfig,

    pub sqs: Vec<Sq>,
    pub cqs: Vec<Cq>,

    pub disks: Vec<Option<DiskInfo>>,
    pub available_space: u64,
    pub nn: u32,
    pub nn_vector: Vec<bool>,

    pub features: [u32; FEATURE_SLOTS],

    pub fw_slot_log: [String; 8], // index 0 unused, slots 1..7
    pub active_fw_slot: usize,
    pub last_fw_slot: usize,
    pub firmware_revision: String,

    pub security: SecurityState,
    pub password: [u8; PASSWORD_LEN],
    pub password_retry: u8,

    pub async_queue: VecDeque<PendingAsyncEvent>,
    pub async_cid: Vec<u16>,
    pub outstanding_asyncs: usize,

    pub temperature: u32,
    pub percentage_used: u8,
    pub injected_spare: Option<u8>,
    pub injected_media_errors: Vec<MediaError>,
    pub injected_timeout: bool,
    pub temp_warn_issued: bool,

    pub pds: Vec<Pd>,
    pub stags: Vec<STag>,
    pub nstags: Vec<NsTag>,

    pub start_time: std::time::Instant,
}

impl ControllerState {
    pub fn new(cfg: AdmConfig, initial_capacity: u64) -> Self {
        let qn = cfg.qmax as usize + 1;
        let nsn = cfg.nsmax as usize + 1;
        Self {
            sqs: vec![Sq::default(); qn],
            cqs: vec![Cq::default(); qn],
            disks: vec![None; nsn],
            available_space: initial_capacity,
            nn: 0,
            nn_vector: vec![false; nsn],
            features: [0u32; FEATURE_SLOTS],
            fw_slot_log: Default::default(),
            active_fw_slot: 1,
            last_fw_slot: 0,
            firmware_revision: String::new(),
            security: SecurityState::A,
            password: [0u8; PASSWORD_LEN],
            password_retry: 0,
            async_queue: VecDeque::new(),
            async_cid: Vec::new(),
            outstanding_asyncs: 0,
            temperature: 0,
            percentage_used: 0,
            injected_spare: None,
            injected_media_errors: Vec::new(),
            injected_timeout: false,
            temp_warn_issued: false,
            pds: vec![Pd::default(); cfg.mnpd as usize + 1],
            stags: vec![STag::default(); cfg.mnhr as usize + 1],
            nstags: vec![NsTag::default(); cfg.mnon as usize + 1],
            start_time: std::time::Instant::now(),
        }
    }

    pub fn get_feature(&self, id: FeatureId) -> u32 {
        self.features[id.slot()]
    }

    pub fn set_feature(&mut self, id: FeatureId, value: u32) {
        self.features[id.slot()] = value;
    }

    /// Recomputes `nn` as the index of the last set bit in `nn_vector`.
    pub fn recompute_nn(&mut self) {
        self.nn = self
            .nn_vector
            .iter()
            .rposition(|&set| set)
            .map(|i| i as u32)
            .unwrap_or(0);
    }

    pub fn allocate_disk(&mut self, nsid: u32, nsze: u64, block_size: u32, mc: u8, dpc: u8, dps: u8) {
        self.disks[nsid as usize] = Some(DiskInfo::new(nsze, block_size, mc, dpc, dps));
        self.nn_vector[nsid as usize] = true;
        self.recompute_nn();
    }

    pub fn free_disk(&mut self, nsid: u32) {
        self.disks[nsid as usize] = None;
        self.nn_vector[nsid as usize] = false;
        self.recompute_nn();
    }
}

/// The full controller: state plus the host-memory and backing-store
/// collaborators. Generic so tests can plug in in-memory implementations
/// while production wires up the real file-backed ones.
pub struct Controller<M: HostMemory, B: BackingStore> {
    pub state: ControllerState,
    pub mem: M,
    pub store: B,
}

impl<M: HostMemory, B: BackingStore> Controller<M, B> {
    pub fn new(cfg: AdmConfig, initial_capacity: u64, mem: M, store: B) -> Self {
        Self {
            state: ControllerState::new(cfg, initial_capacity),
            mem,
            store,
        }
    }
}
