//! The 64-byte submission queue entry and 16-byte completion queue entry,
//! and the admin opcode space (standard opcodes plus the vendor AON range).

use crate::error::StatusCode;

/// A decoded 64-byte NVMe submission queue entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqe {
    pub opcode: u8,
    pub flags: u8,
    pub cid: u16,
    pub nsid: u32,
    pub mptr: u64,
    pub prp1: u64,
    pub prp2: u64,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}

/// The 16-byte completion queue entry. `status` is written by the
/// dispatcher from the handler's `StatusCode`; everything else is filled in
/// by handlers that need to return data (e.g. `cmd_specific`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Cqe {
    pub cmd_specific: u32,
    pub sq_head: u16,
    pub sq_id: u16,
    pub command_id: u16,
    /// Packed `{p:1, sc:8, sct:3, rsvd:2, m:1, dnr:1}`.
    pub status: u16,
}

impl Cqe {
    pub fn new(cid: u16, sq_id: u16) -> Self {
        Self {
            command_id: cid,
            sq_id,
            ..Default::default()
        }
    }

    /// Packs a status code into `status`, leaving the phase bit (`p`) to the
    /// completion-queue poster — except for the synthetic abort completion,
    /// which sets it explicitly (see `async_events::abort`).
    pub fn set_status(&mut self, code: StatusCode) {
        let sc = status_code_value(code) as u16;
        let sct = code.class() as u16;
        self.status = (self.status & 0x8000) | (sc << 1) | (sct << 9);
    }

    pub fn set_phase(&mut self, phase: bool) {
        self.status = (self.status & !0x8000) | ((phase as u16) << 15);
    }
}

/// Maps each status code to its numeric value within its class. Real NVMe
/// status values would matter to a host driver; this crate only needs them
/// to round-trip through `Cqe::set_status` consistently, so the mapping is
/// a straightforward enumeration per class.
fn status_code_value(code: StatusCode) -> u8 {
    use StatusCode::*;
    match code {
        Success => 0x00,
        InvalidOpcode => 0x01,
        InvalidField => 0x02,
        InvalidNamespace => 0x0B,
        CmdSeqError => 0x0C,
        DataXferError => 0x04,
        AbortReq => 0x07,
        Internal => 0x06,

        InvalidQueueIdentifier => 0x01,
        CompletionQueueInvalid => 0x00,
        MaxQueueSizeExceeded => 0x02,
        InvalidInterruptVector => 0x08,
        ReqCmdToAbortNotFound => 0x09,
        AsyncEventLimitExceeded => 0x05,
        InvalidFormat => 0x0A,
        InvalidLogPage => 0x0D,

        InvalidProtectionDomainIdentifier => 0x01,
        InvalidStag => 0x02,
        InvalidNamespaceTag => 0x03,
        InvalidNamespaceSize => 0x04,
        InvalidNamespaceCapacity => 0x05,
        InvalidE2eDataProtectionConfiguration => 0x06,
    }
}

/// Admin opcodes: the standard NVMe admin set plus the vendor AON range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    DeleteSq,
    CreateSq,
    GetLogPage,
    DeleteCq,
    CreateCq,
    Identify,
    Abort,
    SetFeatures,
    GetFeatures,
    AsyncEventRequest,
    ActivateFw,
    DownloadFw,
    FormatNvm,
    SecuritySend,
    SecurityRecv,

    CreatePd,
    CreateStag,
    DeletePd,
    DeleteStag,
    CreateNamespace,
    CreateNsTag,
    DeleteNamespace,
    DeleteNsTag,
    ModifyNamespace,
    InjectError,
}

impl Opcode {
    pub fn from_u8(opcode: u8) -> Option<Self> {
        use Opcode::*;
        Some(match opcode {
            0x00 => DeleteSq,
            0x01 => CreateSq,
            0x02 => GetLogPage,
            0x04 => DeleteCq,
            0x05 => CreateCq,
            0x06 => Identify,
            0x08 => Abort,
            0x09 => SetFeatures,
            0x0A => GetFeatures,
            0x0C => AsyncEventRequest,
            0x10 => ActivateFw,
            0x11 => DownloadFw,
            0x80 => FormatNvm,
            0x81 => SecuritySend,
            0x82 => SecurityRecv,

            0xC0 => CreatePd,
            0xC1 => CreateStag,
            0xC2 => DeletePd,
            0xC3 => DeleteStag,
            0xC4 => CreateNamespace,
            0xC5 => CreateNsTag,
            0xC6 => DeleteNamespace,
            0xC7 => DeleteNsTag,
            0xC8 => ModifyNamespace,
            0xC9 => InjectError,
            _ => return None,
        })
    }

    /// True for opcodes in the vendor AON range (0xC0..0xCA), which all
    /// require `AdmConfig::use_aon`.
    pub fn is_vendor(self) -> bool {
        matches!(
            self,
            Opcode::CreatePd
                | Opcode::CreateStag
                | Opcode::DeletePd
                | Opcode::DeleteStag
                | Opcode::CreateNamespace
                | Opcode::CreateNsTag
                | Opcode::DeleteNamespace
                | Opcode::DeleteNsTag
                | Opcode::ModifyNamespace
                | Opcode::InjectError
        )
    }
}
