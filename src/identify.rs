//! IDENTIFY and GET_LOG_PAGE (spec.md §4.3).
//!
//! The byte offsets used here are this controller's own layout, not the
//! full NVMe-driver-facing identify structure — host driver compliance is
//! out of scope (spec.md Non-goals), so only the fields this crate itself
//! tracks are populated; the rest of each page is left zeroed.

use crate::error::StatusCode;
use crate::host::{host_write_prp, BackingStore, HostMemory};
use crate::wire::Sqe;
use crate::Controller;

pub const LOG_ERROR_INFORMATION: u8 = 0x01;
pub const LOG_SMART_INFORMATION: u8 = 0x02;
pub const LOG_FW_SLOT_INFORMATION: u8 = 0x03;

const CNS_NAMESPACE: u32 = 0;
const CNS_CONTROLLER: u32 = 1;

fn identify_namespace_bytes<M: HostMemory, B: BackingStore>(
    c: &Controller<M, B>,
    nsid: u32,
) -> Option<[u8; 4096]> {
    let disk = c.state.disks.get(nsid as usize)?.as_ref()?;
    let mut buf = [0u8; 4096];
    buf[0..8].copy_from_slice(&disk.idtfy_ns.nsze.to_le_bytes());
    buf[8..16].copy_from_slice(&disk.idtfy_ns.ncap.to_le_bytes());
    buf[16..24].copy_from_slice(&disk.idtfy_ns.nuse.to_le_bytes());
    buf[24] = disk.idtfy_ns.nsfeat;
    buf[25] = disk.idtfy_ns.nlbaf;
    buf[26] = disk.idtfy_ns.flbas;
    buf[27] = disk.idtfy_ns.mc;
    buf[28] = disk.idtfy_ns.dpc;
    buf[29] = disk.idtfy_ns.dps;
    for (i, lbaf) in disk.idtfy_ns.lbaf.iter().enumerate().take(16) {
        let off = 128 + i * 4;
        buf[off..off + 2].copy_from_slice(&lbaf.ms.to_le_bytes());
        buf[off + 2] = lbaf.lbads;
    }
    Some(buf)
}

fn identify_controller_bytes<M: HostMemory, B: BackingStore>(c: &Controller<M, B>) -> [u8; 4096] {
    let mut buf = [0u8; 4096];
    buf[0..2].copy_from_slice(&0x0000u16.to_le_bytes()); // vid, vendor-chosen
    buf[78] = c.state.cfg.aerl;
    buf[516..520].copy_from_slice(&c.state.nn.to_le_bytes());
    let fr = c.state.firmware_revision.as_bytes();
    let len = fr.len().min(8);
    buf[64..64 + len].copy_from_slice(&fr[..len]);
    buf
}

pub fn identify<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    if sqe.prp1 == 0 {
        return Err(StatusCode::InvalidField);
    }

    let cns = sqe.cdw10 & 0xFF;
    let buf = match cns {
        CNS_CONTROLLER => {
            if sqe.nsid != 0 {
                return Err(StatusCode::InvalidField);
            }
            identify_controller_bytes(c)
        }
        CNS_NAMESPACE => {
            if sqe.nsid == 0 || sqe.nsid > c.state.nn {
                return Err(StatusCode::InvalidNamespace);
            }
            if !c.state.security.is_unlocked() {
                return Err(StatusCode::CmdSeqError);
            }
            // An unallocated namespace within range returns an all-zero
            // buffer rather than failing the command.
            identify_namespace_bytes(c, sqe.nsid).unwrap_or([0u8; 4096])
        }
        _ => return Err(StatusCode::InvalidField),
    };
    host_write_prp(&c.mem, sqe.prp1, sqe.prp2, c.state.cfg.page_size as u64, &buf)
        .map_err(|_| StatusCode::DataXferError)
}

bitflags::bitflags! {
    /// SMART/Health Information log critical-warning bits (spec.md §4.3).
    #[derive(Debug, Clone, Copy, Default)]
    struct CriticalWarning: u8 {
        const SPARE_BELOW_THRESHOLD = 1 << 0;
        const TEMPERATURE = 1 << 1;
    }
}

fn smart_log_bytes<M: HostMemory, B: BackingStore>(
    c: &Controller<M, B>,
    nsid: u32,
) -> Result<[u8; 512], StatusCode> {
    if nsid != 0xFFFF_FFFF && nsid == 0 {
        return Err(StatusCode::InvalidNamespace);
    }
    let mut buf = [0u8; 512];

    let mut critical_warning = CriticalWarning::empty();
    if let Some(spare) = c.state.injected_spare {
        if spare <= c.state.cfg.spare_threshold {
            critical_warning |= CriticalWarning::SPARE_BELOW_THRESHOLD;
        }
    }
    let temp_threshold = c.state.get_feature(crate::controller::FeatureId::TemperatureThreshold);
    if temp_threshold != 0 && temp_threshold <= c.state.temperature {
        critical_warning |= CriticalWarning::TEMPERATURE;
    }
    buf[0] = critical_warning.bits();
    buf[1..3].copy_from_slice(&(c.state.temperature as u16).to_le_bytes());
    buf[3] = c.state.injected_spare.unwrap_or(100);
    buf[4] = c.state.cfg.spare_threshold;
    buf[5] = c.state.percentage_used;

    let power_on_hours = c.state.start_time.elapsed().as_secs() / 3600;
    buf[112..120].copy_from_slice(&power_on_hours.to_le_bytes());

    let (dur, duw, hrc, hwc) = if nsid == 0xFFFF_FFFF {
        let mut dur = (0u64, 0u64);
        let mut duw = (0u64, 0u64);
        let mut hrc = (0u64, 0u64);
        let mut hwc = (0u64, 0u64);
        for disk in c.state.disks.iter().flatten() {
            dur.0 = dur.0.wrapping_add(disk.data_units_read.lo);
            duw.0 = duw.0.wrapping_add(disk.data_units_written.lo);
            hrc.0 = hrc.0.wrapping_add(disk.host_read_commands.lo);
            hwc.0 = hwc.0.wrapping_add(disk.host_write_commands.lo);
        }
        (dur, duw, hrc, hwc)
    } else {
        match c.state.disks.get(nsid as usize).and_then(|d| d.as_ref()) {
            Some(disk) => (
                (disk.data_units_read.lo, disk.data_units_read.hi),
                (disk.data_units_written.lo, disk.data_units_written.hi),
                (disk.host_read_commands.lo, disk.host_read_commands.hi),
                (disk.host_write_commands.lo, disk.host_write_commands.hi),
            ),
            None => ((0, 0), (0, 0), (0, 0), (0, 0)),
        }
    };

    buf[32..40].copy_from_slice(&dur.0.to_le_bytes());
    buf[40..48].copy_from_slice(&dur.1.to_le_bytes());
    buf[48..56].copy_from_slice(&duw.0.to_le_bytes());
    buf[56..64].copy_from_slice(&duw.1.to_le_bytes());
    buf[64..72].copy_from_slice(&hrc.0.to_le_bytes());
    buf[72..80].copy_from_slice(&hrc.1.to_le_bytes());
    buf[80..88].copy_from_slice(&hwc.0.to_le_bytes());
    buf[88..96].copy_from_slice(&hwc.1.to_le_bytes());

    if c.state.injected_timeout {
        buf[96] = 1;
    }
    buf[97] = c.state.injected_media_errors.len().min(255) as u8;

    Ok(buf)
}

fn fw_slot_log_bytes<M: HostMemory, B: BackingStore>(c: &Controller<M, B>) -> [u8; 512] {
    let mut buf = [0u8; 512];
    buf[0] = ((c.state.active_fw_slot as u8) & 0x7) | (((c.state.last_fw_slot as u8) & 0x7) << 4);
    for slot in 1..=7usize {
        let off = 8 + (slot - 1) * 8;
        let mut frs = [b' '; 8];
        let bytes = c.state.fw_slot_log[slot].as_bytes();
        let len = bytes.len().min(8);
        frs[..len].copy_from_slice(&bytes[..len]);
        buf[off..off + 8].copy_from_slice(&frs);
    }
    buf
}

pub fn get_log_page<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let lid = (sqe.cdw10 & 0xFF) as u8;

    let page = match lid {
        LOG_ERROR_INFORMATION => {
            // No error-log entries are tracked by this controller; a
            // driver polling this page always sees an empty list.
            [0u8; 512]
        }
        LOG_SMART_INFORMATION => smart_log_bytes(c, sqe.nsid)?,
        LOG_FW_SLOT_INFORMATION => fw_slot_log_bytes(c),
        _ => return Err(StatusCode::InvalidLogPage),
    };

    host_write_prp(&c.mem, sqe.prp1, sqe.prp2, c.state.cfg.page_size as u64, &page)
        .map_err(|_| StatusCode::DataXferError)
}
