//! DOWNLOAD_FW / ACTIVATE_FW / FORMAT_NVM (spec.md §4.6).
//!
//! Firmware images live in the backing store under namespace id 0, which no
//! real namespace ever occupies (`AdmConfig::nsmax` numbers namespaces from
//! 1). `ACTIVATE_FW` stamps the newly active slot with a DJB2 hash of the
//! image so two activations of the same bytes are indistinguishable in the
//! firmware-slot log, matching the original source's slot-stamping scheme
//! (spec.md §10).

use crate::controller::Lbaf;
use crate::error::StatusCode;
use crate::host::{host_read_prp, BackingStore, HostMemory};
use crate::wire::Sqe;
use crate::Controller;

const FW_IMAGE_NSID: u32 = 0;
const DJB2_SEED: u32 = 5381;

fn djb2(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(DJB2_SEED, |hash, &b| hash.wrapping_mul(33).wrapping_add(b as u32))
}

pub fn download_fw<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let numd = sqe.cdw10 as u64;
    let offset_dw = sqe.cdw11 as u64;
    let len = ((numd + 1) * 4) as usize;
    let offset = offset_dw * 4;

    let mut payload = vec![0u8; len];
    host_read_prp(&c.mem, sqe.prp1, sqe.prp2, c.state.cfg.page_size as u64, &mut payload)
        .map_err(|_| StatusCode::DataXferError)?;

    c.store
        .open(FW_IMAGE_NSID, offset + len as u64)
        .map_err(|_| StatusCode::Internal)?;
    c.store
        .pwrite(FW_IMAGE_NSID, offset, &payload)
        .map_err(|_| StatusCode::Internal)
}

/// Picks the slot an activation lands in: the requested slot when
/// `cdw10.slot` names one, else the lowest empty slot, else (all seven
/// full) the next slot after `last_fw_slot`, wrapping around.
fn select_fw_slot<M: HostMemory, B: BackingStore>(c: &Controller<M, B>, requested: usize) -> usize {
    if (1..=7).contains(&requested) {
        return requested;
    }
    for slot in 1..=7 {
        if c.state.fw_slot_log[slot].is_empty() {
            return slot;
        }
    }
    (c.state.last_fw_slot % 7) + 1
}

pub fn activate_fw<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let requested = (sqe.cdw10 & 0x7) as usize;
    let fs = select_fw_slot(c, requested);

    let contents = c.store.contents(FW_IMAGE_NSID).map_err(|_| StatusCode::Internal)?;
    let hash = djb2(&contents);
    let revision = format!("{hash:08x}");

    c.state.fw_slot_log[fs] = revision.clone();
    c.state.last_fw_slot = c.state.active_fw_slot;
    c.state.active_fw_slot = fs;
    c.state.firmware_revision = revision;
    Ok(())
}

pub fn format_nvm<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let nsid = sqe.nsid;
    if nsid == 0 || nsid > c.state.cfg.nsmax || c.state.disks[nsid as usize].is_none() {
        return Err(StatusCode::InvalidNamespace);
    }

    let lbaf_idx = (sqe.cdw10 & 0xF) as usize;
    let meta_loc = ((sqe.cdw10 >> 4) & 0x1) as u8;
    let pi = ((sqe.cdw10 >> 5) & 0x7) as u8;
    let pil = ((sqe.cdw10 >> 8) & 0x1) as u8;

    let disk = c.state.disks[nsid as usize].as_ref().unwrap();
    if lbaf_idx > disk.idtfy_ns.nlbaf as usize {
        return Err(StatusCode::InvalidFormat);
    }
    if pi != 0 && (disk.idtfy_ns.dpc >> (pi - 1)) & 1 == 0 {
        return Err(StatusCode::InvalidFormat);
    }
    let target_ms = disk.idtfy_ns.lbaf.get(lbaf_idx).map(|l| l.ms).unwrap_or(0);
    if target_ms > 0 && (disk.idtfy_ns.mc >> meta_loc) & 1 == 0 {
        return Err(StatusCode::InvalidFormat);
    }

    let old_lbads = disk.idtfy_ns.lbaf[0].lbads;
    let old_block_size = 1u64 << old_lbads.max(9);
    let old_total_bytes = disk.idtfy_ns.nsze * old_block_size;
    let new_lbads = disk
        .idtfy_ns
        .lbaf
        .get(lbaf_idx)
        .copied()
        .unwrap_or(Lbaf::default())
        .lbads
        .max(9);
    let new_block_size = 1u64 << new_lbads;
    let new_nsze = old_total_bytes / new_block_size;

    c.store.close(nsid).map_err(|_| StatusCode::Internal)?;
    c.store
        .open(nsid, new_nsze * new_block_size)
        .map_err(|_| StatusCode::Internal)?;

    let disk = c.state.disks[nsid as usize].as_mut().unwrap();
    disk.idtfy_ns.nsze = new_nsze;
    disk.idtfy_ns.ncap = new_nsze;
    disk.idtfy_ns.nuse = 0;
    disk.idtfy_ns.flbas = lbaf_idx as u8;
    disk.idtfy_ns.dps = pi | (pil << 3);
    disk.ns_util = vec![false; new_nsze as usize];
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_controller;
    use crate::host::HostMemory as _;

    #[test]
    fn download_then_activate_stamps_slot_log() {
        let mut c = test_controller();
        let image = vec![0xABu8; 64];
        c.mem.host_write(0x1000, &image).unwrap();

        let mut sqe = Sqe::default();
        sqe.cdw10 = (64 / 4) - 1; // numd
        sqe.cdw11 = 0; // offset
        sqe.prp1 = 0x1000;
        download_fw(&mut c, &sqe).unwrap();

        let mut act = Sqe::default();
        act.cdw10 = 2; // slot 2
        activate_fw(&mut c, &act).unwrap();

        assert_eq!(c.state.active_fw_slot, 2);
        assert_eq!(c.state.last_fw_slot, 1);
        assert_eq!(djb2(&image), djb2(&c.store.contents(0).unwrap()));
        assert!(!c.state.fw_slot_log[2].is_empty());
    }

    #[test]
    fn activate_fw_slot_zero_auto_selects_lowest_empty() {
        let mut c = test_controller();
        let mut sqe = Sqe::default();
        sqe.cdw10 = 0;
        activate_fw(&mut c, &sqe).unwrap();
        assert_eq!(c.state.active_fw_slot, 1);
    }

    #[test]
    fn format_nvm_resets_namespace() {
        let mut c = test_controller();
        c.state.allocate_disk(1, 100, 512, 0, 0, 0);
        c.state.disks[1].as_mut().unwrap().ns_util[5] = true;

        let mut sqe = Sqe::default();
        sqe.nsid = 1;
        sqe.cdw10 = 0;
        format_nvm(&mut c, &sqe).unwrap();

        assert!(!c.state.disks[1].as_ref().unwrap().ns_util[5]);
    }

    #[test]
    fn format_nvm_unknown_namespace_rejected() {
        let mut c = test_controller();
        let mut sqe = Sqe::default();
        sqe.nsid = 9;
        assert_eq!(format_nvm(&mut c, &sqe).unwrap_err(), StatusCode::InvalidNamespace);
    }
}
