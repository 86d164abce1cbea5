//! Vendor "AON" extension (spec.md §4.6): protection domains, storage tags,
//! namespace tags, dynamic namespace management, and error injection. Every
//! handler here requires `AdmConfig::use_aon`; the dispatcher enforces that
//! before any of these are reached.

use crate::controller::{MediaError, NsTag, Pd, STag};
use crate::error::StatusCode;
use crate::wire::{Cqe, Sqe};
use crate::Controller;
use crate::host::{host_read_prp, BackingStore, HostMemory};

const MAX_INJECTED_MEDIA_ERRORS: usize = 8;

fn alloc_slot<T: Default>(table: &mut [T], is_allocated: impl Fn(&T) -> bool) -> Option<usize> {
    (1..table.len()).find(|&i| !is_allocated(&table[i]))
}

pub fn create_pd<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
    cqe: &mut Cqe,
) -> Result<(), StatusCode> {
    let pdid = (sqe.cdw10 & 0xFFFF) as usize;
    if pdid == 0 || pdid > c.state.cfg.mnpd as usize {
        return Err(StatusCode::InvalidProtectionDomainIdentifier);
    }
    if c.state.pds[pdid].allocated {
        return Err(StatusCode::InvalidProtectionDomainIdentifier);
    }
    c.state.pds[pdid] = Pd {
        allocated: true,
        usage_count: 0,
    };
    cqe.cmd_specific = pdid as u32;
    Ok(())
}

pub fn delete_pd<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let pdid = (sqe.cdw10 & 0xFFFF) as usize;
    if pdid == 0 || pdid >= c.state.pds.len() || !c.state.pds[pdid].allocated {
        return Err(StatusCode::InvalidProtectionDomainIdentifier);
    }
    if c.state.pds[pdid].usage_count != 0 {
        return Err(StatusCode::InvalidField);
    }
    c.state.pds[pdid] = Pd::default();
    Ok(())
}

pub fn create_stag<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
    cqe: &mut Cqe,
) -> Result<(), StatusCode> {
    let pdid = (sqe.cdw10 & 0xFFFF) as u16;
    let rstag = (sqe.cdw10 >> 16) & 0x1 != 0;
    let smps = sqe.cdw12 as u8;
    let nmp = sqe.cdw13;

    if pdid != 0 && (pdid as usize >= c.state.pds.len() || !c.state.pds[pdid as usize].allocated) {
        return Err(StatusCode::InvalidProtectionDomainIdentifier);
    }
    if smps < c.state.cfg.smpsmin || smps > c.state.cfg.smpsmax {
        return Err(StatusCode::InvalidStag);
    }
    let smps_bytes = 1u64 << (smps as u32 + 12);

    if rstag {
        let idx = (sqe.cdw11 & 0xFFFF) as usize;
        if idx == 0 || idx >= c.state.stags.len() || !c.state.stags[idx].allocated {
            return Err(StatusCode::InvalidStag);
        }
        // Re-registering in place: same slot, no usage_count change.
        c.state.stags[idx] = STag {
            allocated: true,
            pdid: c.state.stags[idx].pdid,
            smps_bytes,
            prp: sqe.prp1,
            nmp,
        };
        cqe.cmd_specific = idx as u32;
        return Ok(());
    }

    let idx = alloc_slot(&mut c.state.stags, |t| t.allocated).ok_or(StatusCode::InvalidStag)?;
    c.state.stags[idx] = STag {
        allocated: true,
        pdid,
        smps_bytes,
        prp: sqe.prp1,
        nmp,
    };
    if pdid != 0 {
        c.state.pds[pdid as usize].usage_count += 1;
    }
    cqe.cmd_specific = idx as u32;
    Ok(())
}

pub fn delete_stag<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let id = (sqe.cdw10 & 0xFFFF) as usize;
    let pdid_arg = ((sqe.cdw10 >> 16) & 0xFFFF) as u16;
    if id == 0 || id >= c.state.stags.len() || !c.state.stags[id].allocated {
        return Err(StatusCode::InvalidStag);
    }
    let pdid = c.state.stags[id].pdid;
    if pdid != pdid_arg {
        return Err(StatusCode::InvalidProtectionDomainIdentifier);
    }
    if pdid != 0 {
        c.state.pds[pdid as usize].usage_count =
            c.state.pds[pdid as usize].usage_count.saturating_sub(1);
    }
    c.state.stags[id] = STag::default();
    Ok(())
}

pub fn create_ns_tag<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
    cqe: &mut Cqe,
) -> Result<(), StatusCode> {
    let pdid = (sqe.cdw10 & 0xFFFF) as u16;
    let at = (sqe.cdw11 & 0xFF) as u8;
    let nsid = sqe.nsid;

    if pdid != 0 && (pdid as usize >= c.state.pds.len() || !c.state.pds[pdid as usize].allocated) {
        return Err(StatusCode::InvalidProtectionDomainIdentifier);
    }
    if nsid == 0 || nsid > c.state.cfg.nsmax || c.state.disks[nsid as usize].is_none() {
        return Err(StatusCode::InvalidNamespaceTag);
    }

    let idx = alloc_slot(&mut c.state.nstags, |t| t.allocated)
        .ok_or(StatusCode::InvalidNamespaceTag)?;
    c.state.nstags[idx] = NsTag {
        allocated: true,
        pdid,
        at,
        nsid,
    };
    if pdid != 0 {
        c.state.pds[pdid as usize].usage_count += 1;
    }
    cqe.cmd_specific = idx as u32;
    Ok(())
}

pub fn delete_ns_tag<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let id = (sqe.cdw10 & 0xFFFF) as usize;
    if id == 0 || id >= c.state.nstags.len() || !c.state.nstags[id].allocated {
        return Err(StatusCode::InvalidNamespaceTag);
    }
    let pdid = c.state.nstags[id].pdid;
    if pdid != 0 {
        c.state.pds[pdid as usize].usage_count =
            c.state.pds[pdid as usize].usage_count.saturating_sub(1);
    }
    c.state.nstags[id] = NsTag::default();
    Ok(())
}

/// `CREATE_NAMESPACE`: the host supplies a namespace-identify-shaped payload
/// (the same layout `IDENTIFY` itself writes back) by PRP rather than by
/// scalar cdw fields; `nlbaf`/`lbaf[]` are always taken from the controller's
/// own defaults, never from the host buffer. The block size for the new
/// namespace is still taken from `cdw12` — the payload layout used here has
/// no dedicated block-size field, matching how `FORMAT_NVM` separately
/// selects block size via an lbaf index.
pub fn create_namespace<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let nsid = sqe.nsid;
    if nsid == 0 || nsid > c.state.cfg.nsmax {
        return Err(StatusCode::InvalidNamespace);
    }
    if c.state.disks[nsid as usize].is_some() {
        return Err(StatusCode::InvalidNamespace);
    }
    if sqe.prp1 == 0 {
        return Err(StatusCode::InvalidField);
    }

    let mut payload = [0u8; 4096];
    host_read_prp(&c.mem, sqe.prp1, sqe.prp2, c.state.cfg.page_size as u64, &mut payload)
        .map_err(|_| StatusCode::DataXferError)?;

    let nsze = u64::from_le_bytes(payload[0..8].try_into().unwrap());
    let ncap = u64::from_le_bytes(payload[8..16].try_into().unwrap());
    let mc = payload[27];
    let dpc = payload[28];
    let dps = payload[29];

    if nsze == 0 {
        return Err(StatusCode::InvalidNamespaceSize);
    }
    if ncap != nsze {
        return Err(StatusCode::InvalidNamespaceSize);
    }
    if dpc > 0x7 {
        return Err(StatusCode::InvalidE2eDataProtectionConfiguration);
    }

    let block_size = sqe.cdw12;
    let capacity = nsze.saturating_mul(block_size as u64);
    let min_capacity = 1u64 << c.state.cfg.mns;
    if capacity < min_capacity || capacity > c.state.available_space {
        return Err(StatusCode::InvalidNamespaceCapacity);
    }

    c.store.open(nsid, capacity).map_err(|_| StatusCode::Internal)?;
    c.state.allocate_disk(nsid, nsze, block_size, mc, dpc, dps);
    c.state.available_space -= capacity;
    Ok(())
}

pub fn delete_namespace<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let nsid = sqe.nsid;
    if nsid == 0 || nsid > c.state.cfg.nsmax || c.state.disks[nsid as usize].is_none() {
        return Err(StatusCode::InvalidNamespace);
    }
    let disk = c.state.disks[nsid as usize].as_ref().unwrap();
    let block_size = 1u64 << disk.idtfy_ns.lbaf[0].lbads.max(9);
    let capacity = disk.idtfy_ns.ncap * block_size;

    c.store.close(nsid).map_err(|_| StatusCode::Internal)?;
    c.state.free_disk(nsid);
    c.state.available_space += capacity;
    Ok(())
}

pub fn modify_namespace<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let nsid = sqe.nsid;
    if nsid == 0 || nsid > c.state.cfg.nsmax || c.state.disks[nsid as usize].is_none() {
        return Err(StatusCode::InvalidNamespace);
    }

    let new_nsze = (sqe.cdw10 as u64) | ((sqe.cdw11 as u64) << 32);
    if new_nsze == 0 {
        return Err(StatusCode::InvalidNamespaceSize);
    }

    let block_size = {
        let disk = c.state.disks[nsid as usize].as_ref().unwrap();
        1u64 << disk.idtfy_ns.lbaf[0].lbads.max(9)
    };
    let old_nsze = c.state.disks[nsid as usize].as_ref().unwrap().idtfy_ns.nsze;
    let old_capacity = old_nsze * block_size;
    let new_capacity = new_nsze.saturating_mul(block_size);

    if new_capacity > old_capacity {
        let delta = new_capacity - old_capacity;
        if delta > c.state.available_space {
            return Err(StatusCode::InvalidNamespaceCapacity);
        }
        c.state.available_space -= delta;
    } else {
        c.state.available_space += old_capacity - new_capacity;
    }

    c.store
        .fallocate(nsid, new_capacity)
        .map_err(|_| StatusCode::Internal)?;

    let disk = c.state.disks[nsid as usize].as_mut().unwrap();
    disk.idtfy_ns.nsze = new_nsze;
    disk.idtfy_ns.ncap = new_nsze;
    disk.ns_util.resize(new_nsze as usize, false);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InjectKind {
    Clear,
    Spare,
    Temp,
    Wear,
    Media,
    Timeout,
}

impl InjectKind {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => InjectKind::Clear,
            1 => InjectKind::Spare,
            2 => InjectKind::Temp,
            3 => InjectKind::Wear,
            4 => InjectKind::Media,
            5 => InjectKind::Timeout,
            _ => return None,
        })
    }
}

pub fn inject_error<M: HostMemory, B: BackingStore>(
    c: &mut Controller<M, B>,
    sqe: &Sqe,
) -> Result<(), StatusCode> {
    let kind = InjectKind::from_u32(sqe.cdw10).ok_or(StatusCode::InvalidField)?;

    match kind {
        InjectKind::Clear => {
            c.state.injected_spare = None;
            c.state.injected_media_errors.clear();
            c.state.injected_timeout = false;
            c.state.temp_warn_issued = false;
        }
        InjectKind::Spare => {
            c.state.injected_spare = Some((sqe.cdw11 & 0xFF) as u8);
        }
        InjectKind::Temp => {
            c.state.temperature = sqe.cdw11;
        }
        InjectKind::Wear => {
            c.state.percentage_used = (sqe.cdw11 & 0xFF) as u8;
        }
        InjectKind::Media => {
            if c.state.injected_media_errors.len() >= MAX_INJECTED_MEDIA_ERRORS {
                return Err(StatusCode::InvalidField);
            }
            c.state.injected_media_errors.push(MediaError {
                slba: sqe.cdw11 as u64,
                elba: sqe.cdw12 as u64,
                io_error: sqe.cdw13,
            });
        }
        InjectKind::Timeout => {
            c.state.injected_timeout = sqe.cdw11 != 0;
        }
    }
    Ok(())
}
