//! Host-memory DMA and namespace/firmware backing-store collaborators.
//!
//! Grounded in the hypervisor's own `PhysicalMemory` abstraction
//! (`read_bytes`/`write_bytes` at a `PhysAddr`) but narrowed to the fallible,
//! `Result`-returning shape this crate needs: a real PCIe front-end can hand
//! us a guest address that points outside mapped RAM, and that must come
//! back as a `HostError`, not a panic.

use crate::error::HostError;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

/// Guest physical memory access used for admin-queue DMA.
pub trait HostMemory {
    fn host_read(&self, addr: u64, buf: &mut [u8]) -> Result<(), HostError>;
    fn host_write(&self, addr: u64, buf: &[u8]) -> Result<(), HostError>;
}

/// Per-namespace and firmware backing-store interface. Namespace ids use 0
/// to mean "the firmware image" so a single backend can serve both; the
/// vendor-extension firmware path in this crate only ever calls
/// `pwrite`/`pread`/`fallocate` against whichever id it is handed.
pub trait BackingStore {
    fn open(&mut self, nsid: u32, size_bytes: u64) -> Result<(), HostError>;
    fn close(&mut self, nsid: u32) -> Result<(), HostError>;
    fn fallocate(&mut self, nsid: u32, size_bytes: u64) -> Result<(), HostError>;
    fn pwrite(&mut self, nsid: u32, offset: u64, buf: &[u8]) -> Result<(), HostError>;
    fn pread(&mut self, nsid: u32, offset: u64, buf: &mut [u8]) -> Result<(), HostError>;
    /// Raw bytes currently on disk, used by `ACTIVATE_FW`'s hash stamp.
    fn contents(&self, nsid: u32) -> Result<Vec<u8>, HostError>;
}

/// PRP (Physical Region Page) walker: given `prp1`, `prp2`, the controller
/// page size and a transfer length, yields `(host_addr, len)` segments in
/// order. One iterator implementation is shared by identify, log pages, the
/// LBA-range-type feature, and firmware download, per the controller's
/// "one walker, many consumers" design.
enum PrpState {
    /// Next call emits the prp1 segment.
    First,
    /// Next call emits a single trailing page addressed directly by prp2.
    Prp2Direct,
    /// Next call reads list entry at this address and emits it as a segment.
    /// Entry index 511 of each 4K list page instead chains to another list.
    PrpList(u64),
    Done,
}

pub struct PrpIterator<'a, M: HostMemory + ?Sized> {
    mem: &'a M,
    page_size: u64,
    remaining: usize,
    prp1: u64,
    prp2: u64,
    state: PrpState,
}

impl<'a, M: HostMemory + ?Sized> PrpIterator<'a, M> {
    pub fn new(mem: &'a M, prp1: u64, prp2: u64, page_size: u64, len: usize) -> Self {
        Self {
            mem,
            page_size,
            remaining: len,
            prp1,
            prp2,
            state: if len == 0 { PrpState::Done } else { PrpState::First },
        }
    }

    fn read_list_entry(&self, addr: u64) -> Result<u64, HostError> {
        let mut buf = [0u8; 8];
        self.mem.host_read(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<'a, M: HostMemory + ?Sized> Iterator for PrpIterator<'a, M> {
    type Item = Result<(u64, usize), HostError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            PrpState::Done => None,
            PrpState::First => {
                let page_off = self.prp1 % self.page_size;
                let len1 =
                    std::cmp::min(self.page_size - page_off, self.remaining as u64) as usize;
                self.remaining -= len1;

                self.state = if self.remaining == 0 {
                    PrpState::Done
                } else if self.remaining as u64 <= self.page_size {
                    PrpState::Prp2Direct
                } else {
                    PrpState::PrpList(self.prp2)
                };
                Some(Ok((self.prp1, len1)))
            }
            PrpState::Prp2Direct => {
                let len = std::cmp::min(self.page_size, self.remaining as u64) as usize;
                self.remaining -= len;
                self.state = PrpState::Done;
                Some(Ok((self.prp2, len)))
            }
            PrpState::PrpList(mut list_addr) => {
                let entries_per_page = self.page_size / 8;
                loop {
                    let slot = (list_addr / 8) % entries_per_page;
                    // Index 511 is a chain pointer to the next list page,
                    // but only when this page alone can't cover what's left.
                    let is_chain_slot =
                        slot == entries_per_page - 1 && self.remaining as u64 > self.page_size;

                    let entry = match self.read_list_entry(list_addr) {
                        Ok(v) => v,
                        Err(e) => {
                            self.state = PrpState::Done;
                            return Some(Err(e));
                        }
                    };

                    if is_chain_slot {
                        list_addr = entry;
                        continue;
                    }

                    let len = std::cmp::min(self.page_size, self.remaining as u64) as usize;
                    self.remaining -= len;

                    self.state = if self.remaining == 0 {
                        PrpState::Done
                    } else {
                        PrpState::PrpList(list_addr + 8)
                    };

                    return Some(Ok((entry, len)));
                }
            }
        }
    }
}

/// Copies `len` bytes from host memory starting at `prp1`/`prp2` into `buf`.
pub fn host_read_prp<M: HostMemory + ?Sized>(
    mem: &M,
    prp1: u64,
    prp2: u64,
    page_size: u64,
    buf: &mut [u8],
) -> Result<(), HostError> {
    let mut off = 0usize;
    for seg in PrpIterator::new(mem, prp1, prp2, page_size, buf.len()) {
        let (addr, len) = seg?;
        mem.host_read(addr, &mut buf[off..off + len])?;
        off += len;
    }
    Ok(())
}

/// Copies `buf` into host memory starting at `prp1`/`prp2`.
pub fn host_write_prp<M: HostMemory + ?Sized>(
    mem: &M,
    prp1: u64,
    prp2: u64,
    page_size: u64,
    buf: &[u8],
) -> Result<(), HostError> {
    let mut off = 0usize;
    for seg in PrpIterator::new(mem, prp1, prp2, page_size, buf.len()) {
        let (addr, len) = seg?;
        mem.host_write(addr, &buf[off..off + len])?;
        off += len;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory host memory (tests / the CLI harness)
// ---------------------------------------------------------------------------

/// A flat byte array standing in for guest physical memory.
pub struct FlatHostMemory {
    ram: std::cell::RefCell<Vec<u8>>,
}

impl FlatHostMemory {
    pub fn new(size: usize) -> Self {
        Self {
            ram: std::cell::RefCell::new(vec![0u8; size]),
        }
    }
}

impl HostMemory for FlatHostMemory {
    fn host_read(&self, addr: u64, buf: &mut [u8]) -> Result<(), HostError> {
        let ram = self.ram.borrow();
        let start = addr as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&e| e <= ram.len())
            .ok_or(HostError::OutOfBounds {
                addr,
                len: buf.len(),
            })?;
        buf.copy_from_slice(&ram[start..end]);
        Ok(())
    }

    fn host_write(&self, addr: u64, buf: &[u8]) -> Result<(), HostError> {
        let mut ram = self.ram.borrow_mut();
        let start = addr as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&e| e <= ram.len())
            .ok_or(HostError::OutOfBounds {
                addr,
                len: buf.len(),
            })?;
        ram[start..end].copy_from_slice(buf);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backing stores
// ---------------------------------------------------------------------------

/// An in-memory backing store, used by tests and the CLI harness in place of
/// real disk-backed namespaces.
#[derive(Default)]
pub struct MemBackingStore {
    files: HashMap<u32, Vec<u8>>,
}

impl BackingStore for MemBackingStore {
    fn open(&mut self, nsid: u32, size_bytes: u64) -> Result<(), HostError> {
        self.files
            .entry(nsid)
            .or_insert_with(|| vec![0u8; size_bytes as usize]);
        Ok(())
    }

    fn close(&mut self, nsid: u32) -> Result<(), HostError> {
        self.files.remove(&nsid);
        Ok(())
    }

    fn fallocate(&mut self, nsid: u32, size_bytes: u64) -> Result<(), HostError> {
        let buf = self.files.entry(nsid).or_default();
        buf.resize(size_bytes as usize, 0);
        Ok(())
    }

    fn pwrite(&mut self, nsid: u32, offset: u64, buf: &[u8]) -> Result<(), HostError> {
        let file = self.files.get_mut(&nsid).ok_or(HostError::NotOpen(nsid))?;
        let end = offset as usize + buf.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn pread(&mut self, nsid: u32, offset: u64, buf: &mut [u8]) -> Result<(), HostError> {
        let file = self.files.get(&nsid).ok_or(HostError::NotOpen(nsid))?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > file.len() {
            return Err(HostError::Io {
                nsid,
                source: io::Error::new(io::ErrorKind::UnexpectedEof, "read past end"),
            });
        }
        buf.copy_from_slice(&file[start..end]);
        Ok(())
    }

    fn contents(&self, nsid: u32) -> Result<Vec<u8>, HostError> {
        self.files
            .get(&nsid)
            .cloned()
            .ok_or(HostError::NotOpen(nsid))
    }
}

/// A real, file-backed store: one regular file per namespace id underneath
/// `root`, opened with `pwrite`/`pread` via `FileExt`, resized with
/// `posix_fallocate`.
pub struct FileBackingStore {
    root: PathBuf,
    files: HashMap<u32, File>,
}

impl FileBackingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: HashMap::new(),
        }
    }

    fn path_for(&self, nsid: u32) -> PathBuf {
        self.root.join(format!("ns{nsid}.img"))
    }

    fn file(&self, nsid: u32) -> Result<&File, HostError> {
        self.files.get(&nsid).ok_or(HostError::NotOpen(nsid))
    }
}

impl BackingStore for FileBackingStore {
    fn open(&mut self, nsid: u32, size_bytes: u64) -> Result<(), HostError> {
        let path = self.path_for(nsid);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| HostError::Io { nsid, source: e })?;
        file.set_len(size_bytes)
            .map_err(|e| HostError::Io { nsid, source: e })?;
        self.files.insert(nsid, file);
        Ok(())
    }

    fn close(&mut self, nsid: u32) -> Result<(), HostError> {
        self.files.remove(&nsid);
        Ok(())
    }

    fn fallocate(&mut self, nsid: u32, size_bytes: u64) -> Result<(), HostError> {
        let file = self.file(nsid)?;
        let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size_bytes as libc::off_t) };
        if rc != 0 {
            return Err(HostError::Io {
                nsid,
                source: io::Error::from_raw_os_error(rc),
            });
        }
        Ok(())
    }

    fn pwrite(&mut self, nsid: u32, offset: u64, buf: &[u8]) -> Result<(), HostError> {
        let file = self.file(nsid)?;
        file.write_all_at(buf, offset)
            .map_err(|e| HostError::Io { nsid, source: e })
    }

    fn pread(&mut self, nsid: u32, offset: u64, buf: &mut [u8]) -> Result<(), HostError> {
        let file = self.file(nsid)?;
        file.read_exact_at(buf, offset)
            .map_err(|e| HostError::Io { nsid, source: e })
    }

    fn contents(&self, nsid: u32) -> Result<Vec<u8>, HostError> {
        let file = self.file(nsid)?;
        let len = file
            .metadata()
            .map_err(|e| HostError::Io { nsid, source: e })?
            .len();
        let mut buf = vec![0u8; len as usize];
        file.read_exact_at(&mut buf, 0)
            .map_err(|e| HostError::Io { nsid, source: e })?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_transfer_uses_only_prp1() {
        let mem = FlatHostMemory::new(16 * 1024);
        mem.host_write(0x1000, &[7u8; 64]).unwrap();
        let mut out = [0u8; 64];
        host_read_prp(&mem, 0x1000, 0, 4096, &mut out).unwrap();
        assert_eq!(out, [7u8; 64]);
    }

    #[test]
    fn two_page_transfer_uses_prp2_as_second_page() {
        let mem = FlatHostMemory::new(3 * 4096);
        let mut pattern = vec![0u8; 4096 + 100];
        for (i, b) in pattern.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        mem.host_write(0, &pattern).unwrap();
        let mut out = vec![0u8; pattern.len()];
        host_read_prp(&mem, 0, 4096, 4096, &mut out).unwrap();
        assert_eq!(out, pattern);
    }

    #[test]
    fn mem_backing_store_round_trips() {
        let mut bs = MemBackingStore::default();
        bs.open(1, 4096).unwrap();
        bs.pwrite(1, 0, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        bs.pread(1, 0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn file_backing_store_round_trips_and_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut bs = FileBackingStore::new(dir.path());
        bs.open(1, 4096).unwrap();
        bs.pwrite(1, 0, &[9, 8, 7, 6]).unwrap();

        let mut buf = [0u8; 4];
        bs.pread(1, 0, &mut buf).unwrap();
        assert_eq!(buf, [9, 8, 7, 6]);

        bs.fallocate(1, 8192).unwrap();
        assert_eq!(bs.contents(1).unwrap().len(), 8192);

        bs.close(1).unwrap();
        assert!(matches!(bs.pread(1, 0, &mut buf), Err(HostError::NotOpen(1))));
    }
}
