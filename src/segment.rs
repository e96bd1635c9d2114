//! [`FileSegmentReader`]: maps `(virtual_addr, phys_addr, size)` ranges to
//! `(fd, file_offset)` and serves byte reads via `pread`. One [`FileSegment`]
//! is registered per `PT_LOAD` phdr (core dump) or per live-process mapping
//! (`/proc/<pid>/mem`).

use crate::error::{Error, Result};
use std::os::fd::RawFd;

pub const U64_MAX: u64 = u64::MAX;

/// One `PT_LOAD`-equivalent range, served entirely from `fd`.
///
/// `phys_addr == U64_MAX` means "no valid physical address" — used when the
/// core lacks physical-address info (any `PT_LOAD`'s `p_paddr` is zero).
#[derive(Debug, Clone, Copy)]
pub struct FileSegment {
    pub virtual_addr: u64,
    pub phys_addr: u64,
    pub size: u64,
    pub fd: RawFd,
    pub file_offset: u64,
    pub file_size: u64,
}

impl FileSegment {
    fn contains_virtual(&self, addr: u64) -> bool {
        addr >= self.virtual_addr && addr < self.virtual_addr.saturating_add(self.size)
    }

    fn contains_physical(&self, addr: u64) -> bool {
        self.phys_addr != U64_MAX
            && addr >= self.phys_addr
            && addr < self.phys_addr.saturating_add(self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Virtual,
    Physical,
}

#[derive(Debug, Default)]
pub struct FileSegmentReader {
    segments: Vec<FileSegment>,
}

impl FileSegmentReader {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn register(&mut self, segment: FileSegment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[FileSegment] {
        &self.segments
    }

    fn find(&self, space: AddressSpace, addr: u64) -> Option<&FileSegment> {
        self.segments.iter().find(|s| match space {
            AddressSpace::Virtual => s.contains_virtual(addr),
            AddressSpace::Physical => s.contains_physical(addr),
        })
    }

    /// Reads `buf.len()` bytes starting at `addr` in the given address
    /// space, trusting the matching segment's `fd`/`file_offset`.
    pub fn read(&self, space: AddressSpace, addr: u64, buf: &mut [u8]) -> Result<()> {
        let segment = self
            .find(space, addr)
            .ok_or_else(|| Error::lookup(format!("no mapped segment covers address 0x{addr:x}")))?;

        let base = match space {
            AddressSpace::Virtual => segment.virtual_addr,
            AddressSpace::Physical => segment.phys_addr,
        };
        let file_offset = segment.file_offset + (addr - base);

        nix::sys::uio::pread(segment.fd, buf, file_offset as i64)
            .map_err(|errno| Error::os(format!("pread at file offset 0x{file_offset:x}"), errno.into()))
            .and_then(|n| {
                if n == buf.len() {
                    Ok(())
                } else {
                    Err(Error::other(format!(
                        "short read: wanted {} bytes, got {n}",
                        buf.len()
                    )))
                }
            })
    }

    pub fn read_u64(&self, space: AddressSpace, addr: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(space, addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_c_string(&self, addr: u64, max_len: usize) -> Result<String> {
        let mut out = Vec::new();
        let mut cur = addr;
        let mut chunk = [0u8; 64];
        while out.len() < max_len {
            self.read(AddressSpace::Virtual, cur, &mut chunk)?;
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return std::str::from_utf8(&out)
                    .map(|s| s.to_owned())
                    .map_err(|e| Error::other(format!("invalid UTF-8 C string: {e}")));
            }
            out.extend_from_slice(&chunk);
            cur += chunk.len() as u64;
        }
        Err(Error::overflow(format!(
            "C string at 0x{addr:x} exceeds {max_len} bytes without a NUL"
        )))
    }
}
