//! [`VmcoreInfo`] and the three-source resolver that fills it in: an
//! embedded `VMCOREINFO` note, `/sys/kernel/vmcoreinfo`, or a kallsyms +
//! vmlinux `.symtab` fallback.

use crate::error::{Error, Result};
use crate::note::{parse_vmcoreinfo_text, VmcoreinfoFields};
use crate::segment::{AddressSpace, FileSegmentReader};
use crate::{debug_file, kallsyms};
use object::{Object, ObjectSymbol};
use std::os::fd::RawFd;
use std::path::Path;

/// `fstatfs().f_type` for `/proc`, used to recognize `/proc/kcore`.
pub const PROC_SUPER_MAGIC: i64 = 0x9fa0;

#[derive(Debug, Clone, Default)]
pub struct VmcoreInfo {
    pub osrelease: String,
    pub kaslr_offset: u64,
}

/// True when `fd`'s filesystem is `proc` (`fstatfs` magic `0x9fa0`). Part of
/// the `/proc/kcore` detection rule: no VMCOREINFO note, but
/// `NT_TASKSTRUCT` present and the source file lives on procfs.
pub fn is_proc_superblock(fd: RawFd) -> Result<bool> {
    let stat = nix::sys::statfs::fstatfs(&unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) })
        .map_err(|e| Error::os("fstatfs", e.into()))?;
    Ok(i64::from(stat.filesystem_type().0) == PROC_SUPER_MAGIC)
}

pub struct VmcoreinfoResolver;

impl VmcoreinfoResolver {
    /// Source 1: an embedded `VMCOREINFO` note, already parsed by the phdr
    /// walker. Preferred whenever present.
    pub fn from_embedded(fields: VmcoreinfoFields) -> Result<VmcoreInfo> {
        let osrelease = fields
            .osrelease
            .ok_or_else(|| Error::invalid_argument("VMCOREINFO note has no OSRELEASE"))?;
        Ok(VmcoreInfo {
            osrelease,
            kaslr_offset: fields.kaslr_offset.unwrap_or(0),
        })
    }

    /// Source 2: `/sys/kernel/vmcoreinfo`. Used for `/proc/kcore` when the
    /// core exposes physical addresses (kernels new enough to export them).
    ///
    /// The sysfs file holds `<hex address> <hex size>`; that many bytes are
    /// then read from the reader's *physical* address space and must begin
    /// with an `Elf64_Nhdr` whose name is the 11-byte (NUL-included)
    /// literal `"VMCOREINFO"`. The note descriptor starts at byte 24 (a
    /// 12-byte header plus the name padded up to the next 4-byte boundary).
    pub fn from_sysfs(reader: &FileSegmentReader, endian: object::Endianness) -> Result<VmcoreInfo> {
        let text = std::fs::read_to_string("/sys/kernel/vmcoreinfo")
            .map_err(|e| Error::os("reading /sys/kernel/vmcoreinfo", e))?;
        let mut fields = text.split_whitespace();
        let (Some(address_str), Some(size_str)) = (fields.next(), fields.next()) else {
            return Err(Error::other("/sys/kernel/vmcoreinfo: malformed content"));
        };
        let address = u64::from_str_radix(address_str.trim_start_matches("0x"), 16)
            .map_err(|_| Error::other("/sys/kernel/vmcoreinfo: bad address"))?;
        let size = u64::from_str_radix(size_str.trim_start_matches("0x"), 16)
            .map_err(|_| Error::other("/sys/kernel/vmcoreinfo: bad size"))?;

        let mut note = vec![0u8; size as usize];
        reader.read(AddressSpace::Physical, address, &mut note)?;

        const HEADER_LEN: usize = 12;
        const NAME_LEN: usize = 11; // "VMCOREINFO\0"
        const NAME_PADDED: usize = 12; // rounded up to 4-byte alignment
        const DESC_OFFSET: usize = HEADER_LEN + NAME_PADDED;

        if note.len() < DESC_OFFSET {
            return Err(Error::elf_format("VMCOREINFO note in sysfs is truncated"));
        }
        let namesz_bytes: [u8; 4] = note[0..4].try_into().unwrap();
        let namesz = match endian {
            object::Endianness::Little => u32::from_le_bytes(namesz_bytes),
            object::Endianness::Big => u32::from_be_bytes(namesz_bytes),
        } as usize;
        if namesz != NAME_LEN {
            return Err(Error::elf_format(format!(
                "VMCOREINFO note has unexpected n_namesz {namesz}"
            )));
        }
        let name = &note[HEADER_LEN..HEADER_LEN + NAME_LEN];
        if name != b"VMCOREINFO\0" {
            return Err(Error::elf_format("VMCOREINFO note has unexpected name"));
        }

        let mut extracted = VmcoreinfoFields::default();
        parse_vmcoreinfo_text(&note[DESC_OFFSET..], &mut extracted)?;
        Self::from_embedded(extracted)
    }

    /// Source 3: kallsyms fallback, used when `/proc/kcore` lacks both a
    /// VMCOREINFO note and physical-address info. `osrelease` comes from
    /// `uname`; `kaslr_offset` is the live `_stext` address from
    /// `/proc/kallsyms` minus its static address in vmlinux's `.symtab`.
    pub fn from_kallsyms_fallback() -> Result<VmcoreInfo> {
        let osrelease = kallsyms::osrelease()?;
        let live_stext = kallsyms::find_symbol(Path::new("/proc/kallsyms"), "_stext")?;

        let vmlinux_path = debug_file::find_vmlinux(&osrelease)?;
        let content = std::fs::read(&vmlinux_path)
            .map_err(|e| Error::os(format!("reading {}", vmlinux_path.display()), e))?;
        let object = object::File::parse(&*content)?;
        let static_stext = object
            .symbol_table()
            .into_iter()
            .flat_map(|table| table.symbols())
            .find(|s| s.name() == Ok("_stext"))
            .ok_or_else(|| Error::lookup("_stext not found in vmlinux .symtab"))?
            .address();

        Ok(VmcoreInfo {
            osrelease,
            kaslr_offset: live_stext.wrapping_sub(static_stext),
        })
    }
}
