//! [`Program`]: the root handle. Owns exactly one memory reader, one
//! mapping table, optional VMCOREINFO, a flags bitset, and the teardown
//! stack that releases them in reverse registration order regardless of
//! which bootstrap step failed.
//!
//! [`ProgramAssembler`] builds a `Program` from one of three sources: an
//! ELF core dump, the live kernel (`/proc/kcore`), or a live process
//! (`/proc/<pid>/mem`). Building the actual DWARF/type/symbol indices is
//! out of scope here — those are external collaborators this crate only
//! ever hands file paths and an `ObjectReader` capability to — so
//! `ProgramAssembler` stops at: open the target, build the memory map,
//! classify it, resolve VMCOREINFO if it's a kernel target, and locate
//! the debug ELF files a DWARF index would need.
//!
//! Bootstrap never slurps the whole source file into memory: `/proc/kcore`
//! reports a size spanning the entire kernel address range, so a bulk
//! read either tries to allocate terabytes or simply fails partway. Only
//! the ELF identification bytes, the program header table, and each
//! `PT_NOTE` segment's own bytes are read, each via a bounded `pread`;
//! `PT_LOAD` segments are registered by address/size and served lazily
//! through [`FileSegmentReader`] instead of being read up front.

use crate::cleanup::CleanupStack;
use crate::debug_file::{self, ModuleDiscovery};
use crate::error::{Error, Result};
use crate::mapping::MappingTable;
use crate::note::{self, ElfClass};
use crate::segment::{FileSegment, FileSegmentReader};
use crate::vmcoreinfo::{self, VmcoreInfo, VmcoreinfoResolver};
use object::read::elf::{FileHeader, NoteIterator, ProgramHeader};
use object::Endianness;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProgramFlags: u32 {
        const IS_LINUX_KERNEL = 1 << 0;
    }
}

/// Where `Program`'s debug ELF handles were located. A real DWARF index
/// would open and keep these; here we only record where bootstrap found
/// them, since opening/indexing DWARF itself is out of scope.
#[derive(Debug, Default)]
pub struct DebugFiles {
    pub vmlinux: Option<PathBuf>,
    pub modules: Vec<PathBuf>,
    /// Populated for userspace targets: `(path, content)` in the same
    /// order as [`MappingTable::FileMapping::elf`] keys.
    pub userspace_elfs: Vec<(PathBuf, Vec<u8>)>,
}

pub struct Program {
    pub reader: FileSegmentReader,
    pub mappings: MappingTable,
    pub vmcoreinfo: Option<VmcoreInfo>,
    pub flags: ProgramFlags,
    pub debug_files: DebugFiles,
    cleanup: CleanupStack,
}

impl Program {
    pub fn is_linux_kernel(&self) -> bool {
        self.flags.contains(ProgramFlags::IS_LINUX_KERNEL)
    }
}

/// Bookkeeping gathered while walking program headers: whether any
/// `PT_LOAD` carries a nonzero physical address, which notable `PT_NOTE`
/// entries were seen, and the file's parsed endianness (needed again
/// afterward to decode the sysfs VMCOREINFO path with the same byte order).
#[derive(Debug)]
struct PhdrSummary {
    have_non_zero_phys_addr: bool,
    have_vmcoreinfo: bool,
    have_nt_taskstruct: bool,
    endian: Endianness,
}

pub struct ProgramAssembler;

impl ProgramAssembler {
    pub fn from_kernel(verbose: bool) -> Result<Program> {
        Self::from_core_dump(Path::new("/proc/kcore"), verbose)
    }

    pub fn from_core_dump(path: &Path, verbose: bool) -> Result<Program> {
        let file = File::open(path).map_err(|e| Error::os(format!("opening {}", path.display()), e))?;
        let fd = file.as_raw_fd();

        let class = detect_class(fd, path)?;
        let mut reader = FileSegmentReader::new();
        let mut mappings = MappingTable::new();
        let mut vmcoreinfo_fields = note::VmcoreinfoFields::default();
        let summary = match class {
            ElfClass::Elf32 => walk::<object::elf::FileHeader32<Endianness>>(
                class, fd, &mut reader, &mut mappings, &mut vmcoreinfo_fields,
            )?,
            ElfClass::Elf64 => walk::<object::elf::FileHeader64<Endianness>>(
                class, fd, &mut reader, &mut mappings, &mut vmcoreinfo_fields,
            )?,
        };

        let mut cleanup = CleanupStack::new();
        cleanup.push(move || drop(file));

        let mut flags = ProgramFlags::empty();
        let mut vmcoreinfo = None;

        if summary.have_vmcoreinfo {
            flags.insert(ProgramFlags::IS_LINUX_KERNEL);
            vmcoreinfo = Some(VmcoreinfoResolver::from_embedded(vmcoreinfo_fields)?);
            // NT_FILE mappings are meaningless for a kernel target.
            mappings = MappingTable::new();
        } else if summary.have_nt_taskstruct && vmcoreinfo::is_proc_superblock(fd)? {
            flags.insert(ProgramFlags::IS_LINUX_KERNEL);
            mappings = MappingTable::new();
            vmcoreinfo = Some(if summary.have_non_zero_phys_addr {
                VmcoreinfoResolver::from_sysfs(&reader, summary.endian)?
            } else {
                VmcoreinfoResolver::from_kallsyms_fallback()?
            });
        } else if mappings.is_empty() {
            return Err(Error::invalid_argument(
                "userspace core has no NT_FILE mappings",
            ));
        }

        let debug_files = if flags.contains(ProgramFlags::IS_LINUX_KERNEL) {
            Self::locate_kernel_debug_files(&vmcoreinfo.as_ref().unwrap().osrelease, verbose)?
        } else {
            Self::locate_userspace_debug_files(&mut mappings)?
        };

        Ok(Program {
            reader,
            mappings,
            vmcoreinfo,
            flags,
            debug_files,
            cleanup,
        })
    }

    pub fn from_pid(pid: u32) -> Result<Program> {
        let mem_path = format!("/proc/{pid}/mem");
        let file = File::open(&mem_path).map_err(|e| Error::os(format!("opening {mem_path}"), e))?;
        let fd = file.as_raw_fd();

        let mut reader = FileSegmentReader::new();
        reader.register(FileSegment {
            virtual_addr: 0,
            phys_addr: crate::segment::U64_MAX,
            size: u64::MAX,
            fd,
            file_offset: 0,
            file_size: u64::MAX,
        });

        let maps_path = format!("/proc/{pid}/maps");
        let maps_text = std::fs::read_to_string(&maps_path)
            .map_err(|e| Error::os(format!("reading {maps_path}"), e))?;
        let mut mappings = MappingTable::new();
        crate::proc_maps::parse_proc_maps(&maps_text, &mut mappings)?;

        let mut cleanup = CleanupStack::new();
        cleanup.push(move || drop(file));

        let debug_files = Self::locate_userspace_debug_files(&mut mappings)?;

        Ok(Program {
            reader,
            mappings,
            vmcoreinfo: None,
            flags: ProgramFlags::empty(),
            debug_files,
            cleanup,
        })
    }

    fn locate_kernel_debug_files(osrelease: &str, verbose: bool) -> Result<DebugFiles> {
        let vmlinux = debug_file::find_vmlinux(osrelease)?;
        let discovery: ModuleDiscovery = debug_file::find_modules(osrelease)?;
        if verbose {
            if let Some(summary) = discovery.verbose_summary() {
                log::warn!("{summary}");
            }
        }
        Ok(DebugFiles {
            vmlinux: Some(vmlinux),
            modules: discovery.modules,
            userspace_elfs: Vec::new(),
        })
    }

    fn locate_userspace_debug_files(mappings: &mut MappingTable) -> Result<DebugFiles> {
        let mut userspace_elfs = Vec::new();
        debug_file::open_userspace_mappings(mappings, &mut userspace_elfs)?;
        Ok(DebugFiles {
            vmlinux: None,
            modules: Vec::new(),
            userspace_elfs,
        })
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.cleanup.unwind();
    }
}

/// Reads just the ELF identification bytes (`EI_NIDENT`) to tell a 32- from
/// a 64-bit core, without reading anything the size of the file itself —
/// `/proc/kcore` reports a size spanning the whole kernel address range, so
/// even `stat`-ing it for a bulk read is the wrong move.
fn detect_class(fd: RawFd, path: &Path) -> Result<ElfClass> {
    let ident = read_exact_at(fd, 0, object::elf::EI_NIDENT)?;
    if ident[0..4] != *b"\x7fELF" {
        return Err(Error::invalid_argument(format!(
            "{} is not an ELF file",
            path.display()
        )));
    }
    match ident[object::elf::EI_CLASS] {
        object::elf::ELFCLASS32 => Ok(ElfClass::Elf32),
        object::elf::ELFCLASS64 => Ok(ElfClass::Elf64),
        other => Err(Error::invalid_argument(format!(
            "{} has unrecognized ELF class byte {other}",
            path.display()
        ))),
    }
}

/// Reads exactly `len` bytes at `offset` via `pread`. Bounded to what the
/// caller actually needs, never the file's reported total size.
fn read_exact_at(fd: RawFd, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let n = nix::sys::uio::pread(fd, &mut buf, offset as i64)
        .map_err(|errno| Error::os(format!("pread at file offset 0x{offset:x}"), errno.into()))?;
    if n != len {
        return Err(Error::other(format!(
            "short read at file offset 0x{offset:x}: wanted {len} bytes, got {n}"
        )));
    }
    Ok(buf)
}

/// Drives both program-header passes for a given ELF class, reading only
/// the ELF header, the program header table, and each `PT_NOTE` segment's
/// own bytes via bounded `pread`s: count `PT_LOAD` entries (tracking
/// whether any carries a nonzero physical address), then register a
/// segment per `PT_LOAD` — by address/size, not content — and
/// decode/dispatch every `PT_NOTE` from its own standalone buffer.
fn walk<Elf: FileHeader<Endian = Endianness>>(
    class: ElfClass,
    fd: RawFd,
    reader: &mut FileSegmentReader,
    mappings: &mut MappingTable,
    vmcoreinfo_fields: &mut note::VmcoreinfoFields,
) -> Result<PhdrSummary> {
    let header_bytes = read_exact_at(fd, 0, std::mem::size_of::<Elf>())?;
    let header = Elf::parse(&*header_bytes)?;
    let endian = header.endian()?;
    if header.e_type(endian) != object::elf::ET_CORE {
        return Err(Error::invalid_argument("source file is not an ET_CORE dump"));
    }

    let e_phoff: u64 = header.e_phoff(endian).into();
    let e_phnum: u64 = header.e_phnum(endian).into();
    let e_phentsize: u64 = header.e_phentsize(endian).into();
    let phdrs_end = e_phoff + e_phnum * e_phentsize;

    let phdr_bytes = read_exact_at(fd, 0, phdrs_end as usize)?;
    let header = Elf::parse(&*phdr_bytes)?;
    let segments = header.program_headers(endian, &*phdr_bytes)?;

    let mut summary = PhdrSummary {
        have_non_zero_phys_addr: false,
        have_vmcoreinfo: false,
        have_nt_taskstruct: false,
        endian,
    };
    for phdr in segments {
        if phdr.p_type(endian) == object::elf::PT_LOAD {
            let p_paddr: u64 = phdr.p_paddr(endian).into();
            if p_paddr != 0 {
                summary.have_non_zero_phys_addr = true;
            }
        }
    }

    for phdr in segments {
        match phdr.p_type(endian) {
            object::elf::PT_LOAD => {
                let p_vaddr: u64 = phdr.p_vaddr(endian).into();
                let p_paddr: u64 = phdr.p_paddr(endian).into();
                let p_memsz: u64 = phdr.p_memsz(endian).into();
                let p_offset: u64 = phdr.p_offset(endian).into();
                let p_filesz: u64 = phdr.p_filesz(endian).into();
                reader.register(FileSegment {
                    virtual_addr: p_vaddr,
                    phys_addr: if summary.have_non_zero_phys_addr {
                        p_paddr
                    } else {
                        crate::segment::U64_MAX
                    },
                    size: p_memsz,
                    fd,
                    file_offset: p_offset,
                    file_size: p_filesz,
                });
            }
            object::elf::PT_NOTE => {
                let p_filesz: u64 = phdr.p_filesz(endian).into();
                if p_filesz == 0 {
                    continue;
                }
                let p_offset: u64 = phdr.p_offset(endian).into();
                let note_bytes = read_exact_at(fd, p_offset, p_filesz as usize)?;
                let mut notes = NoteIterator::<Elf>::new(endian, phdr.p_align(endian), &note_bytes)?;
                while let Some(entry) = notes.next()? {
                    dispatch_note(
                        entry.name(),
                        entry.n_type(endian),
                        entry.desc(),
                        class,
                        endian,
                        mappings,
                        vmcoreinfo_fields,
                        &mut summary,
                    )?;
                }
            }
            _ => {}
        }
    }

    Ok(summary)
}

fn dispatch_note(
    name: &[u8],
    n_type: u32,
    desc: &[u8],
    class: ElfClass,
    endian: Endianness,
    mappings: &mut MappingTable,
    vmcoreinfo_fields: &mut note::VmcoreinfoFields,
    summary: &mut PhdrSummary,
) -> Result<()> {
    if name == note::NOTE_NAME_VMCOREINFO {
        summary.have_vmcoreinfo = true;
        note::parse_vmcoreinfo_text(desc, vmcoreinfo_fields)?;
        return Ok(());
    }

    if name == note::NOTE_NAME_CORE {
        match n_type {
            note::NT_FILE => note::parse_nt_file(desc, class, endian, mappings)?,
            note::NT_TASKSTRUCT => summary.have_nt_taskstruct = true,
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_empty() {
        let flags = ProgramFlags::empty();
        assert!(!flags.contains(ProgramFlags::IS_LINUX_KERNEL));
    }

    #[test]
    fn flags_track_kernel_classification() {
        let mut flags = ProgramFlags::empty();
        flags.insert(ProgramFlags::IS_LINUX_KERNEL);
        assert!(flags.contains(ProgramFlags::IS_LINUX_KERNEL));
    }
}
