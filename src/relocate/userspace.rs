//! [`relocate`]: resolves a userspace symbol's DWARF-relative address into
//! the address it is actually mapped at, via the owning ELF's `PT_LOAD`
//! phdrs and the live file-mapping table.

use crate::error::{Error, Result};
use crate::mapping::MappingTable;
use crate::symbol::Symbol;
use object::{Object, ObjectSegment};

/// `elf_key` identifies `object` among the mappings it backs (the same key
/// [`crate::debug_file::open_userspace_mappings`] stored into each
/// matching `FileMapping::elf`).
pub fn relocate(
    object: &object::File,
    elf_key: usize,
    mappings: &MappingTable,
    symbol: &mut Symbol,
) -> Result<()> {
    let address = symbol.address;

    let segment = object
        .segments()
        .find(|s| address >= s.address() && address < s.address() + s.size())
        .ok_or_else(|| {
            Error::lookup(format!(
                "no PT_LOAD segment covers DWARF address 0x{address:x}"
            ))
        })?;

    let (segment_file_offset, _) = segment.file_range();
    let file_offset = segment_file_offset + (address - segment.address());

    let mapping = mappings
        .find_covering_file_offset(elf_key, file_offset)
        .ok_or_else(|| {
            Error::lookup(format!(
                "no live mapping covers file offset 0x{file_offset:x}"
            ))
        })?;

    symbol.address = mapping.start + (file_offset - mapping.file_offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Builds a minimal on-disk ELF64 executable with a single `PT_LOAD`
    /// phdr (`p_vaddr`, `p_offset`, `p_memsz` as given; `p_filesz` equal to
    /// the header region itself, since nothing reads segment content here).
    fn write_single_load_elf(p_vaddr: u64, p_offset: u64, p_memsz: u64) -> tempfile::NamedTempFile {
        const EHDR_SIZE: u16 = 64;
        const PHDR_SIZE: u16 = 56;

        let mut elf = Vec::new();
        elf.extend_from_slice(b"\x7fELF");
        elf.push(object::elf::ELFCLASS64);
        elf.push(object::elf::ELFDATA2LSB);
        elf.push(object::elf::EV_CURRENT);
        elf.push(object::elf::ELFOSABI_NONE);
        elf.extend_from_slice(&[0u8; 8]); // e_ident padding

        elf.extend_from_slice(&(object::elf::ET_EXEC as u16).to_le_bytes());
        elf.extend_from_slice(&(object::elf::EM_X86_64 as u16).to_le_bytes());
        elf.extend_from_slice(&1u32.to_le_bytes()); // e_version
        elf.extend_from_slice(&p_vaddr.to_le_bytes()); // e_entry
        elf.extend_from_slice(&u64::from(EHDR_SIZE).to_le_bytes()); // e_phoff
        elf.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        elf.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        elf.extend_from_slice(&EHDR_SIZE.to_le_bytes());
        elf.extend_from_slice(&PHDR_SIZE.to_le_bytes());
        elf.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        elf.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        elf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        elf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

        let filesz = u64::from(EHDR_SIZE) + u64::from(PHDR_SIZE);
        elf.extend_from_slice(&object::elf::PT_LOAD.to_le_bytes());
        elf.extend_from_slice(&(object::elf::PF_R | object::elf::PF_X).to_le_bytes());
        elf.extend_from_slice(&p_offset.to_le_bytes());
        elf.extend_from_slice(&p_vaddr.to_le_bytes());
        elf.extend_from_slice(&p_vaddr.to_le_bytes()); // p_paddr
        elf.extend_from_slice(&filesz.to_le_bytes());
        elf.extend_from_slice(&p_memsz.to_le_bytes());
        elf.extend_from_slice(&0x1000u64.to_le_bytes()); // p_align

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&elf).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn resolves_through_phdr_and_mapping() {
        // PT_LOAD {p_vaddr=0x1000, p_offset=0x0, p_memsz=0x2000} and a live
        // mapping {start=0x7f0000, file_offset=0x0} should resolve DWARF
        // address 0x1500 to 0x7f0500.
        let tmp = write_single_load_elf(0x1000, 0x0, 0x2000);
        let data = std::fs::read(tmp.path()).unwrap();
        let object = object::File::parse(&*data).unwrap();

        let mut mappings = MappingTable::new();
        mappings.append(0x7f0000, 0x7f2000, 0x0, "/bin/a.out").unwrap();
        let elf_key = 0;
        mappings.get_mut(0).unwrap().elf = Some(elf_key);

        let mut symbol = Symbol::new("some_symbol", 0x1500);
        relocate(&object, elf_key, &mappings, &mut symbol).unwrap();

        assert_eq!(symbol.address, 0x7f0500);
    }
}
