//! Decodes the note payloads found in `PT_NOTE` segments: `NT_FILE`,
//! `NT_TASKSTRUCT` (presence-only), and `VMCOREINFO`. The caller (the ELF
//! phdr walker in [`crate::program`]) is responsible for iterating notes
//! and dispatching by name/type; this module only interprets the
//! descriptor bytes once a note has been identified.

use crate::error::{Error, Result};
use crate::mapping::MappingTable;

/// Note name/type constants, matching the Linux kernel's core-dump ABI.
pub const NOTE_NAME_CORE: &[u8] = b"CORE";
pub const NOTE_NAME_VMCOREINFO: &[u8] = b"VMCOREINFO";
pub const NT_TASKSTRUCT: u32 = 4;
pub const NT_FILE: u32 = 0x46494c45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    endian: object::Endianness,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], endian: object::Endianness) -> Self {
        Self { data, pos: 0, endian }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| Error::elf_format("NT_FILE: offset overflow"))?;
        if end > self.data.len() {
            return Err(Error::elf_format("NT_FILE: truncated note"));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(match self.endian {
            object::Endianness::Little => u64::from_le_bytes(bytes),
            object::Endianness::Big => u64::from_be_bytes(bytes),
        })
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(match self.endian {
            object::Endianness::Little => u32::from_le_bytes(bytes),
            object::Endianness::Big => u32::from_be_bytes(bytes),
        })
    }

    fn cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::elf_format("NT_FILE: path string not NUL-terminated"))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|e| Error::elf_format(format!("NT_FILE: invalid UTF-8 path: {e}")))?
            .to_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}

/// Parses an `NT_FILE` descriptor and appends every mapping it describes to
/// `mappings`. `file_offset` fields are in units of `page_size` and are
/// multiplied out before being handed to [`MappingTable::append`].
pub fn parse_nt_file(
    desc: &[u8],
    class: ElfClass,
    endian: object::Endianness,
    mappings: &mut MappingTable,
) -> Result<()> {
    let mut cur = Cursor::new(desc, endian);
    let (count, page_size) = match class {
        ElfClass::Elf64 => (cur.u64()?, cur.u64()?),
        ElfClass::Elf32 => (cur.u32()? as u64, cur.u32()? as u64),
    };

    struct Raw {
        start: u64,
        end: u64,
        file_offset: u64,
    }

    let mut raws = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (start, end, file_offset) = match class {
            ElfClass::Elf64 => (cur.u64()?, cur.u64()?, cur.u64()?),
            ElfClass::Elf32 => (
                cur.u32()? as u64,
                cur.u32()? as u64,
                cur.u32()? as u64,
            ),
        };
        let file_offset = file_offset
            .checked_mul(page_size)
            .ok_or_else(|| Error::overflow("NT_FILE: file_offset * page_size overflowed"))?;
        raws.push(Raw {
            start,
            end,
            file_offset,
        });
    }

    for raw in raws {
        let path = cur.cstring()?;
        mappings.append(raw.start, raw.end, raw.file_offset, path)?;
    }

    Ok(())
}

/// Fields recognized inside a `VMCOREINFO` note. `osrelease` is bounded to
/// 64 bytes (including the NUL terminator in the C original, so 63 usable
/// bytes here).
pub const OSRELEASE_MAX_LEN: usize = 64;

#[derive(Debug, Default, Clone)]
pub struct VmcoreinfoFields {
    pub osrelease: Option<String>,
    pub kaslr_offset: Option<u64>,
}

/// Parses the `\n`-separated `KEY=VALUE` text of a `VMCOREINFO` note,
/// merging recognized keys into `fields`. Unknown keys are ignored.
pub fn parse_vmcoreinfo_text(desc: &[u8], fields: &mut VmcoreinfoFields) -> Result<()> {
    let text = std::str::from_utf8(desc)
        .map_err(|e| Error::elf_format(format!("VMCOREINFO: invalid UTF-8: {e}")))?;

    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some(value) = line.strip_prefix("OSRELEASE=") {
            if value.len() >= OSRELEASE_MAX_LEN {
                return Err(Error::overflow(format!(
                    "OSRELEASE value {} bytes, exceeds {OSRELEASE_MAX_LEN}-byte buffer",
                    value.len()
                )));
            }
            fields.osrelease = Some(value.to_owned());
        } else if let Some(value) = line.strip_prefix("KERNELOFFSET=") {
            if value.is_empty() {
                return Err(Error::elf_format("KERNELOFFSET: empty value"));
            }
            let offset = u64::from_str_radix(value, 16)
                .map_err(|_| Error::overflow(format!("KERNELOFFSET: {value:?} out of range")))?;
            fields.kaslr_offset = Some(offset);
        }
        // Unknown keys are ignored.
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nt_file_desc(page_size: u64, entries: &[(u64, u64, u64)], paths: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        buf.extend_from_slice(&page_size.to_le_bytes());
        for (start, end, off) in entries {
            buf.extend_from_slice(&start.to_le_bytes());
            buf.extend_from_slice(&end.to_le_bytes());
            buf.extend_from_slice(&off.to_le_bytes());
        }
        for path in paths {
            buf.extend_from_slice(path.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn round_trips_nt_file_entries() {
        let desc = nt_file_desc(
            0x1000,
            &[(0x400000, 0x401000, 0), (0x401000, 0x402000, 1)],
            &["/bin/ls", "/bin/ls"],
        );
        let mut mappings = MappingTable::new();
        parse_nt_file(&desc, ElfClass::Elf64, object::Endianness::Little, &mut mappings).unwrap();
        // Contiguous, same path, file_offset difference matches page_size -> merged.
        assert_eq!(mappings.len(), 1);
        let m = mappings.get(0).unwrap();
        assert_eq!((m.start, m.end, m.file_offset), (0x400000, 0x402000, 0));
    }

    #[test]
    fn truncated_nt_file_is_elf_format_error() {
        let mut desc = nt_file_desc(0x1000, &[(0x1000, 0x2000, 0)], &["/bin/ls"]);
        desc.truncate(desc.len() - 2);
        let mut mappings = MappingTable::new();
        assert!(
            parse_nt_file(&desc, ElfClass::Elf64, object::Endianness::Little, &mut mappings)
                .is_err()
        );
    }

    #[test]
    fn vmcoreinfo_recognizes_osrelease_and_kerneloffset() {
        let desc = b"OSRELEASE=5.10.0\nKERNELOFFSET=12345678\nIGNORED=xyz\n";
        let mut fields = VmcoreinfoFields::default();
        parse_vmcoreinfo_text(desc, &mut fields).unwrap();
        assert_eq!(fields.osrelease.as_deref(), Some("5.10.0"));
        assert_eq!(fields.kaslr_offset, Some(0x12345678));
    }

    #[test]
    fn vmcoreinfo_rejects_oversized_osrelease() {
        let long = "x".repeat(OSRELEASE_MAX_LEN);
        let desc = format!("OSRELEASE={long}\n");
        let mut fields = VmcoreinfoFields::default();
        assert!(parse_vmcoreinfo_text(desc.as_bytes(), &mut fields).is_err());
    }

    #[test]
    fn vmcoreinfo_rejects_empty_kerneloffset() {
        let desc = b"KERNELOFFSET=\n";
        let mut fields = VmcoreinfoFields::default();
        assert!(parse_vmcoreinfo_text(desc, &mut fields).is_err());
    }
}
