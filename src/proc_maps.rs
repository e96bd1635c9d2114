//! `/proc/<pid>/maps` parsing for [`crate::program::ProgramAssembler::from_pid`].
//!
//! Format per line: `%lx-%lx %4c %lx %x:%x %d %s` (start, end, perms,
//! offset, dev, inode, optional pathname). Anonymous mappings (no
//! pathname) are skipped; named mappings are appended to the
//! [`MappingTable`].
//!
//! One source of prior art for this format notes an asymmetry between `parse_nt_file`
//! (the caller allocates the path only after `append` reports `Appended`)
//! and `parse_proc_maps` (the caller already owns the path and frees it
//! itself on a `Merged` outcome). In Rust this asymmetry disappears: the
//! owned `String` is simply moved into `append`, and whether `append`
//! stores it or drops it after folding into the previous entry is no
//! longer something the caller needs to reason about.

use crate::error::{Error, Result};
use crate::mapping::MappingTable;

pub fn parse_proc_maps(content: &str, mappings: &mut MappingTable) -> Result<()> {
    for line in content.lines() {
        if line.is_empty() {
            continue;
        }
        parse_line(line, mappings)?;
    }
    Ok(())
}

fn parse_line(line: &str, mappings: &mut MappingTable) -> Result<()> {
    let mut fields = line.splitn(6, ' ').filter(|f| !f.is_empty());

    let range = fields
        .next()
        .ok_or_else(|| Error::other(format!("/proc/pid/maps: missing address range: {line:?}")))?;
    let (start_str, end_str) = range
        .split_once('-')
        .ok_or_else(|| Error::other(format!("/proc/pid/maps: malformed range {range:?}")))?;
    let start = u64::from_str_radix(start_str, 16)
        .map_err(|_| Error::other(format!("/proc/pid/maps: bad start address {start_str:?}")))?;
    let end = u64::from_str_radix(end_str, 16)
        .map_err(|_| Error::other(format!("/proc/pid/maps: bad end address {end_str:?}")))?;

    let _perms = fields
        .next()
        .ok_or_else(|| Error::other("/proc/pid/maps: missing perms field"))?;

    let offset_str = fields
        .next()
        .ok_or_else(|| Error::other("/proc/pid/maps: missing offset field"))?;
    let offset = u64::from_str_radix(offset_str, 16)
        .map_err(|_| Error::other(format!("/proc/pid/maps: bad offset {offset_str:?}")))?;

    let _dev = fields
        .next()
        .ok_or_else(|| Error::other("/proc/pid/maps: missing dev field"))?;
    let rest = fields
        .next()
        .ok_or_else(|| Error::other("/proc/pid/maps: missing inode field"))?;

    // `rest` is "<inode>[ whitespace-padded pathname]"; split off the inode
    // and treat anything remaining (trimmed) as the pathname.
    let path = rest
        .split_once(char::is_whitespace)
        .map(|(_, path)| path.trim())
        .unwrap_or("");

    if path.is_empty() || path.starts_with('[') {
        // Anonymous mapping, or a pseudo-mapping like [heap]/[stack]/[vdso].
        return Ok(());
    }

    mappings.append(start, end, offset, path)?;
    Ok(())
}
