//! `/proc/kallsyms` parsing and `uname`, used by the kallsyms fallback path
//! of [`crate::vmcoreinfo::VmcoreinfoResolver`] when `/proc/kcore` has
//! neither an embedded `VMCOREINFO` note nor physical-address info.

use crate::error::{Error, Result};
use std::path::Path;

/// `uname`'s `release` field, e.g. `"5.10.0-generic"`.
pub fn osrelease() -> Result<String> {
    let uts = nix::sys::utsname::uname().map_err(|e| Error::os("uname", e.into()))?;
    uts.release()
        .to_str()
        .map(|s| s.to_owned())
        .ok_or_else(|| Error::other("uname release is not valid UTF-8"))
}

/// Looks up `symbol` in a kallsyms-formatted file (`<hex-addr> <type> <name>
/// [module]` per line) and returns its address.
///
/// The C original's bug — parsing the address from a pointer obtained via
/// `strtok_r`, which has already NUL-punched the line — happens to work
/// only because the address field starts at offset 0. We sidestep it
/// entirely: the address is always parsed from the start of the original
/// line, never from a token produced while searching for the name.
pub fn find_symbol(path: &Path, symbol: &str) -> Result<u64> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::os(format!("reading {}", path.display()), e))?;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(addr_str) = fields.next() else {
            continue;
        };
        let Some(_type_char) = fields.next() else {
            continue;
        };
        let Some(name) = fields.next() else {
            continue;
        };
        if name != symbol {
            continue;
        }

        return u64::from_str_radix(addr_str, 16)
            .map_err(|_| Error::other(format!("bad kallsyms address {addr_str:?} for {symbol}")));
    }

    Err(Error::lookup(format!(
        "{symbol} not found in {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn finds_stext_address() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ffffffff81000000 T _stext").unwrap();
        writeln!(file, "ffffffff81001000 T _end_stext").unwrap();
        let addr = find_symbol(file.path(), "_stext").unwrap();
        assert_eq!(addr, 0xffffffff81000000);
    }

    #[test]
    fn missing_symbol_is_lookup_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ffffffff81000000 T _stext").unwrap();
        assert!(matches!(
            find_symbol(file.path(), "nonexistent"),
            Err(Error::Lookup(_))
        ));
    }

    #[test]
    fn malformed_address_is_other_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not-hex T _stext").unwrap();
        assert!(matches!(
            find_symbol(file.path(), "_stext"),
            Err(Error::Other(_))
        ));
    }
}
