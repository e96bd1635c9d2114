//! Locates the debug ELF files backing a target: `vmlinux` and loadable
//! modules for a kernel target, or the per-mapping files a userspace core
//! names in its `NT_FILE` note.
//!
//! Actually indexing DWARF is out of scope here (it belongs to the DWARF
//! index, an external collaborator) — "DWARF-indexable" is approximated by
//! the presence of a `.debug_info` section, the same cheap test real
//! debuggers use to tell a stripped binary from one worth indexing.

use crate::error::{Error, Result};
use crate::mapping::MappingTable;
use object::{Object, ObjectSection};
use std::path::{Path, PathBuf};

/// Outcome of probing a single candidate debug file.
enum Candidate {
    NotFound,
    MissingDebugInfo,
    Found(PathBuf),
}

fn probe(path: &Path) -> Result<Candidate> {
    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Candidate::NotFound),
        Err(e) => return Err(Error::os(format!("opening {}", path.display()), e)),
    };

    let object = object::File::parse(&*content)?;
    if object.section_by_name(".debug_info").is_some() {
        Ok(Candidate::Found(path.to_path_buf()))
    } else {
        Ok(Candidate::MissingDebugInfo)
    }
}

/// The three standard search locations for `vmlinux`, tried in order. Part
/// of the external contract.
pub fn vmlinux_candidates(osrelease: &str) -> [PathBuf; 3] {
    [
        PathBuf::from(format!("/usr/lib/debug/lib/modules/{osrelease}/vmlinux")),
        PathBuf::from(format!("/boot/vmlinux-{osrelease}")),
        PathBuf::from(format!("/lib/modules/{osrelease}/build/vmlinux")),
    ]
}

/// Finds the first usable `vmlinux` for `osrelease`.
///
/// Errors with [`Error::MissingDebug`], whose message distinguishes "no
/// vmlinux anywhere" from "vmlinux found but stripped of debug info".
pub fn find_vmlinux(osrelease: &str) -> Result<PathBuf> {
    let mut saw_stripped = false;
    for candidate in vmlinux_candidates(osrelease) {
        match probe(&candidate)? {
            Candidate::Found(path) => return Ok(path),
            Candidate::MissingDebugInfo => saw_stripped = true,
            Candidate::NotFound => {}
        }
    }

    if saw_stripped {
        Err(Error::missing_debug(format!(
            "vmlinux for {osrelease} was found but has no debug info"
        )))
    } else {
        Err(Error::missing_debug(format!(
            "no vmlinux found for {osrelease} in any search path"
        )))
    }
}

/// Module discovery report: usable `.ko`/`.ko.debug` paths, plus the
/// verbose-mode summary of modules that were found but lacked debug info.
pub struct ModuleDiscovery {
    pub modules: Vec<PathBuf>,
    pub missing_debug_count: usize,
    pub missing_debug_examples: Vec<String>,
}

const MISSING_DEBUG_EXAMPLES_SHOWN: usize = 5;

/// Walks the module tree for `osrelease`, preferring the `*.ko.debug` tree
/// under `/usr/lib/debug/...` and falling back to the in-kernel-tree `*.ko`
/// files. The first tree that exists on disk is used exclusively.
pub fn find_modules(osrelease: &str) -> Result<ModuleDiscovery> {
    let debug_root =
        PathBuf::from(format!("/usr/lib/debug/lib/modules/{osrelease}/kernel"));
    let plain_root = PathBuf::from(format!("/lib/modules/{osrelease}/kernel"));

    let (root, suffix) = if debug_root.is_dir() {
        (debug_root, ".ko.debug")
    } else if plain_root.is_dir() {
        (plain_root, ".ko")
    } else {
        return Ok(ModuleDiscovery {
            modules: Vec::new(),
            missing_debug_count: 0,
            missing_debug_examples: Vec::new(),
        });
    };

    let mut modules = Vec::new();
    let mut missing_debug_count = 0;
    let mut missing_debug_examples = Vec::new();

    for entry in walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        let path = entry.path();
        if !path.is_file() || !path.to_string_lossy().ends_with(suffix) {
            continue;
        }

        match probe(path)? {
            Candidate::Found(path) => modules.push(path),
            Candidate::MissingDebugInfo | Candidate::NotFound => {
                missing_debug_count += 1;
                if missing_debug_examples.len() < MISSING_DEBUG_EXAMPLES_SHOWN {
                    missing_debug_examples.push(path.display().to_string());
                }
            }
        }
    }

    Ok(ModuleDiscovery {
        modules,
        missing_debug_count,
        missing_debug_examples,
    })
}

impl ModuleDiscovery {
    /// The "missing debug for N modules, show first 5" line, only emitted
    /// in verbose mode.
    pub fn verbose_summary(&self) -> Option<String> {
        if self.missing_debug_count == 0 {
            return None;
        }
        let shown = self.missing_debug_examples.join(", ");
        let overflow = self.missing_debug_count.saturating_sub(self.missing_debug_examples.len());
        Some(if overflow > 0 {
            format!("missing debug info for {} modules: {shown}, ... {overflow} more", self.missing_debug_count)
        } else {
            format!("missing debug info for {} modules: {shown}", self.missing_debug_count)
        })
    }
}

/// For each userspace `FileMapping`, attempts to open `mapping.path` as an
/// ELF file and records its index into `opened_elfs` on success.
/// `ENOENT`, not-an-ELF, and missing-debug-info are tolerated per mapping;
/// at least one mapping must succeed.
pub fn open_userspace_mappings(
    mappings: &mut MappingTable,
    opened_elfs: &mut Vec<(PathBuf, Vec<u8>)>,
) -> Result<()> {
    let mut any_succeeded = false;

    for index in 0..mappings.len() {
        let path = mappings.get(index).unwrap().path.clone();
        match probe(Path::new(&path)) {
            Ok(Candidate::Found(path)) => {
                let content = std::fs::read(&path)
                    .map_err(|e| Error::os(format!("re-opening {}", path.display()), e))?;
                let key = opened_elfs.len();
                opened_elfs.push((path, content));
                mappings.get_mut(index).unwrap().elf = Some(key);
                any_succeeded = true;
            }
            Ok(Candidate::MissingDebugInfo) | Ok(Candidate::NotFound) => continue,
            Err(e) if e.is_tolerable_during_discovery() => continue,
            Err(e) => return Err(e),
        }
    }

    if !any_succeeded {
        return Err(Error::missing_debug("no debug information found"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmlinux_candidates_are_in_expected_order() {
        let candidates = vmlinux_candidates("5.10.0");
        assert_eq!(
            candidates[0],
            PathBuf::from("/usr/lib/debug/lib/modules/5.10.0/vmlinux")
        );
        assert_eq!(candidates[1], PathBuf::from("/boot/vmlinux-5.10.0"));
        assert_eq!(
            candidates[2],
            PathBuf::from("/lib/modules/5.10.0/build/vmlinux")
        );
    }

    #[test]
    fn find_vmlinux_reports_missing_debug_when_nothing_exists() {
        // Using a release string guaranteed not to exist on the test host.
        let err = find_vmlinux("no-such-release-xyz").unwrap_err();
        assert!(matches!(err, Error::MissingDebug(_)));
    }

    #[test]
    fn open_userspace_mappings_requires_at_least_one_success() {
        let mut mappings = MappingTable::new();
        mappings
            .append(0x1000, 0x2000, 0, "/no/such/file-xyz")
            .unwrap();
        let mut opened = Vec::new();
        let err = open_userspace_mappings(&mut mappings, &mut opened).unwrap_err();
        assert!(matches!(err, Error::MissingDebug(_)));
    }
}
