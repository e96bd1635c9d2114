//! Bootstrap and symbol-relocation core for a program-state inspector:
//! given a stopped target (an ELF core dump, the live kernel via
//! `/proc/kcore`, or a live process via `/proc/<pid>/mem`), build a
//! queryable map of its virtual memory and locate the debug ELF files a
//! DWARF index would need, then resolve a DWARF-relative symbol address
//! into the address valid in the running image.
//!
//! The DWARF index, type index, and symbol index themselves are external
//! collaborators this crate only ever hands file paths and an
//! [`relocate::ObjectReader`] capability to; building and querying them is
//! out of scope here.

pub mod cleanup;
pub mod debug_file;
pub mod error;
pub mod kallsyms;
pub mod mapping;
pub mod note;
pub mod proc_maps;
pub mod program;
pub mod relocate;
pub mod segment;
pub mod symbol;
pub mod vmcoreinfo;

pub use cleanup::{CleanupStack, CleanupToken};
pub use debug_file::ModuleDiscovery;
pub use error::{Error, Result};
pub use mapping::{AppendOutcome, FileMapping, MappingTable};
pub use program::{Program, ProgramAssembler, ProgramFlags};
pub use relocate::{KernelRelocator, ObjectReader};
pub use segment::{AddressSpace, FileSegment, FileSegmentReader};
pub use symbol::{QualifiedTypeRef, Symbol, SymbolValue};
pub use vmcoreinfo::{VmcoreInfo, VmcoreinfoResolver};
