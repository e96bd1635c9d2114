//! Symbol relocation: translating a DWARF-die-relative address into the
//! address actually valid in the running image.

pub mod kernel;
pub mod object_reader;
pub mod userspace;

pub use kernel::KernelRelocator;
pub use object_reader::ObjectReader;
