//! [`ObjectReader`]: the capability `KernelRelocator` uses to read live
//! kernel data structures (`struct module`, its `list_head`, its
//! `module_sect_attrs`) by DWARF type, without the relocator itself
//! needing to know any type's member layout.
//!
//! This is deliberately a trait, not a concrete implementation: member
//! offsets come from the DWARF type index, which is out of scope for this
//! crate. Whatever wires a `KernelRelocator`
//! together supplies the implementation.

use crate::error::Result;

pub trait ObjectReader {
    /// Returns the address a member "is", the way a type-aware accessor
    /// would present it: for a pointer-typed member (e.g. `list.next`) this
    /// is the pointee address; for an embedded aggregate or array member
    /// (e.g. `module.name`) this is the member's own address, since that is
    /// what a caller needing to read through it wants either way.
    fn member_deref(&self, base: u64, type_name: &str, member: &str) -> Result<u64>;

    /// Given the address of a `member` field, returns the address of the
    /// enclosing `type_name` instance (the `container_of` macro).
    fn container_of(&self, member_addr: u64, type_name: &str, member: &str) -> Result<u64>;

    /// Returns the address of element `index` of the array-typed member
    /// identified relative to `base` (a `type_name` instance).
    fn subscript(&self, base: u64, type_name: &str, index: u64) -> Result<u64>;

    /// Reads `member`'s value as an unsigned integer of its declared size.
    fn read_unsigned(&self, base: u64, type_name: &str, member: &str) -> Result<u64>;

    /// Reads a NUL-terminated string stored at `addr`.
    fn read_c_string(&self, addr: u64, max_len: usize) -> Result<String>;
}
