//! [`Symbol`]: the relocation target. Produced by the (out-of-scope) DWARF
//! symbol index from a raw DIE address; the relocators in
//! [`crate::relocate`] mutate `address` in place to the address valid in
//! the running image.

/// An opaque handle into the (out-of-scope) type index. The relocation
/// core never interprets it, only carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QualifiedTypeRef(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolValue {
    Signed(i64),
    Unsigned(u64),
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub is_enumerator: bool,
    pub qualified_type: Option<QualifiedTypeRef>,
    pub little_endian: bool,
    pub value: Option<SymbolValue>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Self {
            name: name.into(),
            address,
            is_enumerator: false,
            qualified_type: None,
            little_endian: true,
            value: None,
        }
    }
}
