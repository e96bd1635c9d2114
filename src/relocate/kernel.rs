//! [`KernelRelocator`]: resolves a symbol's final address against a kernel
//! target, either by applying the KASLR offset (vmlinux, `ET_EXEC`) or by
//! walking the live `struct module` list (a module, `ET_REL`).

use crate::error::{Error, Result};
use crate::relocate::object_reader::ObjectReader;
use crate::symbol::Symbol;
use crate::vmcoreinfo::VmcoreInfo;
use object::{Object, ObjectSection, ObjectSymbol, ObjectSymbolTable, SymbolSection};

/// Bounds the `modules` list walk so a corrupt or cyclic live list reports
/// a lookup failure instead of hanging.
const MODULE_LIST_WALK_LIMIT: usize = 100_000;

pub struct KernelRelocator<'a> {
    reader: &'a dyn ObjectReader,
    modules_head_addr: u64,
}

impl<'a> KernelRelocator<'a> {
    pub fn new(reader: &'a dyn ObjectReader, modules_head_addr: u64) -> Self {
        Self {
            reader,
            modules_head_addr,
        }
    }

    /// `ET_EXEC` case: the owning ELF is vmlinux itself, so the only
    /// correction needed is the KASLR load offset.
    pub fn relocate_vmlinux(vmcoreinfo: &VmcoreInfo, symbol: &mut Symbol) {
        symbol.address = symbol.address.wrapping_add(vmcoreinfo.kaslr_offset);
    }

    /// `ET_REL` case: a four-step walk from the module's own ELF to its
    /// live load address.
    pub fn relocate_module(&self, module_object: &object::File, symbol: &mut Symbol) -> Result<()> {
        let module_name = Self::modinfo_name(module_object)?;
        let section_name = Self::symbol_section_name(module_object, symbol.address)?;
        let module_addr = self.find_loaded_module(&module_name)?;
        let section_addr = self.section_base(module_addr, &section_name)?;
        symbol.address = symbol.address.wrapping_add(section_addr);
        Ok(())
    }

    /// Step 1: `.modinfo` is a sequence of NUL-terminated `key=value`
    /// entries; return the value of `name=`.
    fn modinfo_name(object: &object::File) -> Result<String> {
        let section = object
            .section_by_name(".modinfo")
            .ok_or_else(|| Error::elf_format(".modinfo section missing"))?;
        let data = section.uncompressed_data()?;
        for entry in data.split(|&b| b == 0) {
            if let Some(value) = entry.strip_prefix(b"name=") {
                return std::str::from_utf8(value)
                    .map(|s| s.to_owned())
                    .map_err(|e| Error::elf_format(format!("'.modinfo' name= is not UTF-8: {e}")));
            }
        }
        Err(Error::lookup("'name=' entry not found in .modinfo"))
    }

    /// Step 2: find the `.symtab` entry whose `st_value` matches the
    /// symbol's DWARF-relative address (address match, not name match, to
    /// cope with aliased symbols), then resolve its section's name. The
    /// `object` crate resolves `SHN_XINDEX` through the symtab's extended
    /// index section transparently.
    fn symbol_section_name(object: &object::File, address: u64) -> Result<String> {
        let table = object
            .symbol_table()
            .ok_or_else(|| Error::elf_format(".symtab missing"))?;
        let symbol = table
            .symbols()
            .find(|s| s.address() == address)
            .ok_or_else(|| Error::lookup(format!("no .symtab entry for address 0x{address:x}")))?;

        match symbol.section() {
            SymbolSection::Section(index) => {
                let section = object.section_by_index(index)?;
                Ok(section.name()?.to_owned())
            }
            other => Err(Error::lookup(format!(
                "symbol at 0x{address:x} is not defined in a section ({other:?})"
            ))),
        }
    }

    /// Step 3: walk the live `modules` doubly-linked list,
    /// `container_of`-ing each node back to its `struct module`, until one
    /// has a matching `name`.
    fn find_loaded_module(&self, name: &str) -> Result<u64> {
        let mut node = self
            .reader
            .member_deref(self.modules_head_addr, "list_head", "next")?;

        for _ in 0..MODULE_LIST_WALK_LIMIT {
            if node == self.modules_head_addr {
                return Err(Error::lookup(format!("{name} is not loaded")));
            }

            let module_addr = self.reader.container_of(node, "module", "list")?;
            let name_addr = self.reader.member_deref(module_addr, "module", "name")?;
            let candidate = self.reader.read_c_string(name_addr, 64)?;
            if candidate == name {
                return Ok(module_addr);
            }

            node = self.reader.member_deref(node, "list_head", "next")?;
        }

        Err(Error::lookup(format!(
            "{name} is not loaded (modules list walk exceeded {MODULE_LIST_WALK_LIMIT} entries)"
        )))
    }

    /// Step 4: dereference `module.sect_attrs` and scan `attrs[i].name`
    /// for `section_name`, returning `attrs[i].address` on a match.
    fn section_base(&self, module_addr: u64, section_name: &str) -> Result<u64> {
        let sect_attrs = self
            .reader
            .member_deref(module_addr, "module", "sect_attrs")?;
        let nsections = self
            .reader
            .read_unsigned(sect_attrs, "module_sect_attrs", "nsections")?;

        for i in 0..nsections {
            let attr_addr = self
                .reader
                .subscript(sect_attrs, "module_sect_attrs", i)?;
            let name_addr = self
                .reader
                .member_deref(attr_addr, "module_sect_attr", "name")?;
            let name = self.reader.read_c_string(name_addr, 64)?;
            if name == section_name {
                return self
                    .reader
                    .read_unsigned(attr_addr, "module_sect_attr", "address");
            }
        }

        Err(Error::lookup(format!(
            "section {section_name} not found in module's sect_attrs"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// A fake kernel address space: every address used below is a plain
    /// made-up tag, and `ObjectReader` methods are table lookups instead of
    /// real DWARF-type-driven memory reads. Good enough to exercise the
    /// list walk and section lookup without needing a real kernel image.
    #[derive(Default)]
    struct FakeKernel {
        list_next: HashMap<u64, u64>,
        module_of_list_node: HashMap<u64, u64>,
        module_name_addr: HashMap<u64, u64>,
        strings: HashMap<u64, String>,
        sect_attrs_of_module: HashMap<u64, u64>,
        nsections: HashMap<u64, u64>,
        attr_addr: HashMap<(u64, u64), u64>, // (sect_attrs_addr, index) -> attr addr
        attr_name_addr: HashMap<u64, u64>,
        attr_address: HashMap<u64, u64>,
    }

    impl ObjectReader for FakeKernel {
        fn member_deref(&self, base: u64, type_name: &str, member: &str) -> Result<u64> {
            let table = match (type_name, member) {
                ("list_head", "next") => &self.list_next,
                ("module", "name") => &self.module_name_addr,
                ("module", "sect_attrs") => &self.sect_attrs_of_module,
                ("module_sect_attr", "name") => &self.attr_name_addr,
                _ => return Err(Error::lookup(format!("unmodeled member {type_name}.{member}"))),
            };
            table
                .get(&base)
                .copied()
                .ok_or_else(|| Error::lookup(format!("no {type_name}.{member} at 0x{base:x}")))
        }

        fn container_of(&self, member_addr: u64, type_name: &str, member: &str) -> Result<u64> {
            assert_eq!((type_name, member), ("module", "list"));
            self.module_of_list_node
                .get(&member_addr)
                .copied()
                .ok_or_else(|| Error::lookup("no containing module"))
        }

        fn subscript(&self, base: u64, type_name: &str, index: u64) -> Result<u64> {
            assert_eq!(type_name, "module_sect_attrs");
            self.attr_addr
                .get(&(base, index))
                .copied()
                .ok_or_else(|| Error::lookup("index out of range"))
        }

        fn read_unsigned(&self, base: u64, type_name: &str, member: &str) -> Result<u64> {
            match (type_name, member) {
                ("module_sect_attrs", "nsections") => self
                    .nsections
                    .get(&base)
                    .copied()
                    .ok_or_else(|| Error::lookup("no nsections")),
                ("module_sect_attr", "address") => self
                    .attr_address
                    .get(&base)
                    .copied()
                    .ok_or_else(|| Error::lookup("no attr address")),
                _ => Err(Error::lookup(format!("unmodeled read_unsigned {type_name}.{member}"))),
            }
        }

        fn read_c_string(&self, addr: u64, _max_len: usize) -> Result<String> {
            self.strings
                .get(&addr)
                .cloned()
                .ok_or_else(|| Error::lookup(format!("no string at 0x{addr:x}")))
        }
    }

    #[test]
    fn vmlinux_relocation_applies_kaslr_offset() {
        let vmcoreinfo = VmcoreInfo {
            osrelease: "5.10.0".into(),
            kaslr_offset: 0x1000000,
        };
        let mut symbol = Symbol::new("my_symbol", 0xffffffff81000000);
        KernelRelocator::relocate_vmlinux(&vmcoreinfo, &mut symbol);
        assert_eq!(symbol.address, 0xffffffff82000000);
    }

    #[test]
    fn module_lookup_fails_when_list_returns_to_head_immediately() {
        const HEAD: u64 = 0x1000;
        let mut fake = FakeKernel::default();
        fake.list_next.insert(HEAD, HEAD);

        let relocator = KernelRelocator::new(&fake, HEAD);
        let err = relocator.find_loaded_module("foo").unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
    }

    #[test]
    fn module_list_walk_and_section_lookup_resolve_live_address() {
        const HEAD: u64 = 0x1000;
        const NODE_FOO: u64 = 0x2000;
        const MODULE_FOO: u64 = 0x3000;
        const NAME_ADDR: u64 = 0x4000;
        const SECT_ATTRS: u64 = 0x5000;
        const ATTR0: u64 = 0x6000;
        const ATTR0_NAME: u64 = 0x7000;

        let mut fake = FakeKernel::default();
        fake.list_next.insert(HEAD, NODE_FOO);
        fake.list_next.insert(NODE_FOO, HEAD);
        fake.module_of_list_node.insert(NODE_FOO, MODULE_FOO);
        fake.module_name_addr.insert(MODULE_FOO, NAME_ADDR);
        fake.strings.insert(NAME_ADDR, "foo".into());
        fake.sect_attrs_of_module.insert(MODULE_FOO, SECT_ATTRS);
        fake.nsections.insert(SECT_ATTRS, 1);
        fake.attr_addr.insert((SECT_ATTRS, 0), ATTR0);
        fake.attr_name_addr.insert(ATTR0, ATTR0_NAME);
        fake.strings.insert(ATTR0_NAME, ".text".into());
        fake.attr_address.insert(ATTR0, 0xffffffffc0010000);

        let relocator = KernelRelocator::new(&fake, HEAD);
        let module_addr = relocator.find_loaded_module("foo").unwrap();
        assert_eq!(module_addr, MODULE_FOO);
        let section_addr = relocator.section_base(module_addr, ".text").unwrap();
        assert_eq!(section_addr, 0xffffffffc0010000);
    }
}
