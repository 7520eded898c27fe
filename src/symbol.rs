//! The engine's view of a resolved symbol.
//!
//! Symbols are owned by the symbol-resolution collaborator and shared with
//! every object file that references them, so a resolved symbol is identified
//! by its address. Everything the engine writes to a symbol during the scan
//! pass goes through atomics: capability flags accumulate by or-ing only, and
//! addresses are assigned by the layout pass through shared references.

use crate::elf::SymtabEntry;
use crate::error::Result;
use anyhow::ensure;
use bitflags::bitflags;
use object::LittleEndian;
use std::borrow::Cow;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

bitflags! {
    /// Capability requests accumulated against a symbol by the scan pass. The
    /// layout pass reads these to reserve PLT entries and copy-relocation
    /// space before the apply pass runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolFlags: u8 {
        /// A PLT entry is needed.
        const NEEDS_PLT = 1 << 0;

        /// A canonical PLT entry is needed: the symbol's address as seen by
        /// position-dependent code is the PLT entry itself.
        const NEEDS_CPLT = 1 << 1;

        /// The symbol's initial bytes must be copied into the executable's
        /// bss so narrow non-PIC references can reach it.
        const NEEDS_COPYREL = 1 << 2;
    }
}

pub struct AtomicSymbolFlags(AtomicU8);

impl AtomicSymbolFlags {
    pub fn empty() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn fetch_or(&self, flags: SymbolFlags) -> SymbolFlags {
        // Gaining exclusive access to the cache line containing the atomic is
        // wasteful when all the bits are already set, which for hot symbols
        // is the common case, so check first.
        let current_bits = self.0.load(Ordering::Relaxed);
        if current_bits & flags.bits() == flags.bits() {
            return SymbolFlags::from_bits_retain(current_bits);
        }
        let previous_bits = self.0.fetch_or(flags.bits(), Ordering::Relaxed);
        SymbolFlags::from_bits_retain(previous_bits)
    }

    pub fn or_assign(&self, flags: SymbolFlags) {
        self.0.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> SymbolFlags {
        SymbolFlags::from_bits_retain(self.0.load(Ordering::Relaxed))
    }
}

impl std::fmt::Display for SymbolFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

pub struct Symbol<'data> {
    name: &'data str,

    /// The ELF symbol record of the chosen definition (or of a reference when
    /// the symbol is undefined). Supplies type, binding and visibility.
    pub esym: SymtabEntry,

    /// Defined by a shared object.
    pub is_imported: bool,

    /// Display name of the file that defines the symbol, when known. Used in
    /// diagnostics only.
    pub defined_in: Option<&'data str>,

    /// Runtime address, assigned by the layout pass.
    value: AtomicU64,

    /// Address of the symbol's PLT entry, when one was requested.
    plt_addr: AtomicU64,

    /// Index in the output dynamic symbol table. Zero means absent.
    dynsym_idx: AtomicU32,

    pub flags: AtomicSymbolFlags,
}

impl<'data> Symbol<'data> {
    pub fn new(name: &'data str, esym: SymtabEntry, is_imported: bool) -> Self {
        Self {
            name,
            esym,
            is_imported,
            defined_in: None,
            value: AtomicU64::new(0),
            plt_addr: AtomicU64::new(0),
            dynsym_idx: AtomicU32::new(0),
            flags: AtomicSymbolFlags::empty(),
        }
    }

    pub fn name(&self) -> &'data str {
        self.name
    }

    pub fn display_name(&self, demangle: bool) -> Cow<'data, str> {
        if demangle {
            symbolic_demangle::demangle(self.name)
        } else {
            Cow::Borrowed(self.name)
        }
    }

    fn st_shndx(&self) -> u16 {
        self.esym.st_shndx.get(LittleEndian)
    }

    /// An absolute value that won't change depending on load address. This is
    /// either a symbol defined with `SHN_ABS` or an undefined symbol, which
    /// resolves to zero regardless of load address.
    pub fn is_absolute(&self) -> bool {
        !self.is_imported
            && matches!(
                self.st_shndx(),
                object::elf::SHN_UNDEF | object::elf::SHN_ABS
            )
    }

    pub fn is_undefined(&self) -> bool {
        !self.is_imported && self.st_shndx() == object::elf::SHN_UNDEF
    }

    pub fn is_weak(&self) -> bool {
        self.esym.st_info >> 4 == object::elf::STB_WEAK
    }

    pub fn get_type(&self) -> u8 {
        self.esym.st_info & 0xf
    }

    pub fn st_visibility(&self) -> u8 {
        self.esym.st_other & 0x3
    }

    pub fn is_protected(&self) -> bool {
        self.st_visibility() == object::elf::STV_PROTECTED
    }

    pub fn set_address(&self, address: u64) {
        self.value.store(address, Ordering::Relaxed);
    }

    pub fn address(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set_plt_address(&self, address: u64) {
        self.plt_addr.store(address, Ordering::Relaxed);
    }

    /// The address references to this symbol resolve to. When a PLT entry was
    /// requested, that entry is the symbol's address as far as patched code
    /// is concerned; for a canonical PLT it is the symbol's address,
    /// full stop.
    pub fn resolved_addr(&self) -> u64 {
        if self
            .flags
            .get()
            .intersects(SymbolFlags::NEEDS_PLT | SymbolFlags::NEEDS_CPLT)
        {
            let plt_addr = self.plt_addr.load(Ordering::Relaxed);
            if plt_addr != 0 {
                return plt_addr;
            }
        }
        self.address()
    }

    pub fn set_dynsym_idx(&self, index: u32) {
        self.dynsym_idx.store(index, Ordering::Relaxed);
    }

    pub fn get_dynsym_idx(&self) -> Result<u32> {
        let index = self.dynsym_idx.load(Ordering::Relaxed);
        ensure!(
            index != 0,
            "symbol `{}` was not allocated a dynamic symbol table entry",
            self.name
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::SymtabEntry;
    use object::U16;
    use object::U32;
    use object::U64;

    fn esym(st_info: u8, st_other: u8, shndx: u16) -> SymtabEntry {
        SymtabEntry {
            st_name: U32::new(LittleEndian, 0),
            st_info,
            st_other,
            st_shndx: U16::new(LittleEndian, shndx),
            st_value: U64::new(LittleEndian, 0),
            st_size: U64::new(LittleEndian, 0),
        }
    }

    #[test]
    fn test_flags_accumulate_monotonically() {
        let flags = AtomicSymbolFlags::empty();
        assert_eq!(flags.fetch_or(SymbolFlags::NEEDS_PLT), SymbolFlags::empty());
        assert_eq!(
            flags.fetch_or(SymbolFlags::NEEDS_COPYREL),
            SymbolFlags::NEEDS_PLT
        );
        // Setting an already-set bit changes nothing.
        flags.or_assign(SymbolFlags::NEEDS_PLT);
        assert_eq!(
            flags.get(),
            SymbolFlags::NEEDS_PLT | SymbolFlags::NEEDS_COPYREL
        );
    }

    #[test]
    fn test_symbol_classification() {
        let abs = Symbol::new("abs", esym(0, 0, object::elf::SHN_ABS), false);
        assert!(abs.is_absolute());
        assert!(!abs.is_undefined());

        let undef_weak = Symbol::new(
            "w",
            esym(object::elf::STB_WEAK << 4, 0, object::elf::SHN_UNDEF),
            false,
        );
        assert!(undef_weak.is_undefined());
        assert!(undef_weak.is_weak());
        assert!(undef_weak.is_absolute());

        let imported = Symbol::new(
            "f",
            esym(object::elf::STT_FUNC, 0, object::elf::SHN_UNDEF),
            true,
        );
        assert!(!imported.is_absolute());
        assert!(!imported.is_undefined());
        assert_eq!(imported.get_type(), object::elf::STT_FUNC);
    }

    #[test]
    fn test_resolved_addr_prefers_plt() {
        let sym = Symbol::new("f", esym(object::elf::STT_FUNC, 0, 0), true);
        sym.set_address(0x5000);
        assert_eq!(sym.resolved_addr(), 0x5000);
        sym.flags.or_assign(SymbolFlags::NEEDS_PLT);
        sym.set_plt_address(0x1720);
        assert_eq!(sym.resolved_addr(), 0x1720);
    }
}
