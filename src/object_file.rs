//! Per-object aggregate consumed by the engine. The loading and resolution
//! collaborators fill one of these in for every relocatable object that
//! survives archive selection.

use crate::elf::SectionHeader;
use crate::elf::SymtabEntry;
use crate::error::Result;
use crate::input_section::InputSection;
use crate::symbol::Symbol;
use anyhow::Context as _;
use object::LittleEndian;
use std::fmt::Display;
use std::sync::atomic::AtomicU64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

pub struct ObjectFile<'data> {
    pub file_id: FileId,

    /// Display name of the input, e.g. the path given on the command line or
    /// `archive.a(member.o)`.
    pub filename: &'data str,

    /// The mapped bytes of the whole file.
    pub data: &'data [u8],

    pub elf_sections: &'data [SectionHeader],

    pub elf_syms: &'data [SymtabEntry],

    pub symbol_strtab: &'data [u8],

    /// Resolved symbols, parallel to `elf_syms`. Each entry points at the
    /// canonical `Symbol` chosen by the resolution pass, so two files that
    /// reference the same global share the same pointer.
    pub symbols: Vec<&'data Symbol<'data>>,

    pub sections: Vec<InputSection<'data>>,

    /// Number of `.rela.dyn` entries the apply pass will emit for this file's
    /// sections. Accumulated during the scan pass; the layout pass sizes the
    /// dynamic relocation table from the sum over all files.
    pub num_dynrel: AtomicU64,
}

impl<'data> ObjectFile<'data> {
    pub fn symbol(&self, index: u32) -> Result<&'data Symbol<'data>> {
        self.symbols
            .get(index as usize)
            .copied()
            .with_context(|| format!("{self}: invalid relocation symbol index {index}"))
    }

    /// Returns the NUL-terminated string at `offset` in the symbol string
    /// table, or `None` if the offset is out of range or the name isn't
    /// UTF-8.
    pub fn symbol_name_at(&self, offset: u32) -> Option<&'data str> {
        let bytes = self.symbol_strtab.get(offset as usize..)?;
        let end = bytes.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&bytes[..end]).ok()
    }

    /// The source file name recorded by the compiler, i.e. the name of the
    /// first `STT_FILE` symbol. Used to label diagnostics.
    pub fn get_source_name(&self) -> Option<&'data str> {
        let esym = self
            .elf_syms
            .iter()
            .find(|esym| esym.st_info & 0xf == object::elf::STT_FILE)?;
        let name = self.symbol_name_at(esym.st_name.get(LittleEndian))?;
        if name.is_empty() { None } else { Some(name) }
    }
}

impl Display for ObjectFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.filename)
    }
}
