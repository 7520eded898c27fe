//! Configuration consumed by the relocation engine.
//!
//! Command-line parsing is the linker driver's job. It fills this struct in
//! from whatever flags it accepted and hands it to us via the `Context`.

use crate::arch::Architecture;

#[derive(Debug, Clone)]
pub struct Args {
    pub arch: Architecture,

    /// Produce a shared object rather than an executable.
    pub shared: bool,

    /// Produce a position-independent executable. Ignored when `shared` is
    /// set.
    pub pie: bool,

    /// `-z text`: fail the link rather than emit a dynamic relocation against
    /// a read-only section.
    pub z_text: bool,

    /// `--warn-textrel`: warn about dynamic relocations against read-only
    /// sections instead of silently accepting them.
    pub warn_textrel: bool,

    /// `-z copyreloc`: allow copy relocations for direct references to data
    /// defined in shared objects.
    pub z_copyreloc: bool,

    /// `-z pack-relative-relocs`: base-relative relocations in suitably
    /// aligned sections go to the compact RELR table instead of `.rela.dyn`.
    pub pack_dyn_relocs_relr: bool,

    pub unresolved_symbols: UnresolvedSymbols,

    /// Demangle symbol names in diagnostics.
    pub demangle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedSymbols {
    Error,
    Warn,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    SharedObject,
    PieExecutable,
    Executable,
}

impl Args {
    pub fn output_kind(&self) -> OutputKind {
        if self.shared {
            OutputKind::SharedObject
        } else if self.pie {
            OutputKind::PieExecutable
        } else {
            OutputKind::Executable
        }
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            arch: Architecture::X86_64,
            shared: false,
            pie: false,
            z_text: false,
            warn_textrel: false,
            z_copyreloc: true,
            pack_dyn_relocs_relr: false,
            unresolved_symbols: UnresolvedSymbols::Error,
            demangle: false,
        }
    }
}

impl OutputKind {
    pub fn is_executable(self) -> bool {
        !matches!(self, OutputKind::SharedObject)
    }

    pub fn is_relocatable(self) -> bool {
        !matches!(self, OutputKind::Executable)
    }
}
