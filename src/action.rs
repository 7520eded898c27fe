//! The decision tables at the heart of the engine, and the dispatcher that
//! turns a table cell into recorded side effects.
//!
//! The tables are literal data on purpose: auditing them against the runtime
//! loader's capabilities should be a matter of reading a matrix, not tracing
//! control flow. Every relocation decision in both passes goes through
//! `get_rel_action`; no code path picks an action any other way.

use crate::arch::Arch;
use crate::arch::Architecture;
use crate::args::Args;
use crate::args::OutputKind;
use crate::context::Context;
use crate::elf::Reloc;
use crate::elf::shf;
use crate::error;
use crate::input_section::InputSection;
use crate::object_file::ObjectFile;
use crate::symbol::Symbol;
use crate::symbol::SymbolFlags;
use anyhow::anyhow;
use std::sync::atomic::Ordering;

/// What must happen for one relocation to hold in the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Resolve statically; no supporting structures needed.
    None,

    /// The relocation cannot be represented in this output flavor.
    Error,

    /// Request a copy relocation for the target symbol.
    Copyrel,

    /// Request a PLT entry for the target symbol.
    Plt,

    /// Request a canonical PLT entry: the symbol's address becomes the PLT
    /// entry itself.
    Cplt,

    /// Emit a symbolic dynamic relocation for the runtime loader.
    Dynrel,

    /// Emit a base-relative dynamic relocation, or a RELR entry when the
    /// section participates in the compact relative-relocation table.
    Baserel,
}

/// Rows are output flavors: shared object, position-independent executable,
/// position-dependent executable. Columns are symbol classes: absolute,
/// local, imported data, imported function.
pub(crate) type ActionTable = [[Action; 4]; 3];

/// Decision table for absolute relocations narrower than the word size
/// (e.g. R_X86_64_32 on a 64-bit target). The runtime loader does not
/// support dynamic relocations narrower than the word size, so anything that
/// can't be resolved at link time is an error.
pub(crate) const ABS_NARROW_TABLE: ActionTable = [
    // Absolute      Local          Imported data    Imported code
    [Action::None, Action::Error, Action::Error, Action::Error], // Shared object
    [Action::None, Action::Error, Action::Error, Action::Error], // PIE
    [Action::None, Action::None, Action::Copyrel, Action::Cplt], // Executable
];

/// Decision table for word-size absolute relocations (e.g. R_X86_64_64).
/// Unlike the narrow case, whatever we can't resolve at link time can be
/// deferred to the runtime loader.
pub(crate) const ABS_WORD_TABLE: ActionTable = [
    // Absolute      Local            Imported data   Imported code
    [Action::None, Action::Baserel, Action::Dynrel, Action::Dynrel], // Shared object
    [Action::None, Action::Baserel, Action::Dynrel, Action::Dynrel], // PIE
    [Action::None, Action::None, Action::Copyrel, Action::Cplt],     // Executable
];

/// Word-size absolute table for PPC64 `.toc` sections. The TOC is a
/// compiler-generated GOT-like section whose values no user code reads
/// directly, so every entry can be resolved at load time and neither copy
/// relocations nor canonical PLTs are ever needed.
pub(crate) const ABS_WORD_TOC_TABLE: ActionTable = [
    // Absolute      Local            Imported data   Imported code
    [Action::None, Action::Baserel, Action::Dynrel, Action::Dynrel], // Shared object
    [Action::None, Action::Baserel, Action::Dynrel, Action::Dynrel], // PIE
    [Action::None, Action::None, Action::Dynrel, Action::Dynrel],    // Executable
];

/// Decision table for PC-relative relocations (e.g. R_X86_64_PC32). The
/// runtime loader does not support PC-relative dynamic relocations.
pub(crate) const PCREL_TABLE: ActionTable = [
    // Absolute       Local          Imported data    Imported code
    [Action::Error, Action::None, Action::Error, Action::Plt],    // Shared object
    [Action::Error, Action::None, Action::Copyrel, Action::Plt],  // PIE
    [Action::None, Action::None, Action::Copyrel, Action::Cplt],  // Executable
];

fn output_row(args: &Args) -> usize {
    match args.output_kind() {
        OutputKind::SharedObject => 0,
        OutputKind::PieExecutable => 1,
        OutputKind::Executable => 2,
    }
}

fn symbol_column(sym: &Symbol) -> usize {
    if sym.is_absolute() {
        0
    } else if !sym.is_imported {
        1
    } else if sym.get_type() != object::elf::STT_FUNC {
        2
    } else {
        3
    }
}

pub(crate) fn get_rel_action(args: &Args, table: &ActionTable, sym: &Symbol) -> Action {
    table[output_row(args)][symbol_column(sym)]
}

/// Selects the word-size absolute table, honouring the PPC64 `.toc`
/// exception.
pub(crate) fn abs_dyn_action<A: Arch>(args: &Args, isec: &InputSection, sym: &Symbol) -> Action {
    if A::ARCHITECTURE == Architecture::Ppc64 && isec.name() == ".toc" {
        return get_rel_action(args, &ABS_WORD_TOC_TABLE, sym);
    }
    get_rel_action(args, &ABS_WORD_TABLE, sym)
}

/// Records the side effects of a scan-pass action: symbol capability flags,
/// per-file dynamic relocation counts and diagnostics.
pub(crate) fn dispatch<A: Arch>(
    ctx: &Context,
    isec: &InputSection,
    file: &ObjectFile,
    action: Action,
    sym: &Symbol,
    rel: &Reloc,
) {
    match action {
        Action::None => {}
        Action::Error => report_unrepresentable::<A>(ctx, isec, file, sym, rel),
        Action::Copyrel => {
            // A protected symbol promises its defining object that the
            // object's own references resolve within it. Duplicating the
            // storage into the executable's bss would break that, so this
            // fails no matter what `-z copyreloc` says.
            if sym.is_protected() {
                let defined_in = sym
                    .defined_in
                    .map(|origin| format!(", defined in {origin}"))
                    .unwrap_or_default();
                ctx.report_error(anyhow!(
                    "{file}:({}): cannot make copy relocation for protected symbol \
                     `{}`{defined_in}; recompile with -fPIC",
                    isec.name(),
                    sym.display_name(ctx.args.demangle),
                ));
            } else if !ctx.args.z_copyreloc {
                report_unrepresentable::<A>(ctx, isec, file, sym, rel);
            } else {
                sym.flags.or_assign(SymbolFlags::NEEDS_COPYREL);
            }
        }
        Action::Plt => sym.flags.or_assign(SymbolFlags::NEEDS_PLT),
        Action::Cplt => sym.flags.or_assign(SymbolFlags::NEEDS_CPLT),
        Action::Dynrel => {
            debug_assert!(sym.is_imported);
            check_textrel::<A>(ctx, isec, file, sym, rel);
            file.num_dynrel.fetch_add(1, Ordering::Relaxed);
        }
        Action::Baserel => {
            check_textrel::<A>(ctx, isec, file, sym, rel);
            if !isec.is_relr_reloc::<A>(ctx, rel) {
                file.num_dynrel.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn report_unrepresentable<A: Arch>(
    ctx: &Context,
    isec: &InputSection,
    file: &ObjectFile,
    sym: &Symbol,
    rel: &Reloc,
) {
    let advice = if sym.is_absolute() {
        "-fno-PIC"
    } else {
        "-fPIC"
    };
    ctx.report_error(anyhow!(
        "{file}:({}): {} relocation at offset 0x{:x} against symbol `{}' cannot be \
         used; recompile with {advice}",
        isec.name(),
        A::rel_type_to_string(rel.r_type),
        rel.r_offset,
        sym.display_name(ctx.args.demangle),
    ));
}

fn check_textrel<A: Arch>(
    ctx: &Context,
    isec: &InputSection,
    file: &ObjectFile,
    sym: &Symbol,
    rel: &Reloc,
) {
    if isec.flags().contains(shf::WRITE) {
        return;
    }
    if ctx.args.z_text {
        report_unrepresentable::<A>(ctx, isec, file, sym, rel);
    } else if ctx.args.warn_textrel {
        error::warning(&format!(
            "{file}:({}): relocation against symbol `{}` in read-only section",
            isec.name(),
            sym.display_name(ctx.args.demangle),
        ));
    }
    ctx.has_textrel.store(true, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;
    use crate::test_utils;

    fn absolute_sym() -> Symbol<'static> {
        Symbol::new(
            "abs",
            test_utils::esym(object::elf::STT_OBJECT, 0, object::elf::SHN_ABS),
            false,
        )
    }

    fn local_sym() -> Symbol<'static> {
        Symbol::new("local", test_utils::esym(object::elf::STT_OBJECT, 0, 1), false)
    }

    fn imported_data_sym() -> Symbol<'static> {
        Symbol::new(
            "shared_data",
            test_utils::esym(object::elf::STT_OBJECT, 0, object::elf::SHN_UNDEF),
            true,
        )
    }

    fn imported_func_sym() -> Symbol<'static> {
        Symbol::new(
            "shared_fn",
            test_utils::esym(object::elf::STT_FUNC, 0, object::elf::SHN_UNDEF),
            true,
        )
    }

    fn args_for(kind: OutputKind) -> Args {
        Args {
            shared: kind == OutputKind::SharedObject,
            pie: kind == OutputKind::PieExecutable,
            ..Args::default()
        }
    }

    #[test]
    fn test_symbol_columns() {
        assert_eq!(symbol_column(&absolute_sym()), 0);
        assert_eq!(symbol_column(&local_sym()), 1);
        assert_eq!(symbol_column(&imported_data_sym()), 2);
        assert_eq!(symbol_column(&imported_func_sym()), 3);
    }

    #[test]
    fn test_narrow_abs_table() {
        let sym = imported_data_sym();
        assert_eq!(
            get_rel_action(&args_for(OutputKind::Executable), &ABS_NARROW_TABLE, &sym),
            Action::Copyrel
        );
        assert_eq!(
            get_rel_action(&args_for(OutputKind::PieExecutable), &ABS_NARROW_TABLE, &sym),
            Action::Error
        );
        assert_eq!(
            get_rel_action(&args_for(OutputKind::SharedObject), &ABS_NARROW_TABLE, &sym),
            Action::Error
        );
        assert_eq!(
            get_rel_action(
                &args_for(OutputKind::Executable),
                &ABS_NARROW_TABLE,
                &imported_func_sym()
            ),
            Action::Cplt
        );
        // An absolute value works everywhere without help.
        assert_eq!(
            get_rel_action(
                &args_for(OutputKind::SharedObject),
                &ABS_NARROW_TABLE,
                &absolute_sym()
            ),
            Action::None
        );
    }

    #[test]
    fn test_word_abs_table() {
        let local = local_sym();
        assert_eq!(
            get_rel_action(&args_for(OutputKind::SharedObject), &ABS_WORD_TABLE, &local),
            Action::Baserel
        );
        assert_eq!(
            get_rel_action(&args_for(OutputKind::Executable), &ABS_WORD_TABLE, &local),
            Action::None
        );
        assert_eq!(
            get_rel_action(
                &args_for(OutputKind::SharedObject),
                &ABS_WORD_TABLE,
                &imported_func_sym()
            ),
            Action::Dynrel
        );
    }

    #[test]
    fn test_pcrel_table() {
        assert_eq!(
            get_rel_action(
                &args_for(OutputKind::PieExecutable),
                &PCREL_TABLE,
                &imported_func_sym()
            ),
            Action::Plt
        );
        assert_eq!(
            get_rel_action(
                &args_for(OutputKind::SharedObject),
                &PCREL_TABLE,
                &absolute_sym()
            ),
            Action::Error
        );
        assert_eq!(
            get_rel_action(
                &args_for(OutputKind::Executable),
                &PCREL_TABLE,
                &imported_data_sym()
            ),
            Action::Copyrel
        );
    }
}
