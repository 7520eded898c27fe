//! The parallel scan-phase driver.
//!
//! Every input section is an independent unit of work; the only state the
//! scan mutates is atomic (symbol capability flags, per-file counters, the
//! text-relocation flag) or lock-protected (diagnostics), so sections are
//! scanned with no further coordination. A barrier between this pass, the
//! caller's layout pass and the apply pass is implied by the call sequence.

use crate::aarch64::AArch64;
use crate::arch::Arch;
use crate::arch::Architecture;
use crate::context::Context;
use crate::elf::shf;
use crate::error::Result;
use crate::object_file::ObjectFile;
use crate::ppc64::Ppc64;
use crate::x86_64::X86_64;
use anyhow::Context as _;
use rayon::prelude::*;

/// Runs the scan pass for the architecture the context was configured with.
/// Drivers that statically know their architecture can call `scan_files`
/// directly.
pub fn scan_relocations<'data>(ctx: &Context<'data>, files: &[ObjectFile<'data>]) -> Result {
    match ctx.args.arch {
        Architecture::X86_64 => scan_files::<X86_64>(ctx, files),
        Architecture::AArch64 => scan_files::<AArch64>(ctx, files),
        Architecture::Ppc64 => scan_files::<Ppc64>(ctx, files),
    }
}

/// Walks all relocations of all allocatable sections and records the
/// capability requests and counters that the layout pass turns into PLT,
/// copy-relocation and `.rela.dyn` reservations. Non-allocatable sections
/// aren't scanned; their relocations resolve statically in `write_to`.
///
/// Unrepresentable relocations are recorded in the context and scanning
/// continues; the next checkpoint reports them all at once. Only corrupt
/// inputs fail this function directly.
#[tracing::instrument(skip_all, name = "Scan relocations")]
pub fn scan_files<'data, A: Arch>(
    ctx: &Context<'data>,
    files: &[ObjectFile<'data>],
) -> Result {
    debug_assert_eq!(ctx.args.arch, A::ARCHITECTURE);
    files.par_iter().try_for_each(|file| -> Result {
        for isec in &file.sections {
            if !isec.flags().contains(shf::ALLOC) {
                continue;
            }
            isec.scan_relocations::<A>(ctx, file).with_context(|| {
                format!("Failed to scan relocations of {file}:({})", isec.name())
            })?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::elf::RelocationList;
    use crate::input_section::InputSection;
    use crate::object_file::FileId;
    use crate::symbol::Symbol;
    use crate::test_utils;
    use bumpalo_herd::Herd;
    use object::SectionIndex;
    use object::elf::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_scan_covers_alloc_sections_of_every_file() {
        let herd = Herd::new();
        let args = Args {
            shared: true,
            ..Args::default()
        };
        let data = vec![0u8; 16];
        let local = Symbol::new("local_data", test_utils::esym(STT_OBJECT, 0, 1), false);
        local.set_address(0x1000);
        let relas = [test_utils::rela(0, R_X86_64_64, 0, 0)];
        let debug_relas = [test_utils::rela(0, R_X86_64_64, 0, 0)];
        let ctx = Context::new(args, &herd);

        let mut files = Vec::new();
        for (id, filename) in [(0, "a.o"), (1, "b.o")] {
            let mut file = test_utils::object_file(filename, &data, vec![&local]);
            file.file_id = FileId(id);
            let alloc_shdr = test_utils::section_header(
                SHT_PROGBITS,
                (SHF_ALLOC | SHF_WRITE) as u64,
                0,
                16,
                8,
            );
            let debug_shdr = test_utils::section_header(SHT_PROGBITS, 0, 0, 16, 8);
            file.sections.push(
                InputSection::new(
                    &ctx,
                    FileId(id),
                    &data,
                    &alloc_shdr,
                    ".data",
                    SectionIndex(1),
                    RelocationList::Rela(&relas),
                )
                .unwrap(),
            );
            // Non-allocatable sections are skipped by the scan.
            file.sections.push(
                InputSection::new(
                    &ctx,
                    FileId(id),
                    &data,
                    &debug_shdr,
                    ".debug_info",
                    SectionIndex(2),
                    RelocationList::Rela(&debug_relas),
                )
                .unwrap(),
            );
            files.push(file);
        }

        scan_relocations(&ctx, &files).unwrap();
        for file in &files {
            assert_eq!(file.num_dynrel.load(Ordering::Relaxed), 1);
        }
        assert!(ctx.checkpoint().is_ok());
    }

    #[test]
    fn test_unsupported_relocation_type_is_fatal() {
        let herd = Herd::new();
        let data = vec![0u8; 16];
        let local = Symbol::new("local_data", test_utils::esym(STT_OBJECT, 0, 1), false);
        let relas = [test_utils::rela(0, R_X86_64_TLSGD, 0, 0)];
        let ctx = Context::new(Args::default(), &herd);
        let mut file = test_utils::object_file("a.o", &data, vec![&local]);
        let shdr = test_utils::section_header(
            SHT_PROGBITS,
            (SHF_ALLOC | SHF_WRITE) as u64,
            0,
            16,
            8,
        );
        file.sections.push(
            InputSection::new(
                &ctx,
                FileId(0),
                &data,
                &shdr,
                ".data",
                SectionIndex(1),
                RelocationList::Rela(&relas),
            )
            .unwrap(),
        );

        let files = [file];
        let error = scan_relocations(&ctx, &files).unwrap_err();
        assert!(format!("{error:#}").contains("Unsupported relocation type"));
    }
}
