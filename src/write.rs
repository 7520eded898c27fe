//! The parallel apply-phase driver.
//!
//! Runs after the caller's layout pass has assigned section and symbol
//! addresses and reserved the tables the scan pass asked for. Each file's
//! sections are emitted into caller-partitioned output buffers, so workers
//! never alias each other's bytes, and each file appends dynamic relocations
//! through its own disjoint cursor (see `dynrel::split_writers`).

use crate::aarch64::AArch64;
use crate::arch::Arch;
use crate::arch::Architecture;
use crate::context::Context;
use crate::dynrel::RelaWriter;
use crate::error::Result;
use crate::object_file::ObjectFile;
use crate::ppc64::Ppc64;
use crate::x86_64::X86_64;
use anyhow::ensure;
use rayon::prelude::*;

/// Where one file's sections land in the output image.
pub struct FileOutput<'out> {
    /// One buffer per section, in section order. `None` for sections the
    /// layout pass didn't emit (NOBITS, discarded).
    pub section_buffers: Vec<Option<&'out mut [u8]>>,

    pub dynrel: RelaWriter<'out>,
}

/// Runs the apply pass for the architecture the context was configured
/// with. Drivers that statically know their architecture can call
/// `write_sections` directly.
pub fn write_files<'data>(
    ctx: &Context<'data>,
    files: &[ObjectFile<'data>],
    outputs: &mut [FileOutput<'_>],
) -> Result {
    match ctx.args.arch {
        Architecture::X86_64 => write_sections::<X86_64>(ctx, files, outputs),
        Architecture::AArch64 => write_sections::<AArch64>(ctx, files, outputs),
        Architecture::Ppc64 => write_sections::<Ppc64>(ctx, files, outputs),
    }
}

/// Emits every section of every file, patching relocations and appending
/// dynamic relocations. The scan pass and the layout pass must both have
/// completed.
#[tracing::instrument(skip_all, name = "Write sections")]
pub fn write_sections<'data, A: Arch>(
    ctx: &Context<'data>,
    files: &[ObjectFile<'data>],
    outputs: &mut [FileOutput<'_>],
) -> Result {
    debug_assert_eq!(ctx.args.arch, A::ARCHITECTURE);
    ensure!(
        files.len() == outputs.len(),
        "expected one output placement per file"
    );
    files
        .par_iter()
        .zip(outputs.par_iter_mut())
        .try_for_each(|(file, output)| -> Result {
            ensure!(
                file.sections.len() == output.section_buffers.len(),
                "{file}: expected one output buffer per section"
            );
            for (isec, buf) in file.sections.iter().zip(&mut output.section_buffers) {
                if let Some(buf) = buf.as_deref_mut() {
                    isec.write_to::<A>(ctx, file, buf, &mut output.dynrel)?;
                }
            }
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::dynrel::split_writers;
    use crate::elf::RelocationList;
    use crate::input_section::InputSection;
    use crate::object_file::FileId;
    use crate::scan::scan_relocations;
    use crate::symbol::Symbol;
    use crate::test_utils;
    use bumpalo_herd::Herd;
    use object::LittleEndian;
    use object::SectionIndex;
    use object::elf::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_dynrel_counters_match_emitted_entries() {
        let herd = Herd::new();
        let args = Args {
            shared: true,
            ..Args::default()
        };
        let data = vec![0u8; 16];

        let local = Symbol::new("local_data", test_utils::esym(STT_OBJECT, 0, 1), false);
        local.set_address(0x1000);
        let imported = Symbol::new(
            "shared_data",
            test_utils::esym(STT_OBJECT, 0, SHN_UNDEF),
            true,
        );
        imported.set_dynsym_idx(2);

        // File a: one base-relative and one symbolic relocation.
        let relas_a = [
            test_utils::rela(0, R_X86_64_64, 0, 8),
            test_utils::rela(8, R_X86_64_64, 1, 0),
        ];
        // File b: a single base-relative relocation.
        let relas_b = [test_utils::rela(0, R_X86_64_64, 0, 0)];
        let ctx = Context::new(args, &herd);

        let mut files = Vec::new();
        for (id, filename, relas) in [(0u32, "a.o", &relas_a[..]), (1, "b.o", &relas_b[..])] {
            let mut file =
                test_utils::object_file(filename, &data, vec![&local, &imported]);
            file.file_id = FileId(id);
            let shdr = test_utils::section_header(
                SHT_PROGBITS,
                (SHF_ALLOC | SHF_WRITE) as u64,
                0,
                16,
                8,
            );
            let mut isec = InputSection::new(
                &ctx,
                FileId(id),
                &data,
                &shdr,
                ".data",
                SectionIndex(1),
                RelocationList::Rela(relas),
            )
            .unwrap();
            isec.set_address(0x3000 + u64::from(id) * 0x100);
            file.sections.push(isec);
            files.push(file);
        }

        scan_relocations(&ctx, &files).unwrap();
        let total: u64 = files
            .iter()
            .map(|file| file.num_dynrel.load(Ordering::Relaxed))
            .sum();
        assert_eq!(total, 3);

        let mut rela_dyn = vec![test_utils::rela(0, 0, 0, 0); total as usize];
        let writers = split_writers(&files, &mut rela_dyn).unwrap();
        let mut buffers: Vec<Vec<u8>> = files.iter().map(|_| vec![0u8; 16]).collect();
        let mut outputs: Vec<FileOutput> = writers
            .into_iter()
            .zip(&mut buffers)
            .map(|(dynrel, buf)| FileOutput {
                section_buffers: vec![Some(buf.as_mut_slice())],
                dynrel,
            })
            .collect();

        write_files(&ctx, &files, &mut outputs).unwrap();

        let emitted: usize = outputs.iter().map(|output| output.dynrel.num_written()).sum();
        assert_eq!(emitted, 3);

        let e = LittleEndian;
        // File a's entries come first: the base-relative one, then the
        // symbolic one.
        assert_eq!(rela_dyn[0].r_offset.get(e), 0x3000);
        assert_eq!(rela_dyn[0].r_type(e, false), R_X86_64_RELATIVE);
        assert_eq!(rela_dyn[0].r_addend.get(e), 0x1008);
        assert_eq!(rela_dyn[1].r_offset.get(e), 0x3008);
        assert_eq!(rela_dyn[1].r_type(e, false), R_X86_64_64);
        assert_eq!(rela_dyn[1].r_sym(e, false), 2);
        assert_eq!(rela_dyn[2].r_offset.get(e), 0x3100);
        assert_eq!(rela_dyn[2].r_type(e, false), R_X86_64_RELATIVE);
        assert_eq!(rela_dyn[2].r_addend.get(e), 0x1000);
    }

    #[test]
    fn test_split_writers_rejects_short_allocation() {
        let data = vec![0u8; 8];
        let file = test_utils::object_file("a.o", &data, vec![]);
        file.num_dynrel.store(2, Ordering::Relaxed);
        let files = [file];
        let mut rela_dyn = vec![test_utils::rela(0, 0, 0, 0); 1];
        assert!(split_writers(&files, &mut rela_dyn).is_err());
    }
}
