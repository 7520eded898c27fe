//! Append cursor for the dynamic relocation stream.
//!
//! The layout pass sizes `.rela.dyn` from the per-file counters accumulated
//! during the scan pass and hands each apply worker a disjoint sub-slice, so
//! concurrent workers never contend for entries.

use crate::elf::Rela;
use crate::error::Result;
use crate::object_file::ObjectFile;
use crate::slice;
use anyhow::anyhow;
use object::LittleEndian;
use std::sync::atomic::Ordering;

pub struct RelaWriter<'out> {
    rela_dyn: &'out mut [Rela],
    num_written: usize,
}

impl<'out> RelaWriter<'out> {
    pub fn new(rela_dyn: &'out mut [Rela]) -> Self {
        Self {
            rela_dyn,
            num_written: 0,
        }
    }

    pub fn push(&mut self, r_offset: u64, r_type: u32, r_sym: u32, r_addend: i64) -> Result {
        let e = LittleEndian;
        let rela = slice::take_first_mut(&mut self.rela_dyn)
            .ok_or_else(|| anyhow!("Insufficient .rela.dyn allocation"))?;
        rela.r_offset.set(e, r_offset);
        rela.r_addend.set(e, r_addend);
        rela.set_r_info(e, false, r_sym, r_type);
        self.num_written += 1;
        Ok(())
    }

    pub fn num_written(&self) -> usize {
        self.num_written
    }

    pub fn remaining(&self) -> usize {
        self.rela_dyn.len()
    }
}

/// Splits the dynamic relocation table into one disjoint cursor per file,
/// sized from the counters the scan pass accumulated. Apply workers for
/// different files can then append concurrently without coordination.
pub fn split_writers<'out>(
    files: &[ObjectFile],
    mut rela_dyn: &'out mut [Rela],
) -> Result<Vec<RelaWriter<'out>>> {
    let mut writers = Vec::with_capacity(files.len());
    for file in files {
        let count = file.num_dynrel.load(Ordering::Relaxed) as usize;
        let entries = slice::try_slice_take_prefix_mut(&mut rela_dyn, count)
            .ok_or_else(|| anyhow!("Insufficient .rela.dyn allocation for {file}"))?;
        writers.push(RelaWriter::new(entries));
    }
    Ok(writers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn test_push_until_full() {
        let mut entries = [test_utils::rela(0, 0, 0, 0); 2];
        let mut writer = RelaWriter::new(&mut entries);
        writer.push(0x1000, object::elf::R_X86_64_RELATIVE, 0, 0x2000).unwrap();
        writer.push(0x1008, object::elf::R_X86_64_64, 3, -8).unwrap();
        assert_eq!(writer.num_written(), 2);
        assert!(writer.push(0x1010, object::elf::R_X86_64_64, 1, 0).is_err());

        let e = LittleEndian;
        assert_eq!(entries[0].r_offset.get(e), 0x1000);
        assert_eq!(entries[0].r_type(e, false), object::elf::R_X86_64_RELATIVE);
        assert_eq!(entries[1].r_sym(e, false), 3);
        assert_eq!(entries[1].r_addend.get(e), -8);
    }
}
