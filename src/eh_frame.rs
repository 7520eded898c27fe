//! Common Information Entries from `.eh_frame`.
//!
//! Every object contributes near-identical CIEs, so the exception-frame
//! writer deduplicates them across the whole link. Two CIEs are
//! interchangeable iff their raw contents match and their relocations are
//! pointwise equivalent; crucially, equivalence compares the *resolved*
//! target symbols, not symbol table indices, so records from different
//! objects can merge.

use crate::arch::Arch;
use crate::error::Result;
use crate::input_section::InputSection;
use crate::object_file::ObjectFile;
use crate::symbol::Symbol;
use anyhow::Context as _;
use std::ops::Range;

pub struct CieRecord<'data> {
    /// Offset of the record within its `.eh_frame` section.
    pub input_offset: u64,

    contents: &'data [u8],

    rels: Vec<CieRel<'data>>,
}

struct CieRel<'data> {
    r_offset: u64,
    r_type: u32,
    sym: &'data Symbol<'data>,
    addend: i64,
}

impl<'data> CieRecord<'data> {
    /// `rel_range` selects the relocations of `isec` that land inside this
    /// record. Symbols and addends are resolved eagerly so comparison is
    /// cheap.
    pub fn new<A: Arch>(
        isec: &InputSection<'data>,
        file: &ObjectFile<'data>,
        input_offset: u64,
        len: usize,
        rel_range: Range<usize>,
    ) -> Result<Self> {
        let start = input_offset as usize;
        let contents = isec
            .contents()
            .get(start..start + len)
            .with_context(|| format!("{file}:({}): CIE record is out of bounds", isec.name()))?;

        let mut rels = Vec::with_capacity(rel_range.len());
        for rel in isec
            .relocations()
            .iter()
            .skip(rel_range.start)
            .take(rel_range.len())
        {
            let rel_info = A::relocation_from_raw(rel.r_type)?;
            rels.push(CieRel {
                r_offset: rel.r_offset,
                r_type: rel.r_type,
                sym: file.symbol(rel.r_sym)?,
                addend: isec.get_addend(&rel, rel_info.byte_size())?,
            });
        }

        Ok(Self {
            input_offset,
            contents,
            rels,
        })
    }

    pub fn contents(&self) -> &'data [u8] {
        self.contents
    }

    /// Hash of the record's raw contents. The deduplication pass buckets
    /// CIEs by this and only calls `equals` within a bucket.
    pub fn content_hash(&self) -> u64 {
        crate::hash::hash_bytes(self.contents)
    }

    pub fn equals(&self, other: &CieRecord) -> bool {
        if self.contents != other.contents {
            return false;
        }
        if self.rels.len() != other.rels.len() {
            return false;
        }
        self.rels.iter().zip(&other.rels).all(|(x, y)| {
            x.r_offset - self.input_offset == y.r_offset - other.input_offset
                && x.r_type == y.r_type
                && std::ptr::eq(x.sym, y.sym)
                && x.addend == y.addend
        })
    }
}
