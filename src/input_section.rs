//! The per-section model the engine operates on: content acquisition and
//! decompression, relocation iteration, the scan-pass and apply-pass entry
//! points, and function-name attribution for diagnostics.

use crate::action;
use crate::action::Action;
use crate::arch::Arch;
use crate::context::Context;
use crate::dynrel::RelaWriter;
use crate::elf::COMPRESSION_HEADER_SIZE;
use crate::elf::DynamicRelocationKind;
use crate::elf::Reloc;
use crate::elf::RelocationKind;
use crate::elf::RelocationKindInfo;
use crate::elf::RelocationList;
use crate::elf::SectionFlags;
use crate::elf::SectionHeader;
use crate::elf::SectionType;
use crate::elf::ZDEBUG_HEADER_SIZE;
use crate::elf::decompress_into;
use crate::elf::decompress_zlib_into;
use crate::elf::parse_compression_header;
use crate::elf::read_signed_value;
use crate::elf::sht;
use crate::elf::shf;
use crate::elf::to_p2align;
use crate::elf::write_value;
use crate::error::Result;
use crate::object_file::FileId;
use crate::object_file::ObjectFile;
use crate::symbol::Symbol;
use anyhow::Context as _;
use anyhow::bail;
use anyhow::ensure;
use object::LittleEndian;
use object::SectionIndex;
use std::borrow::Cow;

pub struct InputSection<'data> {
    /// The owning object file. Sections are owned by their file; this is the
    /// index-based back-reference.
    pub file: FileId,

    pub shndx: SectionIndex,

    name: &'data str,

    shdr: SectionHeader,

    /// Raw bytes while compressed, decompressed bytes afterwards. Backing
    /// buffers for the decompressed form are owned by the context and live
    /// as long as the link.
    contents: &'data [u8],

    /// Logical size: the decompressed size for compressed sections,
    /// `sh_size` otherwise.
    pub sh_size: u64,

    /// Alignment as a power of two. For compressed sections this comes from
    /// the compression header, since `sh_addralign` describes the compressed
    /// image.
    pub p2align: u8,

    compressed: bool,
    uncompressed: bool,

    rels: RelocationList<'data>,

    /// Runtime address of the section in the output image, assigned by the
    /// layout pass between the two relocation passes.
    address: u64,
}

impl<'data> InputSection<'data> {
    pub fn new(
        ctx: &Context<'data>,
        file: FileId,
        data: &'data [u8],
        shdr: &SectionHeader,
        name: &'data str,
        shndx: SectionIndex,
        rels: RelocationList<'data>,
    ) -> Result<Self> {
        let e = LittleEndian;
        let mut contents: &'data [u8] = &[];
        if shdr.sh_type.get(e) != object::elf::SHT_NOBITS {
            let start = shdr.sh_offset.get(e) as usize;
            let size = shdr.sh_size.get(e) as usize;
            contents = data
                .get(start..start + size)
                .with_context(|| format!("{name}: section data is out of bounds"))?;
        }

        let sh_size;
        let p2align;
        let compressed;
        if name.starts_with(".zdebug") {
            ensure!(
                contents.len() > ZDEBUG_HEADER_SIZE && contents.starts_with(b"ZLIB"),
                "{name}: corrupted compressed section"
            );
            sh_size = u64::from_be_bytes(contents[4..ZDEBUG_HEADER_SIZE].try_into()?);
            p2align = to_p2align(shdr.sh_addralign.get(e));
            compressed = true;
        } else if SectionFlags::from_header(shdr).contains(shf::COMPRESSED) {
            let chdr = parse_compression_header(contents)
                .with_context(|| format!("{name}: corrupted compressed section"))?;
            sh_size = chdr.ch_size;
            p2align = to_p2align(chdr.ch_addralign);
            compressed = true;
        } else {
            sh_size = shdr.sh_size.get(e);
            p2align = to_p2align(shdr.sh_addralign.get(e));
            compressed = false;
        }

        let mut isec = Self {
            file,
            shndx,
            name,
            shdr: *shdr,
            contents,
            sh_size,
            p2align,
            compressed,
            uncompressed: false,
            rels,
            address: 0,
        };

        // REL-shaped relocations keep their addends in the relocated words,
        // so the content must be readable before the scan pass. RELA-shaped
        // sections can stay compressed until they're written out.
        if isec.rels.addends_in_content() {
            isec.uncompress(ctx)?;
        }

        Ok(isec)
    }

    pub fn name(&self) -> &'data str {
        self.name
    }

    pub fn shdr(&self) -> &SectionHeader {
        &self.shdr
    }

    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_header(&self.shdr)
    }

    pub fn sh_type(&self) -> SectionType {
        SectionType::from_header(&self.shdr)
    }

    pub fn contents(&self) -> &'data [u8] {
        self.contents
    }

    pub fn relocations(&self) -> RelocationList<'data> {
        self.rels
    }

    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// Replaces the raw contents with the decompressed bytes. Idempotent; a
    /// no-op for sections that aren't compressed.
    pub fn uncompress(&mut self, ctx: &Context<'data>) -> Result {
        if !self.compressed || self.uncompressed {
            return Ok(());
        }
        let buf = ctx.alloc_content(self.sh_size as usize);
        self.uncompress_to(&mut *buf)?;
        self.contents = buf;
        self.uncompressed = true;
        Ok(())
    }

    /// Writes the uncompressed contents into `buf`, which must be `sh_size`
    /// bytes. Copies verbatim when the section isn't compressed.
    pub fn uncompress_to(&self, buf: &mut [u8]) -> Result {
        if !self.compressed || self.uncompressed {
            buf.copy_from_slice(self.contents);
            return Ok(());
        }

        if self.name.starts_with(".zdebug") {
            // Old-style compressed section.
            ensure!(
                self.contents.len() > ZDEBUG_HEADER_SIZE && self.contents.starts_with(b"ZLIB"),
                "{}: corrupted compressed section",
                self.name
            );
            return decompress_zlib_into(&self.contents[ZDEBUG_HEADER_SIZE..], buf)
                .with_context(|| format!("{}: uncompress failed", self.name));
        }

        debug_assert!(self.flags().contains(shf::COMPRESSED));
        let chdr = parse_compression_header(self.contents)
            .with_context(|| format!("{}: corrupted compressed section", self.name))?;
        decompress_into(chdr.ch_type, &self.contents[COMPRESSION_HEADER_SIZE..], buf)
            .with_context(|| format!("{}: uncompress failed", self.name))
    }

    /// The addend of `rel`: from the entry for RELA-shaped relocations, from
    /// the relocated content for REL-shaped ones.
    pub fn get_addend(&self, rel: &Reloc, size: usize) -> Result<i64> {
        if let Some(addend) = rel.in_entry_addend() {
            return Ok(addend);
        }
        let offset = rel.r_offset as usize;
        let bytes = self.contents.get(offset..offset + size).with_context(|| {
            format!(
                "{}: relocation offset 0x{:x} is out of bounds",
                self.name, rel.r_offset
            )
        })?;
        Ok(read_signed_value(bytes))
    }

    /// Whether `rel` goes to the compact relative-relocation table instead of
    /// `.rela.dyn`. RELR encodes word-aligned offsets only.
    pub fn is_relr_reloc<A: Arch>(&self, ctx: &Context, rel: &Reloc) -> bool {
        ctx.args.pack_dyn_relocs_relr
            && self.shdr.sh_addralign.get(LittleEndian) % A::WORD_SIZE as u64 == 0
            && rel.r_offset % A::WORD_SIZE as u64 == 0
    }

    /// Scan-pass driver for one section: classify each relocation and record
    /// the side effects its action demands.
    pub fn scan_relocations<A: Arch>(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
    ) -> Result {
        debug_assert_eq!(self.file, file.file_id);
        for rel in self.rels.iter() {
            let rel_info = A::relocation_from_raw(rel.r_type)?;
            if rel_info.kind == RelocationKind::None {
                continue;
            }
            let sym = file.symbol(rel.r_sym)?;
            if sym.is_undefined() && !sym.is_weak() {
                self.record_undef_error(ctx, file, &rel);
                continue;
            }
            match rel_info.kind {
                RelocationKind::Absolute if rel_info.byte_size() < A::WORD_SIZE => {
                    self.scan_abs_rel::<A>(ctx, file, sym, &rel);
                }
                RelocationKind::Absolute => self.scan_abs_dyn_rel::<A>(ctx, file, sym, &rel),
                RelocationKind::Relative => self.scan_pcrel_rel::<A>(ctx, file, sym, &rel),
                RelocationKind::None => {}
            }
        }
        Ok(())
    }

    /// Scans an absolute relocation narrower than the word size.
    pub fn scan_abs_rel<A: Arch>(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        sym: &Symbol<'data>,
        rel: &Reloc,
    ) {
        let action = action::get_rel_action(&ctx.args, &action::ABS_NARROW_TABLE, sym);
        action::dispatch::<A>(ctx, self, file, action, sym, rel);
    }

    /// Scans a word-size absolute relocation.
    pub fn scan_abs_dyn_rel<A: Arch>(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        sym: &Symbol<'data>,
        rel: &Reloc,
    ) {
        let action = action::abs_dyn_action::<A>(&ctx.args, self, sym);
        action::dispatch::<A>(ctx, self, file, action, sym, rel);
    }

    /// Scans a PC-relative relocation.
    pub fn scan_pcrel_rel<A: Arch>(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        sym: &Symbol<'data>,
        rel: &Reloc,
    ) {
        let action = action::get_rel_action(&ctx.args, &action::PCREL_TABLE, sym);
        action::dispatch::<A>(ctx, self, file, action, sym, rel);
    }

    /// Emits the section into `buf` (decompressing if needed) and applies its
    /// relocations. `buf` must be the section's part of the output image,
    /// `sh_size` bytes long.
    pub fn write_to<A: Arch>(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        buf: &mut [u8],
        dynrel: &mut RelaWriter,
    ) -> Result {
        debug_assert_eq!(self.file, file.file_id);
        if self.sh_type() == sht::NOBITS || self.sh_size == 0 {
            return Ok(());
        }
        ensure!(
            buf.len() as u64 == self.sh_size,
            "{}:({}): output buffer size 0x{:x} doesn't match section size 0x{:x}",
            file,
            self.name,
            buf.len(),
            self.sh_size
        );

        if self.compressed && !self.uncompressed {
            self.uncompress_to(buf)?;
        } else {
            buf.copy_from_slice(self.contents);
        }

        if self.flags().contains(shf::ALLOC) {
            self.apply_reloc_alloc::<A>(ctx, file, buf, dynrel)
        } else {
            self.apply_reloc_nonalloc::<A>(ctx, file, buf)
        }
    }

    fn apply_reloc_alloc<A: Arch>(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        buf: &mut [u8],
        dynrel: &mut RelaWriter,
    ) -> Result {
        for rel in self.rels.iter() {
            let rel_info = A::relocation_from_raw(rel.r_type)?;
            if rel_info.kind == RelocationKind::None {
                continue;
            }
            let sym = file.symbol(rel.r_sym)?;
            let size = rel_info.byte_size();
            let offset = rel.r_offset as usize;
            let a = self.get_addend(&rel, size)?;
            let loc = buf.get_mut(offset..offset + size).with_context(|| {
                format!(
                    "{file}:({}): relocation offset 0x{:x} is out of bounds",
                    self.name, rel.r_offset
                )
            })?;
            let s = sym.resolved_addr();
            let p = self.address + rel.r_offset;

            let result = match rel_info.kind {
                RelocationKind::Absolute if size < A::WORD_SIZE => {
                    self.apply_abs_rel(ctx, sym, &rel_info, loc, s, a)
                }
                RelocationKind::Absolute => {
                    self.apply_abs_dyn_rel::<A>(ctx, file, sym, &rel, loc, s, a, p, dynrel)
                }
                RelocationKind::Relative => {
                    self.apply_pcrel_rel(ctx, sym, &rel_info, loc, s, a, p)
                }
                RelocationKind::None => Ok(()),
            };
            result.with_context(|| {
                format!(
                    "{file}:({}): failed to apply {} at offset 0x{:x} against symbol `{}`",
                    self.name,
                    A::rel_type_to_string(rel.r_type),
                    rel.r_offset,
                    sym.display_name(ctx.args.demangle),
                )
            })?;
        }
        Ok(())
    }

    /// Applies relocations in a non-allocated section (debug info and
    /// friends). The runtime loader never sees these bytes, so everything
    /// must resolve statically; references to dynamic symbols are left as
    /// zeros. Undefined references are recorded here because non-allocated
    /// sections aren't scanned.
    fn apply_reloc_nonalloc<A: Arch>(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        buf: &mut [u8],
    ) -> Result {
        for rel in self.rels.iter() {
            let rel_info = A::relocation_from_raw(rel.r_type)?;
            if rel_info.kind == RelocationKind::None {
                continue;
            }
            let sym = file.symbol(rel.r_sym)?;
            if sym.is_undefined() && !sym.is_weak() {
                self.record_undef_error(ctx, file, &rel);
                continue;
            }
            if sym.is_imported {
                continue;
            }
            let size = rel_info.byte_size();
            let offset = rel.r_offset as usize;
            let a = self.get_addend(&rel, size)?;
            let loc = buf.get_mut(offset..offset + size).with_context(|| {
                format!(
                    "{file}:({}): relocation offset 0x{:x} is out of bounds",
                    self.name, rel.r_offset
                )
            })?;
            match rel_info.kind {
                RelocationKind::Absolute => {
                    let value = sym.resolved_addr().wrapping_add_signed(a);
                    rel_info.range.check(value as i64)?;
                    write_value(loc, value);
                }
                RelocationKind::Relative => bail!(
                    "{file}:({}): {} is invalid in a non-allocated section",
                    self.name,
                    A::rel_type_to_string(rel.r_type)
                ),
                RelocationKind::None => {}
            }
        }
        Ok(())
    }

    /// Applies a narrow absolute relocation. Only the statically resolvable
    /// rows exist here; the dynamic ones were rejected during the scan.
    pub fn apply_abs_rel(
        &self,
        ctx: &Context<'data>,
        sym: &Symbol<'data>,
        rel_info: &RelocationKindInfo,
        loc: &mut [u8],
        s: u64,
        a: i64,
    ) -> Result {
        match action::get_rel_action(&ctx.args, &action::ABS_NARROW_TABLE, sym) {
            Action::None | Action::Copyrel | Action::Cplt => {
                let value = s.wrapping_add_signed(a);
                rel_info.range.check(value as i64)?;
                write_value(loc, value);
                Ok(())
            }
            // The scan pass rejected these and the checkpoint stopped the
            // link before apply.
            Action::Error | Action::Plt | Action::Dynrel | Action::Baserel => {
                unreachable!("narrow absolute relocation has no dynamic form")
            }
        }
    }

    /// Applies a word-size absolute relocation, emitting a dynamic relocation
    /// through `dynrel` where the decision table calls for one.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_abs_dyn_rel<A: Arch>(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        sym: &Symbol<'data>,
        rel: &Reloc,
        loc: &mut [u8],
        s: u64,
        a: i64,
        p: u64,
        dynrel: &mut RelaWriter,
    ) -> Result {
        match action::abs_dyn_action::<A>(&ctx.args, self, sym) {
            Action::None | Action::Copyrel | Action::Cplt => {
                write_value(loc, s.wrapping_add_signed(a));
            }
            Action::Baserel => {
                if !self.is_relr_reloc::<A>(ctx, rel) {
                    dynrel.push(
                        p,
                        A::get_dynamic_relocation_type(DynamicRelocationKind::Relative),
                        0,
                        s.wrapping_add_signed(a) as i64,
                    )?;
                }
                write_value(loc, s.wrapping_add_signed(a));
            }
            Action::Dynrel => {
                dynrel.push(
                    p,
                    A::get_dynamic_relocation_type(DynamicRelocationKind::Absolute),
                    sym.get_dynsym_idx()
                        .with_context(|| format!("{file}:({})", self.name))?,
                    a,
                )?;
                write_value(loc, a as u64);
            }
            Action::Error | Action::Plt => {
                unreachable!("unrepresentable relocation survived the scan pass")
            }
        }
        Ok(())
    }

    /// Applies a PC-relative relocation. `s` already resolves to the PLT
    /// entry when one was requested.
    pub fn apply_pcrel_rel(
        &self,
        ctx: &Context<'data>,
        sym: &Symbol<'data>,
        rel_info: &RelocationKindInfo,
        loc: &mut [u8],
        s: u64,
        a: i64,
        p: u64,
    ) -> Result {
        match action::get_rel_action(&ctx.args, &action::PCREL_TABLE, sym) {
            Action::None | Action::Copyrel | Action::Plt | Action::Cplt => {
                let value = s.wrapping_add_signed(a).wrapping_sub(p);
                rel_info.range.check(value as i64)?;
                write_value(loc, value);
                Ok(())
            }
            Action::Error | Action::Dynrel | Action::Baserel => {
                unreachable!("PC-relative relocation has no dynamic form")
            }
        }
    }

    /// Returns the name of the function containing `offset`, for diagnostics.
    pub fn get_func_name(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        offset: u64,
    ) -> Option<Cow<'data, str>> {
        let e = LittleEndian;
        for esym in file.elf_syms {
            let value = esym.st_value.get(e);
            if usize::from(esym.st_shndx.get(e)) == self.shndx.0
                && esym.st_info & 0xf == object::elf::STT_FUNC
                && value <= offset
                && offset < value + esym.st_size.get(e)
            {
                let name = file.symbol_name_at(esym.st_name.get(e))?;
                return Some(if ctx.args.demangle {
                    symbolic_demangle::demangle(name)
                } else {
                    Cow::Borrowed(name)
                });
            }
        }
        None
    }

    /// Records an undefined symbol reference. All references are reported at
    /// once, grouped by symbol, by `report_undef_errors`.
    pub fn record_undef_error(
        &self,
        ctx: &Context<'data>,
        file: &ObjectFile<'data>,
        rel: &Reloc,
    ) {
        let mut site = match file.get_source_name() {
            Some(source) => format!(">>> referenced by {source}\n"),
            None => format!(">>> referenced by {}\n", self.name),
        };
        site.push_str(&format!(">>>               {file}"));
        if let Some(func) = self.get_func_name(ctx, file, rel.r_offset) {
            site.push_str(&format!(":({func})"));
        }

        let Ok(sym) = file.symbol(rel.r_sym) else {
            return;
        };
        ctx.undef_errors
            .lock()
            .unwrap()
            .entry(sym.name())
            .or_default()
            .push(site);
    }
}
