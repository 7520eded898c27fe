//! Construction helpers shared by the unit tests. Real links get these
//! structures from the loading and resolution collaborators; tests build them
//! by hand.

use crate::elf::Rel;
use crate::elf::Rela;
use crate::elf::SectionHeader;
use crate::elf::SymtabEntry;
use crate::object_file::FileId;
use crate::object_file::ObjectFile;
use crate::symbol::Symbol;
use object::I64;
use object::LittleEndian;
use object::U16;
use object::U32;
use object::U64;
use std::io::Write as _;
use std::sync::atomic::AtomicU64;

pub(crate) fn section_header(
    sh_type: u32,
    sh_flags: u64,
    sh_offset: u64,
    sh_size: u64,
    sh_addralign: u64,
) -> SectionHeader {
    let e = LittleEndian;
    SectionHeader {
        sh_name: U32::new(e, 0),
        sh_type: U32::new(e, sh_type),
        sh_flags: U64::new(e, sh_flags),
        sh_addr: U64::new(e, 0),
        sh_offset: U64::new(e, sh_offset),
        sh_size: U64::new(e, sh_size),
        sh_link: U32::new(e, 0),
        sh_info: U32::new(e, 0),
        sh_addralign: U64::new(e, sh_addralign),
        sh_entsize: U64::new(e, 0),
    }
}

pub(crate) fn esym(st_info: u8, st_other: u8, st_shndx: u16) -> SymtabEntry {
    esym_at(0, st_info, st_other, st_shndx, 0, 0)
}

pub(crate) fn esym_at(
    st_name: u32,
    st_info: u8,
    st_other: u8,
    st_shndx: u16,
    st_value: u64,
    st_size: u64,
) -> SymtabEntry {
    let e = LittleEndian;
    SymtabEntry {
        st_name: U32::new(e, st_name),
        st_info,
        st_other,
        st_shndx: U16::new(e, st_shndx),
        st_value: U64::new(e, st_value),
        st_size: U64::new(e, st_size),
    }
}

pub(crate) fn rela(r_offset: u64, r_type: u32, r_sym: u32, r_addend: i64) -> Rela {
    let e = LittleEndian;
    let mut rela = Rela {
        r_offset: U64::new(e, r_offset),
        r_info: U64::new(e, 0),
        r_addend: I64::new(e, r_addend),
    };
    rela.set_r_info(e, false, r_sym, r_type);
    rela
}

pub(crate) fn rel(r_offset: u64, r_type: u32, r_sym: u32) -> Rel {
    let e = LittleEndian;
    Rel {
        r_offset: U64::new(e, r_offset),
        r_info: U64::new(e, (u64::from(r_sym) << 32) | u64::from(r_type)),
    }
}

pub(crate) fn object_file<'data>(
    filename: &'data str,
    data: &'data [u8],
    symbols: Vec<&'data Symbol<'data>>,
) -> ObjectFile<'data> {
    ObjectFile {
        file_id: FileId(0),
        filename,
        data,
        elf_sections: &[],
        elf_syms: &[],
        symbol_strtab: &[],
        symbols,
        sections: Vec::new(),
        num_dynrel: AtomicU64::new(0),
    }
}

pub(crate) fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Builds the content of a new-style compressed section: a
/// `CompressionHeader64` followed by the zlib stream.
pub(crate) fn new_style_compressed(payload: &[u8], ch_addralign: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&object::elf::ELFCOMPRESS_ZLIB.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&ch_addralign.to_le_bytes());
    out.extend_from_slice(&zlib_compress(payload));
    out
}

/// Builds the content of an old-style `.zdebug` section: `"ZLIB"`, a
/// big-endian size, then the zlib stream.
pub(crate) fn old_style_compressed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"ZLIB");
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(&zlib_compress(payload));
    out
}
