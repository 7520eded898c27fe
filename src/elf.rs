//! Little-endian 64-bit ELF types and helpers shared by the rest of the
//! engine. We alias the `object` crate's generic types so that the remainder
//! of the codebase doesn't need to repeat the endianness parameter.

use crate::error::Result;
use anyhow::bail;
use anyhow::ensure;
use object::LittleEndian;
use std::io::Read as _;

pub type SectionHeader = object::elf::SectionHeader64<LittleEndian>;
pub type SymtabEntry = object::elf::Sym64<LittleEndian>;
pub type Rela = object::elf::Rela64<LittleEndian>;
pub type Rel = object::elf::Rel64<LittleEndian>;
pub type CompressionHeader = object::elf::CompressionHeader64<LittleEndian>;

pub const COMPRESSION_HEADER_SIZE: usize = size_of::<CompressionHeader>();

/// Old-style compressed debug sections carry `"ZLIB"` followed by a
/// big-endian 64-bit uncompressed size.
pub const ZDEBUG_HEADER_SIZE: usize = 12;

pub const RELA_ENTRY_SIZE: u64 = size_of::<Rela>() as u64;

macro_rules! const_name_by_value {
    ($needle: expr, $( $const:ident ),*) => {
        match $needle {
            $(object::elf::$const => Some(stringify!($const)),)*
            _ => None
        }
    };
}

pub(crate) use const_name_by_value;

/// Section flag bit values.
#[allow(unused)]
pub mod shf {
    use super::SectionFlags;

    pub const WRITE: SectionFlags = SectionFlags::from_u32(object::elf::SHF_WRITE);
    pub const ALLOC: SectionFlags = SectionFlags::from_u32(object::elf::SHF_ALLOC);
    pub const EXECINSTR: SectionFlags = SectionFlags::from_u32(object::elf::SHF_EXECINSTR);
    pub const MERGE: SectionFlags = SectionFlags::from_u32(object::elf::SHF_MERGE);
    pub const STRINGS: SectionFlags = SectionFlags::from_u32(object::elf::SHF_STRINGS);
    pub const INFO_LINK: SectionFlags = SectionFlags::from_u32(object::elf::SHF_INFO_LINK);
    pub const LINK_ORDER: SectionFlags = SectionFlags::from_u32(object::elf::SHF_LINK_ORDER);
    pub const GROUP: SectionFlags = SectionFlags::from_u32(object::elf::SHF_GROUP);
    pub const TLS: SectionFlags = SectionFlags::from_u32(object::elf::SHF_TLS);
    pub const COMPRESSED: SectionFlags = SectionFlags::from_u32(object::elf::SHF_COMPRESSED);
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SectionFlags(u32);

impl SectionFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_header(header: &SectionHeader) -> Self {
        Self(header.sh_flags.get(LittleEndian) as u32)
    }

    pub fn contains(self, flag: SectionFlags) -> bool {
        self.0 & flag.0 != 0
    }

    pub const fn from_u32(raw: u32) -> SectionFlags {
        SectionFlags(raw)
    }

    /// Returns self with the specified flags set.
    #[must_use]
    pub const fn with(self, flags: SectionFlags) -> SectionFlags {
        SectionFlags(self.0 | flags.0)
    }

    pub const fn raw(self) -> u64 {
        self.0 as u64
    }
}

impl std::fmt::Display for SectionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.contains(shf::WRITE) {
            f.write_str("W")?;
        }
        if self.contains(shf::ALLOC) {
            f.write_str("A")?;
        }
        if self.contains(shf::EXECINSTR) {
            f.write_str("X")?;
        }
        if self.contains(shf::MERGE) {
            f.write_str("M")?;
        }
        if self.contains(shf::STRINGS) {
            f.write_str("S")?;
        }
        if self.contains(shf::TLS) {
            f.write_str("T")?;
        }
        if self.contains(shf::COMPRESSED) {
            f.write_str("C")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SectionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl std::ops::BitOrAssign for SectionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Section type values.
#[allow(unused)]
pub mod sht {
    use super::SectionType;

    pub const NULL: SectionType = SectionType::from_u32(object::elf::SHT_NULL);
    pub const PROGBITS: SectionType = SectionType::from_u32(object::elf::SHT_PROGBITS);
    pub const SYMTAB: SectionType = SectionType::from_u32(object::elf::SHT_SYMTAB);
    pub const STRTAB: SectionType = SectionType::from_u32(object::elf::SHT_STRTAB);
    pub const RELA: SectionType = SectionType::from_u32(object::elf::SHT_RELA);
    pub const NOBITS: SectionType = SectionType::from_u32(object::elf::SHT_NOBITS);
    pub const REL: SectionType = SectionType::from_u32(object::elf::SHT_REL);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SectionType(u32);

impl SectionType {
    pub fn from_header(header: &SectionHeader) -> Self {
        Self(header.sh_type.get(LittleEndian))
    }

    pub const fn from_u32(raw: u32) -> SectionType {
        SectionType(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// The broad semantic class of a relocation, as far as this engine is
/// concerned. Architecture-specific relocation type codes are folded into
/// these classes by `Arch::relocation_from_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    /// The absolute address of the symbol plus addend.
    Absolute,

    /// The address of the symbol plus addend, relative to the place being
    /// relocated.
    Relative,

    /// No relocation.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationSize {
    ByteSize(usize),
}

/// A range of permitted relocation values. Relocations narrower than the
/// machine word must check that the computed value survives truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedRange {
    pub min: i64,
    pub max: i64,
}

impl AllowedRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub const fn no_check() -> Self {
        Self {
            min: i64::MIN,
            max: i64::MAX,
        }
    }

    pub fn check(&self, value: i64) -> Result {
        ensure!(
            value >= self.min && value <= self.max,
            "relocation value 0x{value:x} is outside the representable range \
             [0x{:x}, 0x{:x}]",
            self.min,
            self.max
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationKindInfo {
    pub kind: RelocationKind,
    pub size: RelocationSize,
    pub range: AllowedRange,
}

impl RelocationKindInfo {
    pub(crate) const fn new(kind: RelocationKind, size: usize, range: AllowedRange) -> Self {
        Self {
            kind,
            size: RelocationSize::ByteSize(size),
            range,
        }
    }

    pub fn byte_size(&self) -> usize {
        match self.size {
            RelocationSize::ByteSize(size) => size,
        }
    }
}

/// Dynamic relocations that the engine itself emits. Each architecture maps
/// these to its own relocation type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicRelocationKind {
    /// Add the load bias to the word at the relocated address. No symbol
    /// lookup is involved.
    Relative,

    /// Store the absolute address of a named dynamic symbol plus addend.
    Absolute,
}

/// A relocation normalized from either entry shape. RELA entries carry their
/// addend here; REL entries leave it `None` and the addend is read from the
/// section content at the relocated offset.
#[derive(Debug, Clone, Copy)]
pub struct Reloc {
    pub r_offset: u64,
    pub r_type: u32,
    pub r_sym: u32,
    addend: Option<i64>,
}

impl Reloc {
    pub fn from_rela(rela: &Rela) -> Self {
        let e = LittleEndian;
        Self {
            r_offset: rela.r_offset.get(e),
            r_type: rela.r_type(e, false),
            r_sym: rela.r_sym(e, false),
            addend: Some(rela.r_addend.get(e)),
        }
    }

    pub fn from_rel(rel: &Rel) -> Self {
        let info = rel.r_info.get(LittleEndian);
        Self {
            r_offset: rel.r_offset.get(LittleEndian),
            r_type: info as u32,
            r_sym: (info >> 32) as u32,
            addend: None,
        }
    }

    pub fn in_entry_addend(&self) -> Option<i64> {
        self.addend
    }
}

/// A section's relocation table in whichever of the two ELF shapes the input
/// used.
#[derive(Debug, Clone, Copy)]
pub enum RelocationList<'data> {
    Rela(&'data [Rela]),
    Rel(&'data [Rel]),
}

impl<'data> RelocationList<'data> {
    pub fn iter(self) -> impl Iterator<Item = Reloc> + 'data {
        match self {
            RelocationList::Rela(entries) => {
                itertools::Either::Left(entries.iter().map(Reloc::from_rela))
            }
            RelocationList::Rel(entries) => {
                itertools::Either::Right(entries.iter().map(Reloc::from_rel))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelocationList::Rela(entries) => entries.len(),
            RelocationList::Rel(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// REL-shaped entries store their addends in the relocated content, so
    /// content must be readable (i.e. decompressed) before the scan pass.
    pub fn addends_in_content(&self) -> bool {
        matches!(self, RelocationList::Rel(_))
    }
}

impl Default for RelocationList<'_> {
    fn default() -> Self {
        RelocationList::Rela(&[])
    }
}

/// The fields of a new-style compression header, read without requiring
/// aligned access to the mapped input.
pub(crate) struct ParsedCompressionHeader {
    pub(crate) ch_type: u32,
    pub(crate) ch_size: u64,
    pub(crate) ch_addralign: u64,
}

pub(crate) fn parse_compression_header(contents: &[u8]) -> Result<ParsedCompressionHeader> {
    ensure!(
        contents.len() >= COMPRESSION_HEADER_SIZE,
        "corrupted compressed section"
    );
    Ok(ParsedCompressionHeader {
        ch_type: u32::from_le_bytes(contents[0..4].try_into()?),
        ch_size: u64::from_le_bytes(contents[8..16].try_into()?),
        ch_addralign: u64::from_le_bytes(contents[16..24].try_into()?),
    })
}

pub(crate) fn decompress_into(ch_type: u32, input: &[u8], out: &mut [u8]) -> Result {
    match ch_type {
        object::elf::ELFCOMPRESS_ZLIB => decompress_zlib_into(input, out),
        // We use the official zstd bindings rather than a pure Rust
        // implementation because the decompression speed of large debug info
        // dominates link time for some inputs.
        object::elf::ELFCOMPRESS_ZSTD => {
            let mut decoder = zstd::stream::Decoder::new(input)?;
            decoder.read_exact(out)?;
            ensure!(
                decoder.read(&mut [0u8; 1])? == 0,
                "compressed stream decodes to more than the declared size {}",
                out.len()
            );
            Ok(())
        }
        c => bail!("unsupported compression type: 0x{c:x}"),
    }
}

pub(crate) fn decompress_zlib_into(input: &[u8], out: &mut [u8]) -> Result {
    let mut decompress = flate2::Decompress::new(true);
    let status = decompress.decompress(input, out, flate2::FlushDecompress::Finish)?;
    // `Finish` stops once `out` is full, so reaching the declared size isn't
    // enough; the stream must also have ended there.
    ensure!(
        status == flate2::Status::StreamEnd,
        "compressed stream decodes to more than the declared size {}",
        out.len()
    );
    ensure!(
        decompress.total_out() == out.len() as u64,
        "decompressed size {} doesn't match the declared size {}",
        decompress.total_out(),
        out.len()
    );
    Ok(())
}

/// Reads a little-endian value of `bytes.len()` bytes, sign-extending to
/// 64 bits. Used to extract in-content addends of REL-shaped relocations.
pub(crate) fn read_signed_value(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    let value = i64::from_le_bytes(buf);
    let shift = 64 - bytes.len() * 8;
    (value << shift) >> shift
}

/// Writes the low `loc.len()` bytes of `value` little-endian.
pub(crate) fn write_value(loc: &mut [u8], value: u64) {
    let bytes = value.to_le_bytes();
    loc.copy_from_slice(&bytes[..loc.len()]);
}

pub(crate) fn to_p2align(alignment: u64) -> u8 {
    if alignment == 0 {
        return 0;
    }
    alignment.trailing_zeros() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_signed_value() {
        assert_eq!(read_signed_value(&[0xfc, 0xff, 0xff, 0xff]), -4);
        assert_eq!(read_signed_value(&[0x10, 0x00, 0x00, 0x00]), 0x10);
        assert_eq!(read_signed_value(&[0x80]), -128);
        assert_eq!(read_signed_value(&0x1234_5678_9abc_def0_u64.to_le_bytes()), 0x1234_5678_9abc_def0);
    }

    #[test]
    fn test_write_value_truncates() {
        let mut buf = [0u8; 4];
        write_value(&mut buf, 0x1_0000_0001);
        assert_eq!(buf, [1, 0, 0, 0]);
    }

    #[test]
    fn test_to_p2align() {
        assert_eq!(to_p2align(0), 0);
        assert_eq!(to_p2align(1), 0);
        assert_eq!(to_p2align(8), 3);
        assert_eq!(to_p2align(4096), 12);
    }

    #[test]
    fn test_allowed_range() {
        let range = AllowedRange::new(i64::from(i32::MIN), i64::from(i32::MAX));
        assert!(range.check(0).is_ok());
        assert!(range.check(i64::from(i32::MAX)).is_ok());
        assert!(range.check(i64::from(i32::MAX) + 1).is_err());
        assert!(AllowedRange::no_check().check(i64::MAX).is_ok());
    }
}
