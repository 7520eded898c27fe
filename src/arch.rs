use crate::elf::DynamicRelocationKind;
use crate::elf::RelocationKindInfo;
use crate::error::Result;
use anyhow::bail;
use object::elf::EM_AARCH64;
use object::elf::EM_PPC64;
use object::elf::EM_X86_64;
use std::borrow::Cow;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    AArch64,
    Ppc64,
}

impl TryFrom<u16> for Architecture {
    type Error = crate::error::Error;

    fn try_from(arch: u16) -> Result<Self, Self::Error> {
        match arch {
            EM_X86_64 => Ok(Self::X86_64),
            EM_AARCH64 => Ok(Self::AArch64),
            EM_PPC64 => Ok(Self::Ppc64),
            _ => bail!("Unsupported architecture: 0x{:x}", arch),
        }
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arch = match self {
            Architecture::X86_64 => "x86_64",
            Architecture::AArch64 => "aarch64",
            Architecture::Ppc64 => "ppc64le",
        };
        write!(f, "{arch}")
    }
}

/// Architecture-specific knowledge the engine needs: how wide a machine word
/// is, how raw relocation type codes fold into semantic classes, and which
/// type codes the runtime loader understands for the dynamic relocations we
/// emit.
pub trait Arch {
    const ARCHITECTURE: Architecture;

    /// Width in bytes of a machine word. Absolute relocations of exactly this
    /// width can be promoted to dynamic relocations; narrower ones cannot.
    const WORD_SIZE: usize;

    fn elf_header_arch_magic() -> u16;

    fn relocation_from_raw(r_type: u32) -> Result<RelocationKindInfo>;

    fn get_dynamic_relocation_type(relocation: DynamicRelocationKind) -> u32;

    fn rel_type_to_string(r_type: u32) -> Cow<'static, str>;
}
