//! Grouped reporting of undefined symbol references.
//!
//! References are recorded from both passes into a shared map keyed by
//! symbol name, then emitted all at once so each missing symbol produces one
//! diagnostic no matter how many times it is referenced.

use crate::args::UnresolvedSymbols;
use crate::context::Context;
use crate::error;
use crate::error::Result;
use anyhow::anyhow;
use itertools::Itertools as _;
use std::borrow::Cow;
use std::mem::take;

/// At most this many reference sites are shown per symbol.
const MAX_ERRORS: usize = 3;

/// Reports all undefined symbols recorded so far, grouped by symbol and
/// sorted by name so output is deterministic regardless of which worker
/// found each reference first. The checkpoint afterwards fails the link if
/// the configured severity is an error.
pub fn report_undef_errors(ctx: &Context) -> Result {
    let map = take(&mut *ctx.undef_errors.lock().unwrap());

    for (sym_name, sites) in map.iter().sorted_by_key(|(name, _)| **name) {
        let name: Cow<str> = if ctx.args.demangle {
            symbolic_demangle::demangle(sym_name)
        } else {
            Cow::Borrowed(sym_name)
        };

        let mut message = format!("undefined symbol: {name}\n");
        for site in sites.iter().take(MAX_ERRORS) {
            message.push_str(site);
            message.push('\n');
        }
        if sites.len() > MAX_ERRORS {
            message.push_str(&format!(
                ">>> referenced {} more times\n",
                sites.len() - MAX_ERRORS
            ));
        }

        match ctx.args.unresolved_symbols {
            UnresolvedSymbols::Error => ctx.report_error(anyhow!("{}", message.trim_end())),
            UnresolvedSymbols::Warn => error::warning(message.trim_end()),
            UnresolvedSymbols::Ignore => {}
        }
    }

    ctx.checkpoint()
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

    #[test]
    fn test_report_groups_and_caps_sites() {
        let herd = Herd::new();
        let data = vec![0u8; 64];
        let zeta = Symbol::new("zeta", test_utils::esym(STT_NOTYPE, 0, SHN_UNDEF), false);
        let alpha = Symbol::new("alpha", test_utils::esym(STT_NOTYPE, 0, SHN_UNDEF), false);
        let ctx = Context::new(Args::default(), &herd);
        let shdr =
            test_utils::section_header(SHT_PROGBITS, SHF_ALLOC as u64, 0, 64, 8);
        let isec = InputSection::new(
            &ctx,
            FileId(0),
            &data,
            &shdr,
            ".text",
            SectionIndex(1),
            RelocationList::default(),
        )
        .unwrap();

        let file = test_utils::object_file("a.o", &data, vec![&zeta, &alpha]);

        // Five references to `zeta`, one to `alpha`.
        for i in 0..5 {
            let rel = test_utils::rela(i * 8, R_X86_64_PC32, 0, -4);
            isec.record_undef_error(&ctx, &file, &crate::elf::Reloc::from_rela(&rel));
        }
        let rel = test_utils::rela(48, R_X86_64_PC32, 1, -4);
        isec.record_undef_error(&ctx, &file, &crate::elf::Reloc::from_rela(&rel));

        let error = report_undef_errors(&ctx).unwrap_err();
        let message = format!("{error:#}");
        assert!(message.contains("undefined symbol: zeta"));
        assert!(message.contains("undefined symbol: alpha"));
        assert!(message.contains(">>> referenced 2 more times"));
        // Sorted by name: alpha is reported before zeta.
        let alpha_at = message.find("undefined symbol: alpha").unwrap();
        let zeta_at = message.find("undefined symbol: zeta").unwrap();
        assert!(alpha_at < zeta_at);
        assert_eq!(message.matches(">>> referenced by").count(), 4);
    }

    #[test]
    fn test_severity_is_configurable() {
        for unresolved in [UnresolvedSymbols::Warn, UnresolvedSymbols::Ignore] {
            let herd = Herd::new();
            let args = Args {
                unresolved_symbols: unresolved,
                ..Args::default()
            };
            let ctx = Context::new(args, &herd);
            ctx.undef_errors
                .lock()
                .unwrap()
                .entry("missing")
                .or_default()
                .push(">>> referenced by .text\n>>>               a.o".to_owned());
            assert!(report_undef_errors(&ctx).is_ok());
        }
    }
}
