//! Kconfig family extractor.
//!
//! Configuration symbols are introduced by `config` / `menuconfig`
//! entries; everything else in the file (prompts, help text, selects)
//! is reference territory handled by the tokenizer.

use crate::extractor::DefExtractor;
use lxref_core::{DefKind, Family, LxrefError, RawDef};

pub struct KconfigExtractor;

impl DefExtractor for KconfigExtractor {
    fn family(&self) -> Family {
        Family::K
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawDef>, LxrefError> {
        let mut defs = Vec::new();
        for (idx, line) in bytes.split(|&b| b == b'\n').enumerate() {
            let line = String::from_utf8_lossy(line);
            let trimmed = line.trim_start();
            let rest = trimmed
                .strip_prefix("menuconfig")
                .or_else(|| trimmed.strip_prefix("config"));
            let Some(rest) = rest else { continue };
            // The keyword must stand alone before the symbol name.
            if !rest.starts_with([' ', '\t']) {
                continue;
            }
            let symbol: String = rest
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !symbol.is_empty() {
                defs.push(RawDef {
                    ident: symbol,
                    line: idx as u32 + 1,
                    kind: DefKind::Config,
                });
            }
        }
        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_and_menuconfig_symbols() {
        let source = "menu \"Drivers\"\n\
                      \n\
                      config FOO\n\
                      \tbool \"Enable foo\"\n\
                      \tselect BAR\n\
                      \n\
                      menuconfig BAR\n\
                      \tbool\n\
                      endmenu\n";
        let defs = KconfigExtractor.extract(source.as_bytes()).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].ident, "FOO");
        assert_eq!(defs[0].line, 3);
        assert_eq!(defs[0].kind, DefKind::Config);
        assert_eq!(defs[1].ident, "BAR");
        assert_eq!(defs[1].line, 7);
    }

    #[test]
    fn select_lines_are_not_definitions() {
        let defs = KconfigExtractor
            .extract(b"config FOO\n\tselect BAR\n")
            .unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].ident, "FOO");
    }

    #[test]
    fn configurable_prefix_words_do_not_confuse() {
        // "configured" is not the `config` keyword.
        let defs = KconfigExtractor.extract(b"configured FOO\n").unwrap();
        assert!(defs.is_empty());
    }
}
