//! Makefile family extractor.
//!
//! Variable assignments (`obj-y := ...`, `CFLAGS += ...`) are the
//! definition sites; rule bodies and prerequisites are references.

use crate::extractor::DefExtractor;
use lxref_core::{DefKind, Family, LxrefError, RawDef};

pub struct MakefileExtractor;

impl DefExtractor for MakefileExtractor {
    fn family(&self) -> Family {
        Family::M
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawDef>, LxrefError> {
        let mut defs = Vec::new();
        for (idx, line) in bytes.split(|&b| b == b'\n').enumerate() {
            // Recipe lines start with a tab and never define variables.
            if line.first() == Some(&b'\t') {
                continue;
            }
            let line = String::from_utf8_lossy(line);
            let trimmed = line.trim_start();
            let name_len = trimmed
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .count();
            if name_len == 0 {
                continue;
            }
            let rest = trimmed[name_len..].trim_start();
            let is_assignment = rest.starts_with('=')
                || rest.starts_with(":=")
                || rest.starts_with("::=")
                || rest.starts_with("+=")
                || rest.starts_with("?=");
            if is_assignment {
                defs.push(RawDef {
                    ident: trimmed[..name_len].to_string(),
                    line: idx as u32 + 1,
                    kind: DefKind::Variable,
                });
            }
        }
        Ok(defs)
    }
}
