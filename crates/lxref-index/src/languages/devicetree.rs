//! Device-tree family extractor.
//!
//! Definition sites in DTS sources are node labels (`uart0: serial@...`),
//! which phandle references (`&uart0`) point back to.

use crate::extractor::DefExtractor;
use lxref_core::{DefKind, Family, LxrefError, RawDef};

pub struct DeviceTreeExtractor;

impl DefExtractor for DeviceTreeExtractor {
    fn family(&self) -> Family {
        Family::D
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawDef>, LxrefError> {
        let mut defs = Vec::new();
        for (idx, line) in bytes.split(|&b| b == b'\n').enumerate() {
            let line = String::from_utf8_lossy(line);
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
                continue;
            }
            let label_len = trimmed
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .count();
            if label_len == 0 {
                continue;
            }
            // A label is the identifier immediately followed by a colon.
            if trimmed[label_len..].starts_with(':')
                && !trimmed.chars().next().unwrap_or(' ').is_ascii_digit()
            {
                defs.push(RawDef {
                    ident: trimmed[..label_len].to_string(),
                    line: idx as u32 + 1,
                    kind: DefKind::Label,
                });
            }
        }
        Ok(defs)
    }
}
