//! Reference extraction: identifier occurrences in non-definition
//! context, folded into per-blob line lists.

use crate::tokenizer::Tokens;
use lxref_core::{encode_lines, Family};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Extract the reference lines of every known identifier in one blob,
/// under one family.
///
/// An occurrence is suppressed when the same identifier has a
/// definition on the same line of this blob (definitions are not
/// self-references); occurrences of identifiers defined nowhere in the
/// universe are discarded. Each surviving identifier's line list comes
/// back ascending, deduplicated, in the comma-joined storage encoding.
pub fn extract_refs(
    bytes: &[u8],
    family: Family,
    known: &HashSet<String>,
    def_sites: &HashMap<String, Vec<u32>>,
) -> Vec<(String, String)> {
    let mut lines: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();

    for token in Tokens::new(bytes, family) {
        if !known.contains(token.text) {
            continue;
        }
        if def_sites
            .get(token.text)
            .is_some_and(|sites| sites.contains(&token.line))
        {
            continue;
        }
        lines.entry(token.text).or_default().insert(token.line);
    }

    lines
        .into_iter()
        .map(|(ident, lines)| {
            let ordered: Vec<u32> = lines.into_iter().collect();
            (ident.to_string(), encode_lines(&ordered))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn sites(entries: &[(&str, &[u32])]) -> HashMap<String, Vec<u32>> {
        entries
            .iter()
            .map(|(ident, lines)| (ident.to_string(), lines.to_vec()))
            .collect()
    }

    #[test]
    fn unknown_identifiers_are_discarded() {
        let refs = extract_refs(
            b"alpha(beta);\n",
            Family::C,
            &known(&["alpha"]),
            &HashMap::new(),
        );
        assert_eq!(refs, vec![("alpha".to_string(), "1".to_string())]);
    }

    #[test]
    fn same_line_definition_is_suppressed() {
        let source = b"int x; int f(void){return x;}\n";
        let refs = extract_refs(
            source,
            Family::C,
            &known(&["x", "f"]),
            &sites(&[("x", &[1]), ("f", &[1])]),
        );
        assert!(refs.is_empty());
    }

    #[test]
    fn other_lines_still_count() {
        let source = b"int x;\nint f(void)\n{\n\treturn x + x;\n}\n";
        let refs = extract_refs(
            source,
            Family::C,
            &known(&["x", "f"]),
            &sites(&[("x", &[1]), ("f", &[2])]),
        );
        // Two uses on line 4 collapse into one entry.
        assert_eq!(refs, vec![("x".to_string(), "4".to_string())]);
    }

    #[test]
    fn line_lists_are_ascending_and_deduplicated() {
        let source = b"probe();\nprobe();\nprobe();\n";
        let refs = extract_refs(source, Family::C, &known(&["probe"]), &HashMap::new());
        assert_eq!(refs, vec![("probe".to_string(), "1,2,3".to_string())]);
    }

    #[test]
    fn family_only_affects_lexing_not_identity() {
        // A symbol defined in Kconfig is referenced from C territory.
        let refs = extract_refs(
            b"#ifdef FOO\nstatic int t;\n#endif\n",
            Family::C,
            &known(&["FOO"]),
            &HashMap::new(),
        );
        assert_eq!(refs, vec![("FOO".to_string(), "1".to_string())]);
    }

    #[test]
    fn empty_blob_has_no_references() {
        assert!(extract_refs(b"", Family::C, &known(&["x"]), &HashMap::new()).is_empty());
    }
}
