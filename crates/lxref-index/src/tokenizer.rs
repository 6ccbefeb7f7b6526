//! Family-aware identifier tokenizer.
//!
//! Yields identifier tokens with 1-based line numbers, skipping
//! comments, string literals, punctuation, and numeric literals
//! according to the family's lexical profile.

use lxref_core::Family;

/// Lexical surface of a family: which comment and string syntaxes to
/// skip while scanning for identifiers.
#[derive(Debug, Clone, Copy)]
pub struct LexProfile {
    pub slash_comments: bool,
    pub block_comments: bool,
    pub hash_comments: bool,
    pub double_quoted: bool,
    pub single_quoted: bool,
}

impl LexProfile {
    pub fn for_family(family: Family) -> Self {
        match family {
            Family::C | Family::D => Self {
                slash_comments: true,
                block_comments: true,
                hash_comments: false,
                double_quoted: true,
                single_quoted: true,
            },
            Family::K => Self {
                slash_comments: false,
                block_comments: false,
                hash_comments: true,
                double_quoted: true,
                single_quoted: false,
            },
            Family::M => Self {
                slash_comments: false,
                block_comments: false,
                hash_comments: true,
                double_quoted: false,
                single_quoted: false,
            },
        }
    }
}

/// One identifier occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub text: &'a str,
    pub line: u32,
}

/// Iterator over the identifier tokens of a blob.
pub struct Tokens<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    profile: LexProfile,
}

impl<'a> Tokens<'a> {
    pub fn new(bytes: &'a [u8], family: Family) -> Self {
        Self {
            bytes,
            pos: 0,
            line: 1,
            profile: LexProfile::for_family(family),
        }
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) {
        if self.peek(0) == Some(b'\n') {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn skip_to_eol(&mut self) {
        while let Some(b) = self.peek(0) {
            if b == b'\n' {
                return;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while self.pos < self.bytes.len() {
            if self.peek(0) == Some(b'*') && self.peek(1) == Some(b'/') {
                self.pos += 2;
                return;
            }
            self.bump();
        }
    }

    fn skip_quoted(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            match b {
                b'\\' => {
                    self.bump();
                    self.bump();
                }
                _ if b == quote => {
                    self.pos += 1;
                    return;
                }
                _ => self.bump(),
            }
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        while let Some(b) = self.peek(0) {
            if self.profile.hash_comments && b == b'#' {
                self.skip_to_eol();
                continue;
            }
            if self.profile.slash_comments && b == b'/' && self.peek(1) == Some(b'/') {
                self.skip_to_eol();
                continue;
            }
            if self.profile.block_comments && b == b'/' && self.peek(1) == Some(b'*') {
                self.skip_block_comment();
                continue;
            }
            if self.profile.double_quoted && b == b'"' {
                self.skip_quoted(b'"');
                continue;
            }
            if self.profile.single_quoted && b == b'\'' {
                self.skip_quoted(b'\'');
                continue;
            }
            if is_ident_start(b) {
                let start = self.pos;
                let line = self.line;
                while self.peek(0).is_some_and(is_ident_continue) {
                    self.pos += 1;
                }
                if let Ok(text) = std::str::from_utf8(&self.bytes[start..self.pos]) {
                    return Some(Token { text, line });
                }
                continue;
            }
            if b.is_ascii_digit() {
                // Consume the whole numeric literal so `0x1f` never
                // yields a phantom `x1f` identifier.
                while self
                    .peek(0)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.')
                {
                    self.pos += 1;
                }
                continue;
            }
            self.bump();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idents(source: &str, family: Family) -> Vec<(String, u32)> {
        Tokens::new(source.as_bytes(), family)
            .map(|t| (t.text.to_string(), t.line))
            .collect()
    }

    #[test]
    fn c_comments_and_strings_are_skipped() {
        let source = "int x = 1; // x again\n\
                      /* x in\n\
                         a block */\n\
                      char *s = \"x inside\";\n\
                      char c = 'x';\n\
                      use(x);\n";
        let tokens = idents(source, Family::C);
        let xs: Vec<u32> = tokens
            .iter()
            .filter(|(t, _)| t == "x")
            .map(|(_, line)| *line)
            .collect();
        assert_eq!(xs, vec![1, 6]);
    }

    #[test]
    fn block_comments_track_lines() {
        let tokens = idents("/* one\ntwo\nthree */ after\n", Family::C);
        assert_eq!(tokens, vec![("after".to_string(), 3)]);
    }

    #[test]
    fn numeric_literals_yield_no_identifiers() {
        let tokens = idents("a = 0x1f + 12ul + 3.5e2;\n", Family::C);
        assert_eq!(tokens, vec![("a".to_string(), 1)]);
    }

    #[test]
    fn hash_comments_in_kconfig() {
        let source = "config FOO # FOO disabled\n\tdepends on BAR\n";
        let tokens = idents(source, Family::K);
        let names: Vec<&str> = tokens.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(names, vec!["config", "FOO", "depends", "on", "BAR"]);
    }

    #[test]
    fn makefile_keeps_dollar_expansions_tokenized() {
        let tokens = idents("all:\n\tcc $(CFLAGS) # note\n", Family::M);
        let names: Vec<&str> = tokens.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(names, vec!["all", "cc", "CFLAGS"]);
    }

    #[test]
    fn unterminated_string_does_not_loop() {
        assert!(idents("\"never closed", Family::C).is_empty());
    }
}
