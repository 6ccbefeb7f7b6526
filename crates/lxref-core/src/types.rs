//! Core identifier-index types: blob identities, language families,
//! definition kinds, and the record shapes shared across crates.

use crate::LxrefError;
use serde::{Deserialize, Serialize};

/// Dense internal blob number, allocated from 1 upward.
///
/// Replaces the 20-byte external hash in every downstream list; the
/// hash is recovered with one extra lookup at render time.
pub type BlobNum = u32;

/// Name of a release tag in the external store.
pub type TagName = String;

/// External identity of a blob: its 20-byte content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHash(pub [u8; 20]);

impl BlobHash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, LxrefError> {
        let s = s.trim();
        if s.len() != 40 {
            return Err(LxrefError::Storage(format!("bad blob hash length: {s:?}")));
        }
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| LxrefError::Storage(format!("bad blob hash: {s:?}")))?;
        }
        Ok(Self(out))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LxrefError> {
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| LxrefError::Storage(format!("blob hash must be 20 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for BlobHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for BlobHash {
    type Err = LxrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Language family of a file path, selecting extractor rules and
/// filtering queries. Families are opaque one-letter tags downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Family {
    /// C sources and headers.
    C,
    /// Kconfig files.
    K,
    /// Device-tree sources.
    D,
    /// Makefiles and other build scripts.
    M,
}

impl Family {
    pub const ALL: [Family; 4] = [Family::C, Family::K, Family::D, Family::M];

    pub fn code(&self) -> &'static str {
        match self {
            Self::C => "C",
            Self::K => "K",
            Self::D => "D",
            Self::M => "M",
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Family {
    type Err = LxrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "C" => Ok(Self::C),
            "K" => Ok(Self::K),
            "D" => Ok(Self::D),
            "M" => Ok(Self::M),
            other => Err(LxrefError::InvalidFamily(other.to_string())),
        }
    }
}

/// Kind of a definition site, as classified by the tags layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefKind {
    Config,
    Define,
    Enum,
    Enumerator,
    Externvar,
    Function,
    Label,
    Macro,
    Member,
    Prototype,
    Struct,
    Typedef,
    Union,
    Variable,
}

impl std::fmt::Display for DefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Define => "define",
            Self::Enum => "enum",
            Self::Enumerator => "enumerator",
            Self::Externvar => "externvar",
            Self::Function => "function",
            Self::Label => "label",
            Self::Macro => "macro",
            Self::Member => "member",
            Self::Prototype => "prototype",
            Self::Struct => "struct",
            Self::Typedef => "typedef",
            Self::Union => "union",
            Self::Variable => "variable",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DefKind {
    type Err = LxrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(Self::Config),
            "define" => Ok(Self::Define),
            "enum" => Ok(Self::Enum),
            "enumerator" => Ok(Self::Enumerator),
            "externvar" => Ok(Self::Externvar),
            "function" => Ok(Self::Function),
            "label" => Ok(Self::Label),
            "macro" => Ok(Self::Macro),
            "member" => Ok(Self::Member),
            "prototype" => Ok(Self::Prototype),
            "struct" => Ok(Self::Struct),
            "typedef" => Ok(Self::Typedef),
            "union" => Ok(Self::Union),
            "variable" => Ok(Self::Variable),
            other => Err(LxrefError::InvalidDefKind(other.to_string())),
        }
    }
}

/// A definition tuple as produced by a family extractor, before the
/// blob number and family are attached.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawDef {
    pub ident: String,
    pub line: u32,
    pub kind: DefKind,
}

/// A fully-qualified definition record, one row of the defs map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefRecord {
    pub ident: String,
    pub num: BlobNum,
    pub line: u32,
    pub kind: DefKind,
    pub family: Family,
}

/// One row of the refs map: all reference lines of an identifier
/// within one blob, under one family, as a comma-joined string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRecord {
    pub ident: String,
    pub num: BlobNum,
    pub family: Family,
    pub lines: String,
}

/// Encode an ascending, deduplicated line list as the compact
/// comma-joined storage form of the refs map.
pub fn encode_lines(lines: &[u32]) -> String {
    let mut out = String::with_capacity(lines.len() * 4);
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&line.to_string());
    }
    out
}

/// Decode the comma-joined line-list form back into numbers.
/// Malformed entries are skipped rather than failing the render.
pub fn decode_lines(encoded: &str) -> Vec<u32> {
    encoded
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
