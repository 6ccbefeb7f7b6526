//! Family extractors.
//!
//! The C family walks a tree-sitter AST; the line-oriented families
//! (Kconfig, device-tree, makefile) use small dedicated scanners.

pub mod c;
pub mod devicetree;
pub mod kconfig;
pub mod makefile;
