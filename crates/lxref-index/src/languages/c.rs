//! C family extractor using tree-sitter-c.
//!
//! Emits the classic tags vocabulary: functions, prototypes, macros,
//! struct/union/enum and their members, typedefs, file-scope variables,
//! and labels. Block-local declarations are not definition sites.

use crate::extractor::DefExtractor;
use lxref_core::{DefKind, Family, LxrefError, RawDef};
use tree_sitter::{Node, Parser};

pub struct CExtractor;

impl CExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DefExtractor for CExtractor {
    fn family(&self) -> Family {
        Family::C
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawDef>, LxrefError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_c::LANGUAGE.into())
            .map_err(|e| LxrefError::ExtractorFailed(format!("C grammar: {e}")))?;
        let tree = parser
            .parse(bytes, None)
            .ok_or_else(|| LxrefError::ExtractorFailed("C parse failed".to_string()))?;

        let mut defs = Vec::new();
        visit(tree.root_node(), bytes, true, &mut defs);
        Ok(defs)
    }
}

fn visit(node: Node, source: &[u8], file_scope: bool, defs: &mut Vec<RawDef>) {
    match node.kind() {
        "function_definition" => {
            if let Some(declarator) = node.child_by_field_name("declarator") {
                push(defs, declarator_name(declarator, source), &declarator, DefKind::Function);
            }
            // Labels and nested types live in the body; locals do not count.
            if let Some(body) = node.child_by_field_name("body") {
                visit_children(body, source, false, defs);
            }
            return;
        }
        "declaration" if file_scope => {
            let extern_storage = has_extern_storage(node, source);
            let mut cursor = node.walk();
            for declarator in node.children_by_field_name("declarator", &mut cursor) {
                let target = match declarator.kind() {
                    "init_declarator" => declarator.child_by_field_name("declarator"),
                    _ => Some(declarator),
                };
                let Some(target) = target else { continue };
                let kind = if contains_function_declarator(target) {
                    DefKind::Prototype
                } else if extern_storage {
                    DefKind::Externvar
                } else {
                    DefKind::Variable
                };
                push(defs, declarator_name(target, source), &target, kind);
            }
        }
        "preproc_def" => {
            if let Some(name) = node.child_by_field_name("name") {
                push(defs, node_text(name, source), &name, DefKind::Define);
            }
        }
        "preproc_function_def" => {
            if let Some(name) = node.child_by_field_name("name") {
                push(defs, node_text(name, source), &name, DefKind::Macro);
            }
        }
        "struct_specifier" | "union_specifier" | "enum_specifier" => {
            // A name without a body is a use, not a definition.
            if node.child_by_field_name("body").is_some() {
                if let Some(name) = node.child_by_field_name("name") {
                    let kind = match node.kind() {
                        "struct_specifier" => DefKind::Struct,
                        "union_specifier" => DefKind::Union,
                        _ => DefKind::Enum,
                    };
                    push(defs, node_text(name, source), &name, kind);
                }
            }
        }
        "enumerator" => {
            if let Some(name) = node.child_by_field_name("name") {
                push(defs, node_text(name, source), &name, DefKind::Enumerator);
            }
        }
        "field_declaration" => {
            let mut cursor = node.walk();
            for declarator in node.children_by_field_name("declarator", &mut cursor) {
                push(defs, declarator_name(declarator, source), &declarator, DefKind::Member);
            }
        }
        "type_definition" => {
            let mut cursor = node.walk();
            for declarator in node.children_by_field_name("declarator", &mut cursor) {
                push(defs, declarator_name(declarator, source), &declarator, DefKind::Typedef);
            }
        }
        "labeled_statement" => {
            if let Some(label) = node.child_by_field_name("label") {
                push(defs, node_text(label, source), &label, DefKind::Label);
            }
        }
        _ => {}
    }
    visit_children(node, source, file_scope, defs);
}

fn visit_children(node: Node, source: &[u8], file_scope: bool, defs: &mut Vec<RawDef>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, source, file_scope, defs);
    }
}

fn push(defs: &mut Vec<RawDef>, name: Option<String>, node: &Node, kind: DefKind) {
    if let Some(ident) = name {
        defs.push(RawDef {
            ident,
            line: node.start_position().row as u32 + 1,
            kind,
        });
    }
}

/// Descend a declarator chain to the defined identifier.
fn declarator_name(node: Node, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" | "field_identifier" | "type_identifier" => node_text(node, source),
        "pointer_declarator" | "function_declarator" | "array_declarator" | "init_declarator" => {
            declarator_name(node.child_by_field_name("declarator")?, source)
        }
        "parenthesized_declarator" => {
            let mut cursor = node.walk();
            let result = node
                .named_children(&mut cursor)
                .find_map(|child| declarator_name(child, source));
            result
        }
        _ => None,
    }
}

fn contains_function_declarator(node: Node) -> bool {
    match node.kind() {
        "function_declarator" => true,
        "pointer_declarator" | "parenthesized_declarator" | "array_declarator" => node
            .child_by_field_name("declarator")
            .map_or(false, contains_function_declarator),
        _ => false,
    }
}

fn has_extern_storage(node: Node, source: &[u8]) -> bool {
    let mut cursor = node.walk();
    let result = node.children(&mut cursor).any(|child| {
        child.kind() == "storage_class_specifier"
            && node_text(child, source).as_deref() == Some("extern")
    });
    result
}

fn node_text(node: Node, source: &[u8]) -> Option<String> {
    node.utf8_text(source).ok().map(str::to_string)
}
