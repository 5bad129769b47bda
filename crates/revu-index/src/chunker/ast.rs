//! Syntax-tree chunking via tree-sitter.
//!
//! Declarations reported by [`Lang::entity_chunk_type`] become chunks when
//! they span more than `min_chunk_lines`. Complexity is counted from
//! decision nodes, dependencies from import nodes and call expressions.

use std::collections::{BTreeSet, HashSet};

use tree_sitter::{Node, Parser};

use super::analysis::{callee_name, finish_dependencies, import_names, referenced_names};
use super::{ChunkType, ChunkerConfig, CodeChunk, blake3_hex, chunk_id, line};
use crate::error::{IndexError, Result};
use crate::languages::Lang;

const DECISION_KINDS: &[&str] = &[
    "if_expression",
    "if_statement",
    "elif_clause",
    "for_expression",
    "for_statement",
    "for_in_statement",
    "while_expression",
    "while_statement",
    "do_statement",
    "match_arm",
    "switch_case",
    "case_clause",
    "expression_case",
    "type_case",
    "communication_case",
    "catch_clause",
    "except_clause",
    "conditional_expression",
    "ternary_expression",
    "boolean_operator",
];

struct Walk<'a> {
    source: &'a str,
    lines: &'a [&'a str],
    file_path: &'a str,
    lang: Lang,
    config: &'a ChunkerConfig,
    imports: &'a BTreeSet<String>,
}

pub(super) fn chunk(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> Result<Vec<CodeChunk>> {
    let grammar = lang
        .grammar()
        .ok_or_else(|| IndexError::UnsupportedLanguage(format!("no grammar for {lang}")))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("parse failed for {file_path}")))?;
    let root = tree.root_node();

    let lines: Vec<&str> = source.lines().collect();
    let imports = collect_imports(&root, source, lang);
    let walk = Walk {
        source,
        lines: &lines,
        file_path,
        lang,
        config,
        imports: &imports,
    };

    let mut chunks = Vec::new();
    visit(&walk, &root, 0, false, &mut chunks);

    if chunks.is_empty() {
        if root.has_error() {
            return Err(IndexError::Parse(format!(
                "{file_path}: syntax errors and no recognizable declarations"
            )));
        }
        return Ok(chunks);
    }
    if root.has_error() {
        tracing::debug!(file = %file_path, "syntax errors, keeping recognized declarations");
    }

    if chunks.len() < 2 && lines.len() > config.max_chunk_size {
        line::supplement(source, file_path, lang, config, &mut chunks);
    }

    let mut seen = HashSet::new();
    chunks.retain(|c| seen.insert(c.id.clone()));
    chunks.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then(b.end_line.cmp(&a.end_line))
    });
    Ok(chunks)
}

fn visit(walk: &Walk<'_>, node: &Node, depth: usize, in_container: bool, out: &mut Vec<CodeChunk>) {
    if depth >= walk.config.ast_max_depth {
        return;
    }
    let child_count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        let kind = child.kind();
        let entity = walk.lang.entity_chunk_type(kind, in_container);
        if let Some(chunk_type) = entity {
            let start = child.start_position().row;
            let end = child.end_position().row;
            if end - start + 1 > walk.config.min_chunk_lines {
                out.push(entity_chunk(walk, &child, chunk_type));
            }
        }
        let nested_in_container =
            walk.lang.is_container(kind) || (in_container && entity.is_none());
        visit(walk, &child, depth + 1, nested_in_container, out);
    }
}

fn entity_chunk(walk: &Walk<'_>, node: &Node, chunk_type: ChunkType) -> CodeChunk {
    let start = node.start_position().row;
    let end = node
        .end_position()
        .row
        .min(walk.lines.len().saturating_sub(1));
    let content = walk.lines[start..=end].join("\n");
    let name = entity_name(node, walk.source);

    let node_text = &walk.source[node.byte_range()];
    let used_imports = referenced_names(node_text, walk.imports);
    let mut calls = BTreeSet::new();
    collect_calls(walk, node, name.as_deref(), &mut calls);
    let (dependencies, imports) = finish_dependencies(used_imports, calls);

    CodeChunk {
        id: chunk_id(walk.file_path, start + 1, end + 1),
        complexity_score: complexity(node),
        content_hash: blake3_hex(&content),
        content,
        language: walk.lang,
        start_line: start + 1,
        end_line: end + 1,
        chunk_type,
        dependencies,
        imports,
        file_path: walk.file_path.to_owned(),
        name,
        embedding: None,
    }
}

fn entity_name(node: &Node, source: &str) -> Option<String> {
    // impl_item names its type through the "type" field; Go wraps names in type_spec
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .or_else(|| {
            node.named_child(0)
                .and_then(|c| c.child_by_field_name("name"))
        })
        .map(|n| source[n.byte_range()].to_owned())
}

/// Decision points in the subtree plus one.
fn complexity(node: &Node) -> u32 {
    let mut count: u32 = 1;
    let mut stack = vec![*node];
    while let Some(current) = stack.pop() {
        let kind = current.kind();
        if DECISION_KINDS.contains(&kind) {
            count = count.saturating_add(1);
        } else if kind == "binary_expression"
            && current
                .child_by_field_name("operator")
                .is_some_and(|op| matches!(op.kind(), "&&" | "||"))
        {
            count = count.saturating_add(1);
        }
        let child_count = u32::try_from(current.named_child_count()).unwrap_or(u32::MAX);
        for i in 0..child_count {
            if let Some(child) = current.named_child(i) {
                stack.push(child);
            }
        }
    }
    count
}

fn collect_calls(walk: &Walk<'_>, node: &Node, own_name: Option<&str>, out: &mut BTreeSet<String>) {
    let call_kinds = walk.lang.call_node_kinds();
    let mut stack = vec![*node];
    while let Some(current) = stack.pop() {
        if call_kinds.contains(&current.kind())
            && let Some(callee) = current
                .child_by_field_name("function")
                .or_else(|| current.child_by_field_name("constructor"))
                .or_else(|| current.child_by_field_name("macro"))
            && let Some(name) = callee_name(&walk.source[callee.byte_range()], own_name)
        {
            out.insert(name);
        }
        let child_count = u32::try_from(current.named_child_count()).unwrap_or(u32::MAX);
        for i in 0..child_count {
            if let Some(child) = current.named_child(i) {
                stack.push(child);
            }
        }
    }
}

fn collect_imports(root: &Node, source: &str, lang: Lang) -> BTreeSet<String> {
    let kinds = lang.import_node_kinds();
    let mut names = BTreeSet::new();
    let child_count = u32::try_from(root.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(child) = root.named_child(i) else {
            continue;
        };
        if !kinds.contains(&child.kind()) {
            continue;
        }
        let text = &source[child.byte_range()];
        if text.contains('{') {
            let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
            names.extend(import_names(&joined));
        } else {
            for line in text.lines() {
                names.extend(import_names(line));
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    #[cfg(feature = "lang-rust")]
    const RUST_SOURCE: &str = "\
use std::collections::HashMap;
use std::fs;

pub struct Registry {
    items: HashMap<String, u32>,
    limit: u32,
}

impl Registry {
    pub fn insert(&mut self, key: String, value: u32) -> bool {
        if value > self.limit && !key.is_empty() {
            return false;
        }
        self.items.insert(key, value);
        true
    }
}

fn load(path: &str) -> String {
    let raw = fs::read_to_string(path).unwrap_or_default();
    normalize(&raw)
}
";

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_declarations_become_typed_chunks() {
        let chunks = chunk(RUST_SOURCE, "src/registry.rs", Lang::Rust, &config()).unwrap();
        let kinds: Vec<_> = chunks
            .iter()
            .map(|c| (c.name.as_deref().unwrap_or(""), c.chunk_type))
            .collect();
        assert!(kinds.contains(&("Registry", ChunkType::Class)));
        assert!(kinds.contains(&("insert", ChunkType::Method)));
        assert!(kinds.contains(&("load", ChunkType::Function)));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn complexity_counts_branches_and_short_circuits() {
        let chunks = chunk(RUST_SOURCE, "src/registry.rs", Lang::Rust, &config()).unwrap();
        let insert = chunks.iter().find(|c| c.name.as_deref() == Some("insert")).unwrap();
        // if + &&
        assert_eq!(insert.complexity_score, 3);
        let load = chunks.iter().find(|c| c.name.as_deref() == Some("load")).unwrap();
        assert_eq!(load.complexity_score, 1);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn dependencies_from_imports_and_calls() {
        let chunks = chunk(RUST_SOURCE, "src/registry.rs", Lang::Rust, &config()).unwrap();
        let load = chunks.iter().find(|c| c.name.as_deref() == Some("load")).unwrap();
        assert_eq!(load.imports, vec!["fs"]);
        assert!(load.dependencies.contains(&"normalize".to_string()));
        assert!(load.dependencies.contains(&"read_to_string".to_string()));
        let registry = chunks.iter().find(|c| c.name.as_deref() == Some("Registry")).unwrap();
        assert!(registry.imports.contains(&"HashMap".to_string()));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn chunk_lines_are_one_based_and_ordered() {
        let chunks = chunk(RUST_SOURCE, "src/registry.rs", Lang::Rust, &config()).unwrap();
        let registry = chunks.iter().find(|c| c.name.as_deref() == Some("Registry")).unwrap();
        assert_eq!((registry.start_line, registry.end_line), (4, 7));
        assert!(registry.content.starts_with("pub struct Registry"));
        assert!(chunks.windows(2).all(|w| w[0].start_line <= w[1].start_line));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn depth_limit_stops_descent() {
        let shallow = ChunkerConfig {
            ast_max_depth: 1,
            ..config()
        };
        let chunks = chunk(RUST_SOURCE, "src/registry.rs", Lang::Rust, &shallow).unwrap();
        assert!(chunks.iter().all(|c| c.chunk_type != ChunkType::Method));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn short_declarations_are_skipped() {
        let source = "struct A;\nfn b() {}\n";
        let chunks = chunk(source, "src/a.rs", Lang::Rust, &config()).unwrap();
        assert!(chunks.is_empty());
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn large_single_declaration_is_supplemented() {
        let body: String = (0..80).map(|i| format!("    let v{i} = {i};\n")).collect();
        let source = format!("fn big() {{\n{body}}}\n\nconst TAIL: u32 = 1;\n");
        let small = ChunkerConfig {
            max_chunk_size: 30,
            overlap_lines: 0,
            ..config()
        };
        let chunks = chunk(&source, "src/big.rs", Lang::Rust, &small).unwrap();
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Function));
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Block));
        let ids: HashSet<_> = chunks.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), chunks.len());
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn garbage_is_a_parse_error() {
        let err = chunk("fn ((( {{ ]] )", "src/bad.rs", Lang::Rust, &config()).unwrap_err();
        assert!(matches!(err, IndexError::Parse(_)));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_methods_inside_classes() {
        let source = "\
import os

class Store:
    def read(self, key):
        if key in self.cache:
            return self.cache[key]
        return os.getenv(key)

def helper(a, b):
    return a or b
";
        let chunks = chunk(source, "store.py", Lang::Python, &config()).unwrap();
        let read = chunks.iter().find(|c| c.name.as_deref() == Some("read")).unwrap();
        assert_eq!(read.chunk_type, ChunkType::Method);
        assert_eq!(read.imports, vec!["os"]);
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Class));
    }

    #[test]
    fn languages_without_grammar_are_unsupported() {
        let err = chunk("class A {}", "a.dart", Lang::Dart, &config()).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedLanguage(_)));
    }
}
