//! Language detection and the language → chunking strategy table.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunker::{ChunkType, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Dart,
    Java,
    Kotlin,
    Swift,
    CSharp,
    C,
    Cpp,
    Php,
    Bash,
    Toml,
    Json,
    Markdown,
    /// Anything without a recognized extension.
    Text,
}

impl Lang {
    pub const ALL: [Self; 18] = [
        Self::Rust,
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Go,
        Self::Dart,
        Self::Java,
        Self::Kotlin,
        Self::Swift,
        Self::CSharp,
        Self::C,
        Self::Cpp,
        Self::Php,
        Self::Bash,
        Self::Toml,
        Self::Json,
        Self::Markdown,
        Self::Text,
    ];

    /// Identifier used in point payloads and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Dart => "dart",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::Swift => "swift",
            Self::CSharp => "csharp",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Php => "php",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.id() == id)
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Strategy tried first for this language.
    #[must_use]
    pub fn preferred_strategy(self) -> Strategy {
        match self {
            Self::Rust | Self::Python | Self::JavaScript | Self::TypeScript | Self::Go => {
                Strategy::Ast
            }
            Self::Dart
            | Self::Java
            | Self::Kotlin
            | Self::Swift
            | Self::CSharp
            | Self::C
            | Self::Cpp
            | Self::Php => Strategy::Pattern,
            Self::Bash | Self::Toml | Self::Json | Self::Markdown => Strategy::Line,
            Self::Text => Strategy::Generic,
        }
    }

    /// Map a syntax node kind to the chunk type it produces, if it is an
    /// entity worth chunking. `in_container` is set for nodes nested inside
    /// a class-like body, where functions become methods.
    #[must_use]
    pub fn entity_chunk_type(self, kind: &str, in_container: bool) -> Option<ChunkType> {
        let function = if in_container {
            ChunkType::Method
        } else {
            ChunkType::Function
        };
        match (self, kind) {
            (Self::Rust, "function_item" | "macro_definition") => Some(function),
            (Self::Rust, "struct_item" | "trait_item" | "impl_item" | "union_item") => {
                Some(ChunkType::Class)
            }
            (Self::Rust, "enum_item") => Some(ChunkType::Enum),
            (Self::Rust, "type_item") => Some(ChunkType::Typedef),
            (Self::Rust, "mod_item") => Some(ChunkType::Module),
            (Self::Rust, "const_item" | "static_item") => Some(ChunkType::Statement),

            (Self::Python, "function_definition") => Some(function),
            (Self::Python, "class_definition") => Some(ChunkType::Class),

            (
                Self::JavaScript | Self::TypeScript,
                "function_declaration" | "generator_function_declaration",
            ) => Some(function),
            (Self::JavaScript | Self::TypeScript, "method_definition") => Some(ChunkType::Method),
            (
                Self::JavaScript | Self::TypeScript,
                "class_declaration" | "abstract_class_declaration" | "interface_declaration",
            ) => Some(ChunkType::Class),
            (Self::TypeScript, "enum_declaration") => Some(ChunkType::Enum),
            (Self::TypeScript, "type_alias_declaration") => Some(ChunkType::Typedef),
            (Self::TypeScript, "internal_module" | "module") => Some(ChunkType::Module),

            (Self::Go, "function_declaration") => Some(ChunkType::Function),
            (Self::Go, "method_declaration") => Some(ChunkType::Method),
            (Self::Go, "type_declaration") => Some(ChunkType::Typedef),
            _ => None,
        }
    }

    /// Node kinds whose children are methods rather than functions.
    #[must_use]
    pub fn is_container(self, kind: &str) -> bool {
        matches!(
            (self, kind),
            (Self::Rust, "impl_item" | "trait_item")
                | (Self::Python, "class_definition")
                | (
                    Self::JavaScript | Self::TypeScript,
                    "class_declaration" | "abstract_class_declaration" | "class"
                )
        )
    }

    /// Top-level node kinds holding imports.
    #[must_use]
    pub fn import_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["use_declaration", "extern_crate_declaration"],
            Self::Python => &["import_statement", "import_from_statement"],
            Self::JavaScript | Self::TypeScript => &["import_statement"],
            Self::Go => &["import_declaration"],
            _ => &[],
        }
    }

    /// Node kinds for call expressions, with the field naming the callee.
    #[must_use]
    pub fn call_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["call_expression", "macro_invocation"],
            Self::Python => &["call"],
            Self::JavaScript | Self::TypeScript => &["call_expression", "new_expression"],
            Self::Go => &["call_expression"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let lang = match ext.as_str() {
        "rs" => Lang::Rust,
        "py" | "pyi" => Lang::Python,
        "js" | "jsx" | "mjs" | "cjs" => Lang::JavaScript,
        "ts" | "tsx" | "mts" | "cts" => Lang::TypeScript,
        "go" => Lang::Go,
        "dart" => Lang::Dart,
        "java" => Lang::Java,
        "kt" | "kts" => Lang::Kotlin,
        "swift" => Lang::Swift,
        "cs" => Lang::CSharp,
        "c" | "h" => Lang::C,
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Lang::Cpp,
        "php" => Lang::Php,
        "sh" | "bash" | "zsh" => Lang::Bash,
        "toml" => Lang::Toml,
        "json" | "jsonc" => Lang::Json,
        "md" | "markdown" => Lang::Markdown,
        _ => return None,
    };
    Some(lang)
}

/// Language for a path, defaulting to [`Lang::Text`].
#[must_use]
pub fn language_for(path: &Path) -> Lang {
    detect_language(path).unwrap_or(Lang::Text)
}
