//! Text heuristics shared by the chunking strategies: decision-point
//! counting, import recognition and call-target extraction.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::languages::Lang;

static DECISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|elif|for|foreach|while|case|catch|except)\b|&&|\|\||\s\?\s")
        .expect("valid regex")
});

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:import\b|from\s+\S+\s+import\b|use\s|using\s|#\s*include\b|extern\s+crate\b|require(?:_once)?\b|.*\brequire\s*\()",
    )
    .expect("valid regex")
});

static CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*!?\s*\(").expect("valid regex"));

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid regex"));

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'<]([^"'<>]+)["'>]"#).expect("valid regex"));

const NOT_CALLS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "fn", "function", "def", "func", "match",
    "sizeof", "typeof", "elif", "except", "with", "assert", "print", "super", "this", "self",
    "await", "yield", "void", "new", "else", "do", "try", "when", "guard", "in", "and", "or",
    "not", "lambda", "async", "constructor", "init",
];

const IMPORT_NOISE: &[&str] = &[
    "as", "self", "super", "crate", "type", "static", "default", "import", "from", "use", "using",
    "require", "require_once", "include", "extern", "package", "dart", "const", "let", "var",
];

/// Decision points plus one: `if`, loops, `case`, `catch`, short-circuit
/// operators and the ternary operator.
#[must_use]
pub fn keyword_complexity(text: &str) -> u32 {
    let count = DECISION.find_iter(text).count();
    u32::try_from(count).unwrap_or(u32::MAX).saturating_add(1)
}

pub(crate) fn is_import_line(line: &str, lang: Lang) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") || (trimmed.starts_with('#') && !trimmed.starts_with("#include")) {
        return false;
    }
    if lang == Lang::Rust && trimmed.starts_with("pub use ") {
        return true;
    }
    IMPORT_LINE.is_match(line)
}

/// Names an import line brings into scope.
pub(crate) fn import_names(line: &str) -> Vec<String> {
    let trimmed = line.trim().trim_end_matches(';').trim();
    let mut names = Vec::new();

    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}'))
        && open < close
    {
        names.extend(idents(&trimmed[open + 1..close]));
    } else if let Some(pos) = trimmed.find(" import ").filter(|_| trimmed.starts_with("from ")) {
        names.extend(idents(&trimmed[pos + " import ".len()..]));
    } else if let Some(caps) = QUOTED.captures(trimmed) {
        let path = &caps[1];
        let leaf = path.rsplit(['/', ':']).next().unwrap_or(path);
        let stem = leaf.split('.').next().unwrap_or(leaf);
        if !stem.is_empty() {
            names.push(stem.to_owned());
        }
        // `import Foo from 'x'` / `import * as ns from 'x'`
        if let Some(rest) = trimmed.strip_prefix("import ")
            && let Some(binding) = rest.split(" from ").next().filter(|_| rest.contains(" from "))
        {
            names.extend(idents(binding));
        }
    } else {
        let body = trimmed
            .split_whitespace()
            .skip_while(|w| IMPORT_NOISE.contains(w) || *w == "pub")
            .collect::<Vec<_>>()
            .join(" ");
        if let Some((_, alias)) = body.split_once(" as ") {
            names.extend(idents(alias));
        } else {
            let leaf = body.rsplit("::").next().unwrap_or(body.as_str());
            let leaf = leaf.rsplit(['.', '\\']).next().unwrap_or(leaf);
            names.extend(idents(leaf));
        }
    }

    names.retain(|n| !IMPORT_NOISE.contains(&n.as_str()) && n != "*");
    names
}

fn idents(text: &str) -> Vec<String> {
    IDENT
        .find_iter(text)
        .map(|m| m.as_str().to_owned())
        .filter(|s| !IMPORT_NOISE.contains(&s.as_str()))
        .collect()
}

/// Identifiers used as call targets in `text`, excluding keywords and `own_name`.
pub(crate) fn call_targets(text: &str, own_name: Option<&str>) -> BTreeSet<String> {
    CALL.captures_iter(text)
        .map(|c| c[1].to_owned())
        .filter(|name| !NOT_CALLS.contains(&name.as_str()) && Some(name.as_str()) != own_name)
        .collect()
}

/// Members of `candidates` that appear as identifiers in `content`.
pub(crate) fn referenced_names(content: &str, candidates: &BTreeSet<String>) -> BTreeSet<String> {
    IDENT
        .find_iter(content)
        .map(|m| m.as_str())
        .filter(|name| candidates.contains(*name))
        .map(str::to_owned)
        .collect()
}

/// Last path segment of a callee expression such as `a::b::run` or `obj.run`.
pub(crate) fn callee_name(callee: &str, own_name: Option<&str>) -> Option<String> {
    let last = callee.rsplit(['.', ':']).find(|s| !s.trim().is_empty())?;
    let name = IDENT.find_iter(last).last()?.as_str();
    (!NOT_CALLS.contains(&name) && Some(name) != own_name).then(|| name.to_owned())
}

/// Imported names referenced by `content`, and its full dependency set
/// (those imports plus call targets). Both sorted and deduplicated.
pub(crate) fn text_dependencies(
    content: &str,
    file_lines: &[&str],
    lang: Lang,
    own_name: Option<&str>,
) -> (Vec<String>, Vec<String>) {
    let used: HashSet<&str> = IDENT.find_iter(content).map(|m| m.as_str()).collect();
    let imports: BTreeSet<String> = file_lines
        .iter()
        .filter(|l| is_import_line(l, lang))
        .flat_map(|l| import_names(l))
        .filter(|name| used.contains(name.as_str()))
        .collect();
    finish_dependencies(imports, call_targets(content, own_name))
}

pub(crate) fn finish_dependencies(
    imports: BTreeSet<String>,
    calls: BTreeSet<String>,
) -> (Vec<String>, Vec<String>) {
    let dependencies: Vec<String> = imports.union(&calls).cloned().collect();
    (dependencies, imports.into_iter().collect())
}
