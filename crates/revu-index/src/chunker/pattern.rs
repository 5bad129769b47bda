//! Regex declaration detection for languages without a bundled grammar.
//!
//! Class-like and function-like declarations are found line by line and
//! their bodies delimited by brace matching. Functions declared inside a
//! class body become methods. Long files with at most one declaration are
//! topped up with line windows.

use std::sync::LazyLock;

use regex::Regex;

use super::{ChunkType, ChunkerConfig, CodeChunk, chunk_from_lines, line};
use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// Lines after a declaration head searched for its opening brace.
const MAX_HEAD_LINES: usize = 4;

struct PatternSet {
    class: Regex,
    function: Regex,
}

fn compile(class: &str, function: &str) -> PatternSet {
    PatternSet {
        class: Regex::new(class).expect("valid regex"),
        function: Regex::new(function).expect("valid regex"),
    }
}

/// Return type (or modifiers) followed by a name and an opening paren.
const C_STYLE_FUNCTION: &str = r"^\s*(?:[\w<>\[\]?,.*&:]+\s+)+[*&]?(?P<name>[A-Za-z_]\w*)\s*\(";

static DART: LazyLock<PatternSet> = LazyLock::new(|| {
    compile(
        r"^\s*(?:(?:abstract|sealed|base|final|interface)\s+)*(?P<kind>class|mixin|extension|enum)\s+(?P<name>\w+)",
        C_STYLE_FUNCTION,
    )
});

static JAVA: LazyLock<PatternSet> = LazyLock::new(|| {
    compile(
        r"^\s*(?:(?:public|private|protected|abstract|final|static|sealed|non-sealed|strictfp)\s+)*(?P<kind>class|interface|enum|record|@interface)\s+(?P<name>\w+)",
        C_STYLE_FUNCTION,
    )
});

static KOTLIN: LazyLock<PatternSet> = LazyLock::new(|| {
    compile(
        r"^\s*(?:(?:public|private|protected|internal|abstract|open|sealed|data|inner|value|annotation|enum)\s+)*(?P<kind>class|interface|object)\s+(?P<name>\w+)",
        r"^\s*(?:(?:public|private|protected|internal|override|open|suspend|inline|operator|infix|tailrec|abstract)\s+)*fun\s+(?:<[^>]+>\s*)?(?:[\w.]+\.)?(?P<name>\w+)\s*\(",
    )
});

static SWIFT: LazyLock<PatternSet> = LazyLock::new(|| {
    compile(
        r"^\s*(?:(?:public|private|fileprivate|internal|open|final|indirect)\s+)*(?P<kind>class|struct|protocol|extension|enum|actor)\s+(?P<name>\w+)",
        r"^\s*(?:(?:public|private|fileprivate|internal|open|override|static|class|mutating|final|@\w+)\s+)*func\s+(?P<name>\w+)",
    )
});

static CSHARP: LazyLock<PatternSet> = LazyLock::new(|| {
    compile(
        r"^\s*(?:(?:public|private|protected|internal|abstract|sealed|static|partial|readonly)\s+)*(?P<kind>class|interface|struct|enum|record|namespace)\s+(?P<name>[\w.]+)",
        C_STYLE_FUNCTION,
    )
});

static C: LazyLock<PatternSet> = LazyLock::new(|| {
    compile(
        r"^\s*(?:typedef\s+)?(?P<kind>struct|union|enum)\s+(?P<name>\w+)\s*\{?\s*$",
        C_STYLE_FUNCTION,
    )
});

static CPP: LazyLock<PatternSet> = LazyLock::new(|| {
    compile(
        r"^\s*(?:template\s*<[^>]*>\s*)?(?P<kind>class|struct|union|enum(?:\s+class)?|namespace)\s+(?P<name>\w+)[^;]*$",
        C_STYLE_FUNCTION,
    )
});

static PHP: LazyLock<PatternSet> = LazyLock::new(|| {
    compile(
        r"^\s*(?:(?:abstract|final|readonly)\s+)*(?P<kind>class|interface|trait|enum)\s+(?P<name>\w+)",
        r"^\s*(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+&?(?P<name>\w+)\s*\(",
    )
});

const CONTROL_WORDS: &[&str] = &[
    "if", "for", "foreach", "while", "switch", "catch", "return", "new", "else", "do", "try",
    "sizeof", "throw", "await", "yield", "case", "using", "lock", "synchronized", "assert",
];

fn patterns(lang: Lang) -> Option<&'static PatternSet> {
    Some(match lang {
        Lang::Dart => &*DART,
        Lang::Java => &*JAVA,
        Lang::Kotlin => &*KOTLIN,
        Lang::Swift => &*SWIFT,
        Lang::CSharp => &*CSHARP,
        Lang::C => &*C,
        Lang::Cpp => &*CPP,
        Lang::Php => &*PHP,
        _ => return None,
    })
}

pub(super) fn supports(lang: Lang) -> bool {
    patterns(lang).is_some()
}

fn kind_to_type(kind: &str) -> ChunkType {
    match kind {
        "namespace" => ChunkType::Module,
        k if k.starts_with("enum") => ChunkType::Enum,
        _ => ChunkType::Class,
    }
}

pub(super) fn chunk(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> Result<Vec<CodeChunk>> {
    let set = patterns(lang).ok_or_else(|| IndexError::UnsupportedLanguage(lang.id().into()))?;
    let lines: Vec<&str> = source.lines().collect();
    let mut chunks = Vec::new();
    let mut classes: Vec<(usize, usize)> = Vec::new();
    let mut recognized = 0usize;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = set.class.captures(line) {
            let name = caps.name("name").map(|m| m.as_str().to_owned());
            let kind = caps.name("kind").map_or("class", |m| m.as_str());
            if let Some(end) = find_block_end(&lines, i) {
                recognized += 1;
                classes.push((i, end));
                push_if_large(&mut chunks, &lines, i, end, file_path, lang, kind_to_type(kind), name, config);
            }
            // Keep scanning inside the body for methods.
            i += 1;
            continue;
        }

        if let Some(caps) = set.function.captures(line) {
            let name = caps.name("name").map(|m| m.as_str().to_owned());
            let is_control = name.as_deref().is_some_and(|n| CONTROL_WORDS.contains(&n))
                || line
                    .split_whitespace()
                    .next()
                    .is_some_and(|w| CONTROL_WORDS.contains(&w.trim_start_matches('}')));
            if !is_control && let Some(end) = find_block_end(&lines, i) {
                recognized += 1;
                let inside_class = classes.iter().any(|&(s, e)| s < i && end <= e);
                let chunk_type = if inside_class {
                    ChunkType::Method
                } else {
                    ChunkType::Function
                };
                push_if_large(&mut chunks, &lines, i, end, file_path, lang, chunk_type, name, config);
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }

    if recognized == 0 {
        return Err(IndexError::Parse(format!(
            "no {lang} declarations recognized in {file_path}"
        )));
    }
    if chunks.len() < 2 && lines.len() > config.max_chunk_size {
        line::supplement(source, file_path, lang, config, &mut chunks);
        chunks.sort_by(|a, b| {
            a.start_line
                .cmp(&b.start_line)
                .then(b.end_line.cmp(&a.end_line))
        });
    }
    Ok(chunks)
}

#[allow(clippy::too_many_arguments)]
fn push_if_large(
    chunks: &mut Vec<CodeChunk>,
    lines: &[&str],
    start: usize,
    end: usize,
    file_path: &str,
    lang: Lang,
    chunk_type: ChunkType,
    name: Option<String>,
    config: &ChunkerConfig,
) {
    if end - start + 1 > config.min_chunk_lines {
        chunks.push(chunk_from_lines(lines, start, end, file_path, lang, chunk_type, name));
    }
}

/// Line index closing the block opened at or shortly after `head`.
///
/// Returns `None` when a `;` or `=>` ends the declaration before any `{`
/// (prototypes, abstract members, expression bodies). An unclosed block
/// runs to the end of the file.
fn find_block_end(lines: &[&str], head: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut opened = false;

    for (offset, line) in lines[head..].iter().enumerate() {
        let idx = head + offset;
        if !opened && offset > MAX_HEAD_LINES {
            return None;
        }
        let mut chars = line.chars().peekable();
        let mut quote: Option<char> = None;
        while let Some(c) = chars.next() {
            if let Some(q) = quote {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '/' if chars.peek() == Some(&'/') => break,
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' if opened => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                ';' if !opened => return None,
                '=' if !opened && chars.peek() == Some(&'>') => return None,
                _ => {}
            }
        }
    }
    opened.then(|| lines.len() - 1)
}
