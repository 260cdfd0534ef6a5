//! Text chunking for semantic search
//!
//! Splits source files into chunks suitable for embedding, preferring
//! syntactic boundaries of the file's language (function, class and block
//! openers) before falling back to blank lines, lines, words and finally
//! characters. Line numbers are tracked for search result display.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// Languages with dedicated split boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Cpp,
    Go,
    Java,
    JavaScript,
    Php,
    Proto,
    Python,
    Rst,
    Ruby,
    Rust,
    Scala,
    Swift,
    Markdown,
    Latex,
    Html,
    Solidity,
    /// Anything without a dedicated table
    Generic,
}

const EXTENSIONS: &[(&str, Language)] = &[
    ("c", Language::Cpp),
    ("h", Language::Cpp),
    ("cc", Language::Cpp),
    ("cpp", Language::Cpp),
    ("cxx", Language::Cpp),
    ("hpp", Language::Cpp),
    ("hxx", Language::Cpp),
    ("go", Language::Go),
    ("java", Language::Java),
    ("js", Language::JavaScript),
    ("jsx", Language::JavaScript),
    ("mjs", Language::JavaScript),
    ("cjs", Language::JavaScript),
    ("ts", Language::JavaScript),
    ("tsx", Language::JavaScript),
    ("php", Language::Php),
    ("proto", Language::Proto),
    ("py", Language::Python),
    ("pyi", Language::Python),
    ("pyw", Language::Python),
    ("rst", Language::Rst),
    ("rb", Language::Ruby),
    ("rake", Language::Ruby),
    ("rs", Language::Rust),
    ("scala", Language::Scala),
    ("sc", Language::Scala),
    ("swift", Language::Swift),
    ("md", Language::Markdown),
    ("mdx", Language::Markdown),
    ("markdown", Language::Markdown),
    ("tex", Language::Latex),
    ("html", Language::Html),
    ("htm", Language::Html),
    ("sol", Language::Solidity),
];

const GENERIC: &[&str] = &["\n\n", "\n", " ", ""];

const CPP: &[&str] = &[
    "\nclass ", "\nvoid ", "\nint ", "\nfloat ", "\ndouble ", "\nif ", "\nfor ", "\nwhile ",
    "\nswitch ", "\ncase ", "\n\n", "\n", " ", "",
];
const GO: &[&str] = &[
    "\nfunc ", "\nvar ", "\nconst ", "\ntype ", "\nif ", "\nfor ", "\nswitch ", "\ncase ",
    "\n\n", "\n", " ", "",
];
const JAVA: &[&str] = &[
    "\nclass ", "\npublic ", "\nprotected ", "\nprivate ", "\nstatic ", "\nif ", "\nfor ",
    "\nwhile ", "\nswitch ", "\ncase ", "\n\n", "\n", " ", "",
];
const JAVASCRIPT: &[&str] = &[
    "\nfunction ", "\nconst ", "\nlet ", "\nvar ", "\nclass ", "\nif ", "\nfor ", "\nwhile ",
    "\nswitch ", "\ncase ", "\ndefault ", "\n\n", "\n", " ", "",
];
const PHP: &[&str] = &[
    "\nfunction ", "\nclass ", "\nif ", "\nforeach ", "\nwhile ", "\ndo ", "\nswitch ",
    "\ncase ", "\n\n", "\n", " ", "",
];
const PROTO: &[&str] = &[
    "\nmessage ", "\nservice ", "\nenum ", "\noption ", "\nimport ", "\nsyntax ", "\n\n", "\n",
    " ", "",
];
const PYTHON: &[&str] = &["\nclass ", "\ndef ", "\n\tdef ", "\n\n", "\n", " ", ""];
const RST: &[&str] = &[
    "\n===\n", "\n---\n", "\n***\n", "\n.. ", "\n\n", "\n", " ", "",
];
const RUBY: &[&str] = &[
    "\ndef ", "\nclass ", "\nif ", "\nunless ", "\nwhile ", "\nfor ", "\ndo ", "\nbegin ",
    "\nrescue ", "\n\n", "\n", " ", "",
];
const RUST: &[&str] = &[
    "\nfn ", "\nconst ", "\nlet ", "\nif ", "\nwhile ", "\nfor ", "\nloop ", "\nmatch ",
    "\nconst ", "\n\n", "\n", " ", "",
];
const SCALA: &[&str] = &[
    "\nclass ", "\nobject ", "\ndef ", "\nval ", "\nvar ", "\nif ", "\nfor ", "\nwhile ",
    "\nmatch ", "\ncase ", "\n\n", "\n", " ", "",
];
const SWIFT: &[&str] = &[
    "\nfunc ", "\nclass ", "\nstruct ", "\nenum ", "\nif ", "\nfor ", "\nwhile ", "\ndo ",
    "\nswitch ", "\ncase ", "\n\n", "\n", " ", "",
];
const MARKDOWN: &[&str] = &[
    "\n## ", "\n### ", "\n#### ", "\n##### ", "\n###### ", "```\n\n", "\n\n***\n\n",
    "\n\n---\n\n", "\n\n___\n\n", "\n\n", "\n", " ", "",
];
const LATEX: &[&str] = &[
    "\n\\chapter{", "\n\\section{", "\n\\subsection{", "\n\\subsubsection{",
    "\n\\begin{enumerate}", "\n\\begin{itemize}", "\n\\begin{description}",
    "\n\\begin{list}", "\n\\begin{quote}", "\n\\begin{quotation}", "\n\\begin{verse}",
    "\n\\begin{verbatim}", "\n\\begin{align}", "$$", "$", " ", "",
];
const HTML: &[&str] = &[
    "<body", "<div", "<p", "<br", "<li", "<h1", "<h2", "<h3", "<h4", "<h5", "<h6", "<span",
    "<table", "<tr", "<td", "<th", "<ul", "<ol", "<header", "<footer", "<nav", "<head",
    "<style", "<script", "<meta", "<title", "",
];
const SOLIDITY: &[&str] = &[
    "\npragma ", "\nusing ", "\ncontract ", "\ninterface ", "\nlibrary ", "\nconstructor ",
    "\ntype ", "\nfunction ", "\nevent ", "\nmodifier ", "\nerror ", "\nstruct ", "\nenum ",
    "\nif ", "\nfor ", "\nwhile ", "\ndo while ", "\nassembly ", "\n\n", "\n", " ", "",
];

impl Language {
    /// Detect from the file extension; unknown extensions are [`Language::Generic`]
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| {
                EXTENSIONS
                    .iter()
                    .find(|(known, _)| *known == ext)
                    .map(|(_, language)| *language)
            })
            .unwrap_or(Language::Generic)
    }

    /// Split boundaries, most syntactic first
    pub fn separators(self) -> &'static [&'static str] {
        match self {
            Self::Cpp => CPP,
            Self::Go => GO,
            Self::Java => JAVA,
            Self::JavaScript => JAVASCRIPT,
            Self::Php => PHP,
            Self::Proto => PROTO,
            Self::Python => PYTHON,
            Self::Rst => RST,
            Self::Ruby => RUBY,
            Self::Rust => RUST,
            Self::Scala => SCALA,
            Self::Swift => SWIFT,
            Self::Markdown => MARKDOWN,
            Self::Latex => LATEX,
            Self::Html => HTML,
            Self::Solidity => SOLIDITY,
            Self::Generic => GENERIC,
        }
    }
}

/// A piece of a file with its 1-indexed, inclusive line range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// The text content
    pub text: String,
    /// Starting line number (1-indexed)
    pub start_line: usize,
    /// Ending line number (1-indexed)
    pub end_line: usize,
}

/// Recursive, separator-driven text splitter
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a new chunker with specified sizes
    ///
    /// # Arguments
    /// * `chunk_size` - Target size for each chunk in characters
    /// * `overlap` - Number of characters repeated between neighbouring chunks
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Split text into chunks
    ///
    /// Any non-empty input yields at least one chunk.
    pub fn split(&self, text: &str, language: Language) -> Vec<TextChunk> {
        if text.is_empty() {
            return vec![];
        }

        let mut spans = Vec::new();
        self.split_spans(text, 0, language.separators(), &mut spans);

        let mut chunks: Vec<TextChunk> = spans
            .into_iter()
            .filter_map(|span| trimmed(text, span))
            .map(|span| to_chunk(text, span))
            .collect();

        if chunks.is_empty() {
            chunks.push(to_chunk(text, 0..text.len()));
        }

        chunks
    }

    /// Recursively split `text` (located at byte `base` of the file) into
    /// merged spans of at most `chunk_size` characters
    fn split_spans(&self, text: &str, base: usize, separators: &[&str], out: &mut Vec<Range<usize>>) {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let mut fitting: Vec<Range<usize>> = Vec::new();

        for piece in split_keep_separator(text, separator) {
            let piece_text = &text[piece.clone()];
            if char_len(piece_text) <= self.chunk_size {
                fitting.push(offset(piece, base));
                continue;
            }

            if !fitting.is_empty() {
                self.merge(text, base, &fitting, out);
                fitting.clear();
            }

            if remaining.is_empty() {
                out.push(offset(piece, base));
            } else {
                self.split_spans(piece_text, base + piece.start, remaining, out);
            }
        }

        if !fitting.is_empty() {
            self.merge(text, base, &fitting, out);
        }
    }

    /// Greedily join adjacent pieces while they fit
    fn merge(&self, text: &str, base: usize, pieces: &[Range<usize>], out: &mut Vec<Range<usize>>) {
        let len_of = |span: &Range<usize>| char_len(&text[span.start - base..span.end - base]);

        let mut window: Vec<Range<usize>> = Vec::new();
        let mut window_len = 0;

        for piece in pieces {
            let piece_len = len_of(piece);

            if window_len + piece_len > self.chunk_size && !window.is_empty() {
                out.push(window[0].start..window[window.len() - 1].end);

                // Drop from the front until only the overlap remains
                while !window.is_empty()
                    && (window_len > self.overlap || window_len + piece_len > self.chunk_size)
                {
                    window_len -= len_of(&window[0]);
                    window.remove(0);
                }
            }

            window.push(piece.clone());
            window_len += piece_len;
        }

        if let (Some(first), Some(last)) = (window.first(), window.last()) {
            out.push(first.start..last.end);
        }
    }
}

/// Text handed to the embedding provider: the chunk prefixed with its source
pub fn embedding_input(file_path: &str, chunk_text: &str) -> String {
    format!("File name: {}\n---\n\n{}", file_path, chunk_text)
}

/// Split into contiguous pieces, each piece after the first starting with
/// the separator. An empty separator splits into characters.
fn split_keep_separator(text: &str, separator: &str) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| i..i + c.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, _) in text.match_indices(separator) {
        if i > start {
            pieces.push(start..i);
        }
        start = i;
    }
    if start < text.len() {
        pieces.push(start..text.len());
    }
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn offset(span: Range<usize>, base: usize) -> Range<usize> {
    span.start + base..span.end + base
}

/// Shrink a span to exclude surrounding whitespace; `None` when nothing is left
fn trimmed(text: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[span.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let inner = slice.trim();
    if inner.is_empty() {
        return None;
    }
    let start = span.start + leading;
    Some(start..start + inner.len())
}

fn to_chunk(text: &str, span: Range<usize>) -> TextChunk {
    let start_line = text[..span.start].matches('\n').count() + 1;
    let body = &text[span];
    let end_line = start_line + body.trim_end_matches('\n').matches('\n').count();
    TextChunk {
        text: body.to_string(),
        start_line,
        end_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_file_is_one_chunk() {
        let chunker = Chunker::new(100, 0);
        let chunks = chunker.split("line 1\nline 2\nline 3", Language::Python);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn test_empty_and_blank_input() {
        let chunker = Chunker::new(100, 0);
        assert!(chunker.split("", Language::Rust).is_empty());

        let chunks = chunker.split("   \n\n  ", Language::Rust);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn test_python_splits_at_definitions() {
        let source = "import os\n\ndef alpha():\n    return 1\n\ndef beta():\n    return 2\n";
        let chunker = Chunker::new(30, 0);
        let chunks = chunker.split(source, Language::Python);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "import os");
        assert!(chunks[1].text.starts_with("def alpha()"));
        assert_eq!(chunks[1].start_line, 3);
        assert_eq!(chunks[1].end_line, 4);
        assert!(chunks[2].text.starts_with("def beta()"));
        assert_eq!(chunks[2].start_line, 6);
        assert_eq!(chunks[2].end_line, 7);
    }

    #[test]
    fn test_chunks_respect_size_and_cover_text() {
        let source: String = (0..200)
            .map(|i| format!("let value_{} = compute({});\n", i, i))
            .collect();
        let chunker = Chunker::new(120, 0);
        let chunks = chunker.split(&source, Language::Generic);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 120);
            assert!(chunk.start_line <= chunk.end_line);
        }
        for pair in chunks.windows(2) {
            assert!(pair[0].end_line < pair[1].start_line);
        }
        let rejoined: String = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n");
        assert_eq!(rejoined, source.trim());
    }

    #[test]
    fn test_long_token_falls_back_to_characters() {
        let chunker = Chunker::new(10, 0);
        let chunks = chunker.split(&"é".repeat(25), Language::Generic);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.chars().count(), 10);
        assert_eq!(chunks[2].text.chars().count(), 5);
    }

    #[test]
    fn test_overlap_repeats_tail_pieces() {
        let chunker = Chunker::new(12, 6);
        let chunks = chunker.split("aa bb cc dd ee ff", Language::Generic);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "aa bb cc dd");
        assert_eq!(chunks[1].text, "cc dd ee ff");
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_path(Path::new("main.rs")), Language::Rust);
        assert_eq!(Language::from_path(Path::new("app.PY")), Language::Python);
        assert_eq!(Language::from_path(Path::new("index.tsx")), Language::JavaScript);
        assert_eq!(Language::from_path(Path::new("README")), Language::Generic);
        assert_eq!(Language::from_path(Path::new("data.xyz")), Language::Generic);
        assert_eq!(Language::Generic.separators().last(), Some(&""));
    }

    #[test]
    fn test_embedding_input_has_header() {
        let input = embedding_input("/repo/src/a.py", "def a(): pass");
        assert!(input.starts_with("File name: /repo/src/a.py\n---\n\n"));
        assert!(input.ends_with("def a(): pass"));
    }
}
