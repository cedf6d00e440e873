//! Reader and writer helpers for the block-structured text format used by
//! both the configuration file and the frequency database.
//!
//! ```text
//! # comment
//! interval 5
//! dbFile "/var/lib/spy/db"
//! ignoredPrefix {
//!     /proc
//!     "/with space"; /dev
//! }
//! ```
//!
//! A directive is a name followed by zero or more parameters and an optional
//! `{ ... }` block of child directives. Directives end at a newline or `;`.
//! Words are either bare atoms (a backslash escapes the next character),
//! double-quoted strings (`\\`, `\"`, `\n` and `\t` escapes) or single-quoted
//! literals. Words are raw bytes: anything that is not syntax passes through
//! unchanged, so paths that are not UTF-8 survive a write and read back.

/// A single parsed directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: Vec<u8>,
    pub params: Vec<Vec<u8>>,
    /// `None` when the directive has no block, `Some(vec![])` for `{}`.
    pub children: Option<Vec<Directive>>,
    /// 1-based line of the directive name.
    pub line: usize,
}

impl Directive {
    /// Name for diagnostics, with invalid UTF-8 replaced.
    pub fn display_name(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Syntax error; the whole document is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ScfgError {
    pub line: usize,
    pub message: String,
}

impl ScfgError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(Vec<u8>),
    Open,
    Close,
    End,
}

fn tokenize(input: &[u8]) -> Result<Vec<(Token, usize)>, ScfgError> {
    let mut tokens = Vec::new();
    let mut bytes = input.iter().copied().peekable();
    let mut line = 1;

    while let Some(&b) = bytes.peek() {
        match b {
            b'\n' => {
                bytes.next();
                tokens.push((Token::End, line));
                line += 1;
            }
            b';' => {
                bytes.next();
                tokens.push((Token::End, line));
            }
            b if b.is_ascii_whitespace() => {
                bytes.next();
            }
            b'#' => {
                while bytes.peek().is_some_and(|&b| b != b'\n') {
                    bytes.next();
                }
            }
            b'{' => {
                bytes.next();
                tokens.push((Token::Open, line));
            }
            b'}' => {
                bytes.next();
                tokens.push((Token::Close, line));
            }
            b'"' => {
                bytes.next();
                let mut word = Vec::new();
                loop {
                    match bytes.next() {
                        Some(b'"') => break,
                        Some(b'\\') => match bytes.next() {
                            Some(b'n') => word.push(b'\n'),
                            Some(b't') => word.push(b'\t'),
                            Some(b'\n') | None => {
                                return Err(ScfgError::new(line, "unterminated quoted string"));
                            }
                            Some(other) => word.push(other),
                        },
                        Some(b'\n') | None => {
                            return Err(ScfgError::new(line, "unterminated quoted string"));
                        }
                        Some(other) => word.push(other),
                    }
                }
                tokens.push((Token::Word(word), line));
            }
            b'\'' => {
                bytes.next();
                let mut word = Vec::new();
                loop {
                    match bytes.next() {
                        Some(b'\'') => break,
                        Some(b'\n') | None => {
                            return Err(ScfgError::new(line, "unterminated quoted string"));
                        }
                        Some(other) => word.push(other),
                    }
                }
                tokens.push((Token::Word(word), line));
            }
            _ => {
                let mut word = Vec::new();
                while let Some(&b) = bytes.peek() {
                    if b.is_ascii_whitespace() || matches!(b, b';' | b'{' | b'}' | b'"' | b'\'') {
                        break;
                    }
                    bytes.next();
                    if b == b'\\' {
                        match bytes.next() {
                            Some(b'\n') | None => {
                                return Err(ScfgError::new(line, "dangling escape"));
                            }
                            Some(escaped) => word.push(escaped),
                        }
                    } else {
                        word.push(b);
                    }
                }
                tokens.push((Token::Word(word), line));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.pos)
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map(|(_, line)| *line).unwrap_or(1)
    }

    fn block(&mut self, depth: usize) -> Result<Vec<Directive>, ScfgError> {
        let mut directives = Vec::new();

        loop {
            let Some((token, line)) = self.peek().cloned() else {
                if depth > 0 {
                    return Err(ScfgError::new(self.last_line(), "missing closing '}'"));
                }
                return Ok(directives);
            };

            match token {
                Token::End => self.pos += 1,
                Token::Close => {
                    if depth == 0 {
                        return Err(ScfgError::new(line, "unexpected '}'"));
                    }
                    self.pos += 1;
                    return Ok(directives);
                }
                Token::Open => return Err(ScfgError::new(line, "block without a directive name")),
                Token::Word(name) => {
                    self.pos += 1;
                    directives.push(self.directive(name, line, depth)?);
                }
            }
        }
    }

    fn directive(&mut self, name: Vec<u8>, line: usize, depth: usize) -> Result<Directive, ScfgError> {
        let mut params = Vec::new();
        let mut children = None;

        while let Some((token, _)) = self.peek().cloned() {
            match token {
                Token::Word(word) => {
                    params.push(word);
                    self.pos += 1;
                }
                Token::Open => {
                    self.pos += 1;
                    children = Some(self.block(depth + 1)?);
                    break;
                }
                Token::End | Token::Close => break,
            }
        }

        if children.is_some()
            && let Some((Token::Word(_), word_line)) = self.peek()
        {
            return Err(ScfgError::new(*word_line, "unexpected word after '}'"));
        }

        Ok(Directive {
            name,
            params,
            children,
            line,
        })
    }
}

/// Parses a whole document into its top-level directives.
pub fn parse(input: impl AsRef<[u8]>) -> Result<Vec<Directive>, ScfgError> {
    let tokens = tokenize(input.as_ref())?;
    Parser { tokens, pos: 0 }.block(0)
}

/// Quotes a word so that `parse` returns it unchanged.
///
/// Only the quote, backslash, newline and tab bytes are escaped; every other
/// byte is copied as is.
pub fn quote(word: &[u8]) -> Vec<u8> {
    let mut quoted = Vec::with_capacity(word.len() + 2);
    quoted.push(b'"');
    for &b in word {
        match b {
            b'\\' => quoted.extend_from_slice(b"\\\\"),
            b'"' => quoted.extend_from_slice(b"\\\""),
            b'\n' => quoted.extend_from_slice(b"\\n"),
            b'\t' => quoted.extend_from_slice(b"\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push(b'"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(list: &[Vec<u8>]) -> Vec<&str> {
        list.iter().map(|w| std::str::from_utf8(w).unwrap()).collect()
    }

    #[test]
    fn test_parse_flat_directives() {
        let doc = parse("interval 5\ndbFile /var/lib/spy/db\n\n# comment\nprocDir '/proc'\n").unwrap();

        assert_eq!(doc.len(), 3);
        assert_eq!(doc[0].name, b"interval");
        assert_eq!(words(&doc[0].params), vec!["5"]);
        assert_eq!(doc[0].children, None);
        assert_eq!(words(&doc[1].params), vec!["/var/lib/spy/db"]);
        assert_eq!(doc[2].display_name(), "procDir");
        assert_eq!(words(&doc[2].params), vec!["/proc"]);
        assert_eq!(doc[2].line, 5);
    }

    #[test]
    fn test_parse_block_with_semicolons() {
        let doc = parse("ignoredPrefix { /proc; /dev; \"/with space\"; }\ninterval 1").unwrap();

        assert_eq!(doc.len(), 2);
        let children = doc[0].children.as_ref().unwrap();
        let names: Vec<Vec<u8>> = children.iter().map(|d| d.name.clone()).collect();
        assert_eq!(words(&names), vec!["/proc", "/dev", "/with space"]);
        assert!(children.iter().all(|d| d.params.is_empty()));
        assert_eq!(doc[1].name, b"interval");
    }

    #[test]
    fn test_parse_multiline_block() {
        let doc = parse("ignoredPrefix {\n    /proc\n    /dev\n}\n").unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc[0].children.as_ref().unwrap().len(), 2);
        assert_eq!(doc[0].children.as_ref().unwrap()[1].line, 3);
    }

    #[test]
    fn test_parse_empty_block() {
        let doc = parse("ignoredPrefix {}\n").unwrap();
        assert_eq!(doc[0].children, Some(Vec::new()));
    }

    #[test]
    fn test_quoted_escapes() {
        let doc = parse(r#""a \"b\" c\\d\ne\tf" 12"#).unwrap();
        assert_eq!(doc[0].display_name(), "a \"b\" c\\d\ne\tf");
        assert_eq!(words(&doc[0].params), vec!["12"]);
    }

    #[test]
    fn test_atom_escape() {
        let doc = parse(r"path\ with\ spaces 1").unwrap();
        assert_eq!(doc[0].display_name(), "path with spaces");
    }

    #[test]
    fn test_quote_round_trip() {
        for word in ["plain", "", "sp ace", "q\"uote", "back\\slash", "new\nline", "ta\tb", "{;}#'"] {
            let mut doc_text = quote(word.as_bytes());
            doc_text.extend_from_slice(b" 1");
            let doc = parse(&doc_text).unwrap();
            assert_eq!(doc[0].name, word.as_bytes());
        }
    }

    #[test]
    fn test_non_utf8_words_pass_through() {
        let word = b"/usr/lib/lib\xff\xfe \"x\".so";
        let mut doc_text = quote(word);
        doc_text.extend_from_slice(b" 3\n/bare\x80atom 4\n");

        let doc = parse(&doc_text).unwrap();
        assert_eq!(doc[0].name, word);
        assert_eq!(doc[1].name, b"/bare\x80atom");
        assert_eq!(words(&doc[1].params), vec!["4"]);
    }

    #[test]
    fn test_quote_keeps_raw_bytes() {
        assert_eq!(quote(b"/a\xff\tb"), b"\"/a\xff\\tb\"");
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse("\"open 1").unwrap_err().line, 1);
        assert_eq!(parse("a {\nb\n").unwrap_err().message, "missing closing '}'");
        assert_eq!(parse("a 1\n}\n").unwrap_err().line, 2);
        assert!(parse("{ a }").is_err());
        assert!(parse("a { b } c").is_err());
    }

    #[test]
    fn test_empty_document() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("\n\n# only comments\n").unwrap().is_empty());
    }
}
