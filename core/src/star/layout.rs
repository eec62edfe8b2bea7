//! Indentation layout.
//!
//! Scripts are indentation sensitive; the grammar is not. This pass rewrites
//! a source file into logical lines with explicit block markers so the pest
//! grammar can stay context free:
//!
//! - an increase in indentation emits [`INDENT`] at the start of the line,
//! - each closed block emits one [`DEDENT`] before the next statement,
//! - comments are dropped,
//! - lines joined by open brackets or a trailing backslash become one line;
//!   the swallowed newlines are re-emitted after it as blank lines so line
//!   numbers in parse errors still match the source.

use super::ast::Span;
use super::error::{Error, Result};

pub const INDENT: char = '\u{2}';
pub const DEDENT: char = '\u{3}';

const TAB_WIDTH: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    Single(char),
    Triple(char),
}

pub fn normalize(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len() + 16);
    let mut indents: Vec<usize> = vec![0];
    let mut depth: usize = 0;
    let mut quote: Option<Quote> = None;
    let mut pending_newlines = 0usize;
    let mut line_no = 0usize;
    let mut line_has_content = false;

    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut at_line_start = true;

    while i < chars.len() {
        if at_line_start && depth == 0 && quote.is_none() {
            at_line_start = false;
            // Measure indentation of a fresh logical line.
            let mut width = 0;
            let mut j = i;
            while j < chars.len() && (chars[j] == ' ' || chars[j] == '\t') {
                width = if chars[j] == '\t' {
                    (width / TAB_WIDTH + 1) * TAB_WIDTH
                } else {
                    width + 1
                };
                j += 1;
            }
            let blank = j >= chars.len() || chars[j] == '\n' || chars[j] == '#' || chars[j] == '\r';
            if blank {
                // Skip to end of line; emit a bare newline.
                while j < chars.len() && chars[j] != '\n' {
                    j += 1;
                }
                if j < chars.len() {
                    out.push('\n');
                    line_no += 1;
                    at_line_start = true;
                }
                i = j + 1;
                continue;
            }
            let current = *indents.last().unwrap_or(&0);
            if width > current {
                indents.push(width);
                out.push(INDENT);
            } else if width < current {
                while width < *indents.last().unwrap_or(&0) {
                    indents.pop();
                    out.push(DEDENT);
                }
                if width != *indents.last().unwrap_or(&0) {
                    return Err(Error::syntax(
                        "unindent does not match any outer indentation level",
                        Some(Span { line: line_no, col: width }),
                    ));
                }
            }
            i = j;
            line_has_content = true;
            continue;
        }

        let c = chars[i];
        match quote {
            Some(Quote::Single(q)) => {
                out.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == '\n' {
                    return Err(Error::syntax(
                        "unterminated string literal",
                        Some(Span { line: line_no, col: 0 }),
                    ));
                }
                if c == q {
                    quote = None;
                }
                i += 1;
            }
            Some(Quote::Triple(q)) => {
                if c == q && i + 2 < chars.len() && chars[i + 1] == q && chars[i + 2] == q {
                    out.push_str(&[q, q, q].iter().collect::<String>());
                    quote = None;
                    i += 3;
                    continue;
                }
                if c == '\\' && i + 1 < chars.len() {
                    out.push(c);
                    out.push(chars[i + 1]);
                    if chars[i + 1] == '\n' {
                        line_no += 1;
                    }
                    i += 2;
                    continue;
                }
                if c == '\n' {
                    line_no += 1;
                }
                out.push(c);
                i += 1;
            }
            None => match c {
                '#' => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                }
                '"' | '\'' => {
                    if i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c {
                        quote = Some(Quote::Triple(c));
                        out.push_str(&[c, c, c].iter().collect::<String>());
                        i += 3;
                    } else {
                        quote = Some(Quote::Single(c));
                        out.push(c);
                        i += 1;
                    }
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    out.push(c);
                    i += 1;
                }
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    out.push(c);
                    i += 1;
                }
                '\\' if i + 1 < chars.len() && chars[i + 1] == '\n' => {
                    out.push(' ');
                    pending_newlines += 1;
                    line_no += 1;
                    i += 2;
                }
                '\r' => {
                    i += 1;
                }
                '\n' => {
                    line_no += 1;
                    if depth > 0 {
                        out.push(' ');
                        pending_newlines += 1;
                    } else {
                        out.push('\n');
                        for _ in 0..pending_newlines {
                            out.push('\n');
                        }
                        pending_newlines = 0;
                        line_has_content = false;
                        at_line_start = true;
                    }
                    i += 1;
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(Error::syntax(
            "unexpected end of file in string literal",
            Some(Span { line: line_no, col: 0 }),
        ));
    }
    if depth > 0 {
        return Err(Error::syntax(
            "unexpected end of file: unclosed bracket",
            Some(Span { line: line_no, col: 0 }),
        ));
    }
    if line_has_content {
        out.push('\n');
    }
    for _ in 0..pending_newlines {
        out.push('\n');
    }
    while indents.len() > 1 {
        indents.pop();
        out.push(DEDENT);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_get_markers() {
        let src = "def f():\n    return 1\nx = f()\n";
        let out = normalize(src).unwrap();
        assert_eq!(out, "def f():\n\u{2}return 1\n\u{3}x = f()\n");
    }

    #[test]
    fn test_nested_dedent_before_else() {
        let src = "if a:\n  if b:\n    x\nelse:\n  y\n";
        let out = normalize(src).unwrap();
        assert_eq!(out, "if a:\n\u{2}if b:\n\u{2}x\n\u{3}\u{3}else:\n\u{2}y\n\u{3}");
    }

    #[test]
    fn test_bracket_continuation_keeps_line_count() {
        let src = "x = [\n  1,\n  2,\n]\ny = 3";
        let out = normalize(src).unwrap();
        assert_eq!(out.matches('\n').count(), 5);
        assert!(out.starts_with("x = [   1,   2, ]\n"));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let src = "# header\n\nx = 1  # trailing\n";
        let out = normalize(src).unwrap();
        assert_eq!(out, "\n\nx = 1  \n");
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let out = normalize("x = \"a # b\"\n").unwrap();
        assert_eq!(out, "x = \"a # b\"\n");
    }

    #[test]
    fn test_bad_unindent() {
        let err = normalize("if a:\n    x\n  y\n").unwrap_err();
        assert!(err.message().contains("unindent"));
    }

    #[test]
    fn test_unclosed_bracket() {
        assert!(normalize("x = (1,\n").is_err());
    }
}
