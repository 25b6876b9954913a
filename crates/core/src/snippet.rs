//! Error snippet formatters.
//!
//! Renders a source span as a plain-text snippet with two lines of context
//! on each side, right-aligned line numbers, a `>` marker on the error line,
//! and a `^` caret under the error column. The HTML variant escapes
//! `& < > "` and wraps the offending character in a span.

use crate::trace::SourceLocation;

const CONTEXT_LINES: usize = 2;

/// Render a plain-text snippet for the given location.
pub fn format_snippet(location: &SourceLocation) -> String {
    let lines: Vec<&str> = location.document_source.lines().collect();
    let error_line = location.start_line.max(1) as usize;
    let first = error_line.saturating_sub(CONTEXT_LINES).max(1);
    let last = (error_line + CONTEXT_LINES).min(lines.len().max(1));
    let width = last.to_string().len();

    let mut out = String::new();
    for number in first..=last {
        let text = lines.get(number - 1).copied().unwrap_or("");
        let marker = if number == error_line { ">" } else { " " };
        out.push_str(&format!("{}{:>width$} | {}\n", marker, number, text));
        if number == error_line {
            let col = location.start_col.max(1) as usize;
            out.push_str(&format!(
                " {:>width$} | {}^\n",
                "",
                " ".repeat(col - 1),
            ));
        }
    }
    out
}

/// Render an HTML snippet. The offending character is wrapped in
/// `<span class="error-char">`.
pub fn format_snippet_html(location: &SourceLocation) -> String {
    let lines: Vec<&str> = location.document_source.lines().collect();
    let error_line = location.start_line.max(1) as usize;
    let first = error_line.saturating_sub(CONTEXT_LINES).max(1);
    let last = (error_line + CONTEXT_LINES).min(lines.len().max(1));
    let width = last.to_string().len();

    let mut out = String::from("<pre class=\"snippet\">\n");
    for number in first..=last {
        let text = lines.get(number - 1).copied().unwrap_or("");
        let marker = if number == error_line { "&gt;" } else { " " };
        if number == error_line {
            let col = (location.start_col.max(1) as usize) - 1;
            let chars: Vec<char> = text.chars().collect();
            let before: String = chars.iter().take(col).collect();
            let offending: String = chars.get(col).iter().map(|c| **c).collect();
            let after: String = chars.iter().skip(col + 1).collect();
            out.push_str(&format!(
                "{}{:>width$} | {}<span class=\"error-char\">{}</span>{}\n",
                marker,
                number,
                escape(&before),
                escape(&offending),
                escape(&after),
            ));
        } else {
            out.push_str(&format!("{}{:>width$} | {}\n", marker, number, escape(text)));
        }
    }
    out.push_str("</pre>");
    out
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(source: &str, line: u32, col: u32) -> SourceLocation {
        SourceLocation::new("p.doc", source, line, col, line, col + 1)
    }

    #[test]
    fn snippet_marks_error_line_and_column() {
        let source = "line one\nline two\nline three\nline four\nline five";
        let snippet = format_snippet(&location(source, 3, 6));
        let expected = "\
 1 | line one
 2 | line two
>3 | line three
   |      ^
 4 | line four
 5 | line five
";
        assert_eq!(snippet, expected);
    }

    #[test]
    fn snippet_clamps_context_at_document_start() {
        let source = "first\nsecond";
        let snippet = format_snippet(&location(source, 1, 1));
        assert!(snippet.starts_with(">1 | first"));
        assert!(snippet.contains(" 2 | second"));
    }

    #[test]
    fn line_numbers_right_aligned_to_widest() {
        let source = (1..=12)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let snippet = format_snippet(&location(&source, 10, 1));
        assert!(snippet.contains("  8 | line 8"));
        assert!(snippet.contains(">10 | line 10"));
    }

    #[test]
    fn html_escapes_and_wraps_offending_char() {
        let source = "a < b & c\nsecond";
        let html = format_snippet_html(&location(source, 1, 3));
        assert!(html.contains("<span class=\"error-char\">&lt;</span>"));
        assert!(html.contains(" b &amp; c"));
        assert!(html.contains("&gt;1 |"));
    }
}
