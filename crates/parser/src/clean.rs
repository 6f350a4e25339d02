//! Post-extraction text cleanup shared by every decoder.

use regex::Regex;
use std::sync::OnceLock;

fn space_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").unwrap())
}

fn newline_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Normalizes raw extracted text:
///
/// - drops control characters other than `\n` and `\t`
/// - collapses space/tab runs within a line to a single space
/// - trims each line
/// - collapses three or more consecutive newlines to exactly two
/// - trims the whole result
pub fn clean_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();

    let cleaned_lines: Vec<String> = stripped
        .split('\n')
        .map(|line| {
            space_run_re()
                .replace_all(line, " ")
                .trim()
                .to_string()
        })
        .collect();

    let joined = cleaned_lines.join("\n");
    newline_run_re()
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_excessive_spaces() {
        assert_eq!(clean_text("hello    world"), "hello world");
    }

    #[test]
    fn collapses_tabs() {
        assert_eq!(clean_text("hello\t\tworld"), "hello world");
    }

    #[test]
    fn trims_leading_trailing_whitespace() {
        assert_eq!(clean_text("  hello world  "), "hello world");
    }

    #[test]
    fn collapses_newline_runs() {
        assert_eq!(clean_text("hello\n\n\n\nworld"), "hello\n\nworld");
    }

    #[test]
    fn removes_control_characters() {
        assert_eq!(clean_text("hello\x00\x01\x02world"), "helloworld");
    }

    #[test]
    fn preserves_single_newlines() {
        assert_eq!(clean_text("line1\nline2"), "line1\nline2");
    }

    #[test]
    fn empty_input() {
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn whitespace_only_input() {
        assert_eq!(clean_text("   \t\t  \n\n  "), "");
    }

    #[test]
    fn mixed_whitespace_and_control() {
        assert_eq!(clean_text("  hello \x00  \t world \x7F  "), "hello world");
    }

    #[test]
    fn no_line_keeps_leading_or_trailing_spaces() {
        let out = clean_text("  a  b \n   c   d  \n\n\n  e ");
        for line in out.lines() {
            assert_eq!(line, line.trim());
            assert!(!line.contains("  "));
        }
        assert!(!out.contains("\n\n\n"));
    }
}
