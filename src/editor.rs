//! Plugin script editor.
//!
//! The plain text is the only source of truth. The highlighted markup is derived
//! from it after every keystroke and thrown away on the next one, it is never
//! read back into the text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static BASH_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"(?P<comment>#[^\n]*)"#,
        r#"|(?P<string>"(?:\\.|[^"\\])*"|'[^']*')"#,
        r#"|(?P<variable>\$\{[^}\n]*\}|\$[A-Za-z_][A-Za-z0-9_]*|\$[0-9@#?*$!])"#,
        r#"|(?P<keyword>\b(?:if|then|else|elif|fi|for|while|until|do|done|case|esac|in|function|return|export|local|select)\b)"#,
        r#"|(?P<builtin>\b(?:echo|cd|printf|read|source|exit|set|unset|test|eval|exec|shift|trap|sudo)\b)"#,
        r#"|(?P<number>\b\d+\b)"#,
        r#"|(?P<operator>&&|\|\||>>|[|;&<>])"#,
    ))
    .expect("Failed to compile bash token regex")
});

const TOKEN_KINDS: [&str; 7] = [
    "comment", "string", "variable", "keyword", "builtin", "number", "operator",
];

fn escape_html(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
}

/// Renders bash source as `<span class="token …">` markup, everything escaped
pub fn highlight_bash(code: &str) -> String {
    let mut out = String::with_capacity(code.len() * 2);
    let mut last = 0;
    for caps in BASH_TOKENS.captures_iter(code) {
        let Some((kind, m)) = TOKEN_KINDS
            .iter()
            .find_map(|kind| caps.name(kind).map(|m| (*kind, m)))
        else {
            continue;
        };
        escape_html(&code[last..m.start()], &mut out);
        out.push_str("<span class=\"token ");
        out.push_str(kind);
        out.push_str("\">");
        escape_html(m.as_str(), &mut out);
        out.push_str("</span>");
        last = m.end();
    }
    escape_html(&code[last..], &mut out);
    format!("<code class=\"language-bash\">{}</code>", out)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodeEditor {
    text: String,
    caret: usize,
}

impl CodeEditor {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            caret: text.len(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Caret as a byte offset into the text
    pub fn caret(&self) -> usize {
        self.caret
    }

    /// Captures the raw text typed by the operator, before any highlighting is applied.
    /// The caret the view reported is restored on the new text as well as it can be.
    pub fn input(&mut self, raw_text: &str, caret: usize) {
        self.text = raw_text.to_string();
        self.caret = restore_caret(&self.text, caret);
    }

    pub fn view(&self) -> String {
        highlight_bash(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn restore_caret(text: &str, caret: usize) -> usize {
    let mut caret = caret.min(text.len());
    while !text.is_char_boundary(caret) {
        caret -= 1;
    }
    caret
}
