//! Fallback diagnostic formatting and stderr merging.
//!
//! Produces the ANSI-coloured `✘ [ERROR]` / `▲ [WARNING]` rendering with
//! file:line:column markers, then merges formatted entries against the
//! engine's raw stderr stream so each diagnostic appears exactly once.

use esbox_proto::{Diagnostic, DiagnosticsOutput};

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[37m";
const RESET: &str = "\x1b[0m";

/// Diagnostic severity, which picks the label and colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Format one diagnostic with its location marker.
#[must_use]
pub fn format_diagnostic(severity: Severity, diagnostic: &Diagnostic) -> String {
    let (color, icon, label) = match severity {
        Severity::Error => (RED, '\u{2718}', "ERROR"),
        Severity::Warning => (YELLOW, '\u{25b2}', "WARNING"),
    };

    let mut out = format!("{color}{icon} [{label}]{RESET} {}\n", diagnostic.text);

    if let Some(loc) = &diagnostic.location {
        let line_no = loc.line.to_string();
        let marker = if loc.length > 1 {
            "~".repeat(loc.length as usize)
        } else {
            "^".to_string()
        };
        out.push_str(&format!("\n    {}:{}:{}:\n", loc.file, loc.line, loc.column));
        out.push_str(&format!(
            "      {DIM}{line_no} \u{2502}{RESET} {}\n",
            loc.line_text
        ));
        out.push_str(&format!(
            "      {} \u{2575} {}{color}{marker}{RESET}\n",
            " ".repeat(line_no.len()),
            " ".repeat(loc.column as usize)
        ));
    }

    out
}

/// Format a list of diagnostics, one entry per diagnostic.
#[must_use]
pub fn format_diagnostics(severity: Severity, diagnostics: &[Diagnostic]) -> Vec<String> {
    diagnostics
        .iter()
        .map(|d| format_diagnostic(severity, d))
        .collect()
}

/// Remove ANSI escape sequences.
#[must_use]
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // Skip to the terminating letter of the CSI sequence.
            for t in chars.by_ref() {
                if t.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Merge formatted diagnostics with the engine's raw stderr stream.
///
/// Entries already present in the raw stream (compared with ANSI escapes
/// stripped) are suppressed; unique entries are prepended. An empty list of
/// formatted entries leaves the raw stream untouched.
#[must_use]
pub fn merge_stderr(formatted: &[String], raw: &str) -> String {
    let raw_plain = strip_ansi(raw);

    let unique: Vec<&str> = formatted
        .iter()
        .filter(|entry| {
            let plain = strip_ansi(entry);
            let needle = plain.trim();
            needle.is_empty() || !raw_plain.contains(needle)
        })
        .map(|entry| entry.as_str())
        .collect();

    if unique.is_empty() {
        return raw.to_string();
    }

    let mut out = unique.join("\n");
    if !raw.is_empty() {
        out.push('\n');
        out.push_str(raw);
    }
    out
}

/// Assemble the diagnostics result payload: merged stderr plus the JSON
/// `{"errors": …, "warnings": …}` stdout rendering.
#[must_use]
pub fn diagnostics_output(
    errors: &[Diagnostic],
    warnings: &[Diagnostic],
    raw_stderr: &str,
) -> DiagnosticsOutput {
    let mut formatted = format_diagnostics(Severity::Error, errors);
    formatted.extend(format_diagnostics(Severity::Warning, warnings));

    DiagnosticsOutput {
        stderr: merge_stderr(&formatted, raw_stderr),
        stdout: serde_json::json!({ "errors": errors, "warnings": warnings }).to_string(),
    }
}
