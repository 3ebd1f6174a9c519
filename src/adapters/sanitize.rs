//! Log sanitization for visitor identifiers.
//!
//! User IDs are the privacy unit of every count this crate releases, so
//! they must never land in a log file. The engine does not log them, but
//! event sources and callers share the subscriber; this writer scrubs what
//! slips through:
//! - `user_id=...` / `user: ...` style fields
//! - E-mail addresses
//! - IPv4 addresses
//! - UUIDs (common synthetic visitor IDs)
//!
//! Input per sanitized line is capped (`DPVIEWS_SANITIZE_MAX_BYTES`,
//! default 16 KiB).

use regex::{Regex, RegexSet};
use std::io::{self, Write};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static PATTERNS: OnceLock<IdentifierPatterns> = OnceLock::new();

const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

struct IdentifierPattern {
    regex: Regex,
    replacement: &'static str,
}

struct IdentifierPatterns {
    set: RegexSet,
    patterns: Vec<IdentifierPattern>,
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }

    let mut end = max_bytes.min(input.len());
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn max_sanitize_bytes() -> usize {
    std::env::var("DPVIEWS_SANITIZE_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

fn get_patterns() -> &'static IdentifierPatterns {
    PATTERNS.get_or_init(|| {
        let rules: [(&'static str, &'static str); 4] = [
            (
                r#"(?i)\b(user(?:[_-]?id)?|visitor(?:[_-]?id)?|uid)("?\s*[:=]\s*)"?[^\s",}]+"?"#,
                "${1}${2}[REDACTED-USER]",
            ),
            (
                r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
                "[REDACTED-EMAIL]",
            ),
            (
                r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
                "[REDACTED-IP]",
            ),
            (
                r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
                "[REDACTED-UUID]",
            ),
        ];

        // The rule table is static; a compile failure is a programming error.
        let set = RegexSet::new(rules.iter().map(|(p, _)| *p)).expect("Valid regex set");
        let patterns = rules
            .iter()
            .map(|&(pattern, replacement)| IdentifierPattern {
                regex: Regex::new(pattern).expect("Valid regex"),
                replacement,
            })
            .collect();

        IdentifierPatterns { set, patterns }
    })
}

/// Replace visitor identifiers in `input`, reading at most `max_bytes`.
#[must_use]
pub fn sanitize(input: &str, max_bytes: usize) -> String {
    let patterns = get_patterns();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    for idx in patterns.set.matches(prefix).into_iter() {
        let pattern = &patterns.patterns[idx];
        result = pattern
            .regex
            .replace_all(&result, pattern.replacement)
            .into_owned();
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
    }
    result
}

/// `MakeWriter` whose writers redact visitor identifiers line by line.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
    max_line_bytes: usize,
}

impl<M> SanitizingMakeWriter<M> {
    /// Wrap `inner`, reading the line limit from the environment once.
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            max_line_bytes: max_sanitize_bytes(),
        }
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer(), self.max_line_bytes)
    }
}

/// Holds bytes until a line is complete, then writes the line redacted.
///
/// A pending line that outgrows the limit is cut and marked. A partial line
/// still pending on drop is written without a trailing newline.
pub struct RedactingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
    max_line_bytes: usize,
}

impl<W: Write> RedactingWriter<W> {
    fn new(inner: W, max_line_bytes: usize) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            max_line_bytes,
        }
    }

    fn emit(&mut self, line: &[u8], newline: bool) -> io::Result<()> {
        let redacted = sanitize(&String::from_utf8_lossy(line), self.max_line_bytes);
        self.inner.write_all(redacted.as_bytes())?;
        if newline {
            self.inner.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);

        if let Some(end) = self.pending.iter().rposition(|&b| b == b'\n') {
            let complete: Vec<u8> = self.pending.drain(..=end).collect();
            for line in complete[..end].split(|&b| b == b'\n') {
                self.emit(line, true)?;
            }
        }

        if self.pending.len() > self.max_line_bytes {
            let overlong = std::mem::take(&mut self.pending);
            self.emit(&overlong, true)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let _ = self.emit(&rest, false);
        }
        let _ = self.inner.flush();
    }
}
