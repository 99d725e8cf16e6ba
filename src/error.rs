//! Box error values and terminal rendering.
//!
//! Every failing layer — lexer, parser, evaluator, builtin verb — produces a
//! `BoxError` carrying the source location captured at tokenization, an
//! optional help hint, and an optional snippet of the offending source for
//! when the file can no longer be read (command substitutions, for example,
//! have no backing file).

use std::fmt;

/// Line/column pair inside a single source file. Both are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl Default for Pos {
    fn default() -> Self {
        Self { line: 1, col: 1 }
    }
}

/// Full source location for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub col: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, pos: Pos) -> Self {
        Self {
            file: file.into(),
            line: pos.line,
            col: pos.col,
        }
    }
}

/// A Box runtime or parse error.
#[derive(Debug, Clone)]
pub struct BoxError {
    pub message: String,
    pub location: Option<Location>,
    pub help: Option<String>,
    /// Offending source snippet, used when the location's file cannot be
    /// read back (e.g. command substitution fragments).
    pub code: Option<String>,
}

impl BoxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            help: None,
            code: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Render the error as a multi-line terminal block: header, gutter with
    /// the location, surrounding source lines with a caret, and the help
    /// text. Source context is read from disk; if that fails, the stored
    /// snippet is shown instead.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("✗ ");
        out.push_str(&self.message);
        out.push('\n');

        let Some(ref loc) = self.location else {
            if let Some(ref help) = self.help {
                out.push_str(&format!("  help: {help}\n"));
            }
            return out;
        };

        out.push_str(&format!("  ╭─[{}:{}:{}]\n", loc.file, loc.line, loc.col));

        let context = read_source_context(&loc.file, loc.line);
        if !context.is_empty() {
            out.push_str("  │\n");
            for (line_no, text) in &context {
                out.push_str(&format!("{line_no:3}│ {text}\n"));
                if *line_no == loc.line {
                    out.push_str(&caret_line(text, loc.col, "─┬─ here"));
                    out.push_str(&caret_line(text, loc.col, &format!(" ╰─ {}", self.message)));
                }
            }
        } else if let Some(ref code) = self.code {
            out.push_str("  │\n");
            let snippet = code.lines().next().unwrap_or("");
            out.push_str(&format!("{:3}│ {snippet}\n", loc.line));
            out.push_str(&caret_line(snippet, loc.col, "─┬─ here"));
            out.push_str(&caret_line(snippet, loc.col, &format!(" ╰─ {}", self.message)));
        }

        out.push_str("  │\n");
        if let Some(ref help) = self.help {
            out.push_str(&format!("  │ help: {help}\n"));
            out.push_str("  │\n");
        }
        out
    }
}

/// Build one gutter line whose marker starts under `col`. Tabs in the source
/// line must stay tabs in the padding or the caret drifts.
fn caret_line(source: &str, col: usize, marker: &str) -> String {
    let mut line = String::from("  │ ");
    let bytes = source.as_bytes();
    for i in 0..col.saturating_sub(1) {
        if bytes.get(i) == Some(&b'\t') {
            line.push('\t');
        } else {
            line.push(' ');
        }
    }
    line.push_str(marker);
    line.push('\n');
    line
}

/// Read up to two lines before and one after the target line.
fn read_source_context(file: &str, target: usize) -> Vec<(usize, String)> {
    let Ok(content) = std::fs::read_to_string(file) else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    if target < 1 || target > lines.len() {
        return Vec::new();
    }
    let start = target.saturating_sub(2).max(1);
    let end = (target + 1).min(lines.len());
    (start..=end)
        .map(|n| (n, lines[n - 1].to_string()))
        .collect()
}

impl fmt::Display for BoxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(ref loc) => write!(
                f,
                "{}:{}:{}: {}",
                loc.file, loc.line, loc.col, self.message
            ),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for BoxError {}

impl From<std::io::Error> for BoxError {
    fn from(e: std::io::Error) -> Self {
        BoxError::new(e.to_string())
    }
}

/// Convenience alias.
pub type BoxResult<T> = Result<T, BoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_location() {
        let err =
            BoxError::new("unknown command: frob").at(Location::new("build.box", Pos::new(3, 5)));
        assert_eq!(err.to_string(), "build.box:3:5: unknown command: frob");
    }

    #[test]
    fn display_without_location() {
        let err = BoxError::new("arith: division by zero");
        assert_eq!(err.to_string(), "arith: division by zero");
    }

    #[test]
    fn render_falls_back_to_snippet() {
        let err = BoxError::new("bad token")
            .at(Location::new("/no/such/file.box", Pos::new(1, 3)))
            .with_code("ab cd");
        let rendered = err.render();
        assert!(rendered.starts_with("✗ bad token"));
        assert!(rendered.contains("ab cd"));
        assert!(rendered.contains("─┬─ here"));
    }

    #[test]
    fn render_includes_help() {
        let err = BoxError::new("oops").with_help("try harder");
        assert!(err.render().contains("help: try harder"));
    }
}
