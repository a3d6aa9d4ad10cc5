//! Typed status lines for the terminal
//!
//! Non-error user-facing output goes through the notifier: one glyph per
//! message kind, multi-line messages indented under the leading glyph, and
//! emoji stage headers separated by blank lines. Diagnostic logging is
//! separate (tracing, file-only).

mod timer;

pub use timer::{format_duration, Timer};

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};

const INDENT: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    Success,
    Failure,
    Warning,
    Info,
    Activity,
    Added,
}

impl Glyph {
    pub fn as_str(&self) -> &'static str {
        match self {
            Glyph::Success => "✔",
            Glyph::Failure => "✗",
            Glyph::Warning => "⚠",
            Glyph::Info => "ℹ",
            Glyph::Activity => "►",
            Glyph::Added => "✚",
        }
    }
}

/// Shared, clonable writer for status lines.
///
/// All writes go through one mutex so stage output and progress-group
/// redraws never interleave mid-line.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    writer: Mutex<Box<dyn Write + Send>>,
    tty: bool,
}

impl Notifier {
    pub fn stdout() -> Self {
        let tty = io::stdout().is_terminal();
        Self::with_writer(Box::new(io::stdout()), tty)
    }

    pub fn with_writer(writer: Box<dyn Write + Send>, tty: bool) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                writer: Mutex::new(writer),
                tty,
            }),
        }
    }

    pub fn is_tty(&self) -> bool {
        self.inner.tty
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        self.line(Glyph::Success, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.line(Glyph::Failure, msg.as_ref());
    }

    pub fn warning(&self, msg: impl AsRef<str>) {
        self.line(Glyph::Warning, msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.line(Glyph::Info, msg.as_ref());
    }

    pub fn activity(&self, msg: impl AsRef<str>) {
        self.line(Glyph::Activity, msg.as_ref());
    }

    pub fn added(&self, msg: impl AsRef<str>) {
        self.line(Glyph::Added, msg.as_ref());
    }

    /// Stage header: blank separator line, then `<emoji> <title>...`.
    pub fn header(&self, emoji: &str, title: &str) {
        self.write_raw(&format!("\n{} {}...\n", emoji, title));
    }

    /// Timer block printed after a successful stage list.
    pub fn timer(&self, current: &str, total: &str) {
        self.write_raw(&format!("⏲ current: {} total: {}\n", current, total));
    }

    fn line(&self, glyph: Glyph, msg: &str) {
        let mut out = String::new();
        for (i, part) in msg.lines().enumerate() {
            if i == 0 {
                out.push_str(glyph.as_str());
                out.push(' ');
            } else {
                out.push_str(INDENT);
            }
            out.push_str(part);
            out.push('\n');
        }
        if msg.is_empty() {
            out = format!("{}\n", glyph.as_str());
        }
        self.write_raw(&out);
    }

    /// Write pre-formatted text through the shared writer. Used by the
    /// progress group for its own rendering.
    pub(crate) fn write_raw(&self, s: &str) {
        if let Ok(mut writer) = self.inner.writer.lock() {
            let _ = writer.write_all(s.as_bytes());
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A notifier backed by a shared byte buffer, for asserting on output.
    pub struct CapturedNotifier {
        pub notifier: Notifier,
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedNotifier {
        pub fn new(tty: bool) -> Self {
            let buffer = Arc::new(Mutex::new(Vec::new()));
            let notifier =
                Notifier::with_writer(Box::new(SharedBuffer(buffer.clone())), tty);
            Self { notifier, buffer }
        }

        pub fn output(&self) -> String {
            String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CapturedNotifier;

    #[test]
    fn test_glyph_lines() {
        let captured = CapturedNotifier::new(false);
        captured.notifier.success("cluster created");
        captured.notifier.error("stage failed");
        let out = captured.output();
        assert!(out.contains("✔ cluster created"));
        assert!(out.contains("✗ stage failed"));
    }

    #[test]
    fn test_multiline_indent() {
        let captured = CapturedNotifier::new(false);
        captured.notifier.error("stage failed\ncaused by: no such network");
        let out = captured.output();
        assert!(out.contains("✗ stage failed\n  caused by: no such network\n"));
    }

    #[test]
    fn test_header_has_separator() {
        let captured = CapturedNotifier::new(false);
        captured.notifier.header("🚀", "Bootstrapping cluster");
        assert_eq!(captured.output(), "\n🚀 Bootstrapping cluster...\n");
    }
}
