use std::io::{self, BufRead, Write};

use toolenv_plugin_sdk::{NoticeKind, Surface};

/// Line-oriented [`Surface`] over a reader and a writer.
pub struct TerminalSurface<R, W> {
    input: R,
    output: W,
}

impl TerminalSurface<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalSurface<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn line(&mut self, text: &str) {
        if let Err(err) = writeln!(self.output, "{text}") {
            tracing::debug!(error = %err, "terminal write failed");
        }
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        let _ = write!(self.output, "{prompt} ");
        let _ = self.output.flush();
        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(answer.trim().to_owned()),
        }
    }
}

impl<R: BufRead, W: Write> Surface for TerminalSurface<R, W> {
    fn heading(&mut self, text: &str) {
        self.line(&format!("== {text} =="));
    }

    fn text(&mut self, text: &str) {
        self.line(text);
    }

    fn list(&mut self, items: &[String]) {
        for item in items {
            self.line(&format!("  - {item}"));
        }
    }

    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize> {
        for (index, option) in options.iter().enumerate() {
            self.line(&format!("  {}) {option}", index + 1));
        }
        let answer = self.ask(&format!("{prompt} [1-{}, empty to cancel]:", options.len()))?;
        answer
            .parse::<usize>()
            .ok()
            .and_then(|choice| choice.checked_sub(1))
            .filter(|index| *index < options.len())
    }

    fn input(&mut self, prompt: &str) -> Option<String> {
        self.ask(&format!("{prompt}:"))
            .filter(|answer| !answer.is_empty())
    }

    fn confirm(&mut self, prompt: &str) -> bool {
        self.ask(&format!("{prompt} [y/N]"))
            .is_some_and(|answer| matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn notify(&mut self, kind: NoticeKind, message: &str) {
        let label = match kind {
            NoticeKind::Info => "info",
            NoticeKind::Success => "ok",
            NoticeKind::Warning => "warning",
            NoticeKind::Error => "error",
        };
        self.line(&format!("[{label}] {message}"));
    }
}
