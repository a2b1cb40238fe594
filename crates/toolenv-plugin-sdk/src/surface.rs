use std::collections::VecDeque;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

/// The widgets an interactive plugin may draw on.
pub trait Surface {
    fn heading(&mut self, text: &str);
    fn text(&mut self, text: &str);
    fn list(&mut self, items: &[String]);
    /// Index into `options`, or `None` when the user backs out.
    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize>;
    fn input(&mut self, prompt: &str) -> Option<String>;
    fn confirm(&mut self, prompt: &str) -> bool;
    fn notify(&mut self, kind: NoticeKind, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Choice(Option<usize>),
    Input(Option<String>),
    Confirm(bool),
}

/// Headless [`Surface`] replaying prepared answers and recording output.
#[derive(Debug, Default)]
pub struct ScriptedSurface {
    answers: VecDeque<Answer>,
    transcript: Vec<String>,
    notices: Vec<(NoticeKind, String)>,
}

impl ScriptedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn choose_with(mut self, choice: Option<usize>) -> Self {
        self.answers.push_back(Answer::Choice(choice));
        self
    }

    pub fn input_with(mut self, input: Option<&str>) -> Self {
        self.answers.push_back(Answer::Input(input.map(str::to_owned)));
        self
    }

    pub fn confirm_with(mut self, yes: bool) -> Self {
        self.answers.push_back(Answer::Confirm(yes));
        self
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn notices(&self) -> &[(NoticeKind, String)] {
        &self.notices
    }

    pub fn unused_answers(&self) -> usize {
        self.answers.len()
    }

    fn next_answer(&mut self, prompt: &str) -> Option<Answer> {
        self.transcript.push(format!("? {prompt}"));
        let answer = self.answers.pop_front();
        if answer.is_none() {
            tracing::debug!(prompt, "scripted surface ran out of answers");
        }
        answer
    }
}

impl Surface for ScriptedSurface {
    fn heading(&mut self, text: &str) {
        self.transcript.push(format!("# {text}"));
    }

    fn text(&mut self, text: &str) {
        self.transcript.push(text.to_owned());
    }

    fn list(&mut self, items: &[String]) {
        self.transcript
            .extend(items.iter().map(|item| format!("- {item}")));
    }

    fn choose(&mut self, prompt: &str, options: &[String]) -> Option<usize> {
        match self.next_answer(prompt) {
            Some(Answer::Choice(choice)) => choice.filter(|index| *index < options.len()),
            _ => None,
        }
    }

    fn input(&mut self, prompt: &str) -> Option<String> {
        match self.next_answer(prompt) {
            Some(Answer::Input(input)) => input,
            _ => None,
        }
    }

    fn confirm(&mut self, prompt: &str) -> bool {
        matches!(self.next_answer(prompt), Some(Answer::Confirm(true)))
    }

    fn notify(&mut self, kind: NoticeKind, message: &str) {
        self.notices.push((kind, message.to_owned()));
    }
}
