use std::fmt;

pub use toolenv_plugin_sdk::NoticeKind;

#[derive(Debug, Clone)]
pub struct Notice {
    pub title: String,
    pub detail: Option<String>,
    pub kind: NoticeKind,
}

impl Notice {
    pub fn new(title: impl Into<String>, kind: NoticeKind) -> Self {
        Self {
            title: title.into(),
            detail: None,
            kind,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            NoticeKind::Info => "info",
            NoticeKind::Success => "ok",
            NoticeKind::Warning => "warning",
            NoticeKind::Error => "error",
        };
        write!(f, "[{label}] {}", self.title)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Queue of user-facing notices, shown and emptied by [`Notices::drain`].
#[derive(Default, Debug)]
pub struct Notices {
    queue: Vec<Notice>,
}

impl Notices {
    pub fn push(&mut self, notice: Notice) {
        match notice.kind {
            NoticeKind::Error => tracing::error!(title = %notice.title, detail = ?notice.detail, "notice"),
            NoticeKind::Warning => tracing::warn!(title = %notice.title, detail = ?notice.detail, "notice"),
            _ => tracing::info!(title = %notice.title, "notice"),
        }
        self.queue.push(notice);
    }

    pub fn info(&mut self, title: impl Into<String>) {
        self.push(Notice::new(title, NoticeKind::Info));
    }

    pub fn success(&mut self, title: impl Into<String>) {
        self.push(Notice::new(title, NoticeKind::Success));
    }

    pub fn warning(&mut self, title: impl Into<String>) {
        self.push(Notice::new(title, NoticeKind::Warning));
    }

    pub fn error(&mut self, title: impl Into<String>, detail: impl fmt::Display) {
        self.push(Notice::new(title, NoticeKind::Error).with_detail(detail.to_string()));
    }

    pub fn drain(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_hands_out_notices_in_order_once() {
        let mut notices = Notices::default();
        notices.warning("restart required");
        notices.error("plugin failed", "boom");
        assert!(!notices.is_empty());

        let drained: Vec<_> = notices.drain().into_iter().map(|n| n.to_string()).collect();
        assert_eq!(
            drained,
            ["[warning] restart required", "[error] plugin failed: boom"]
        );
        assert!(notices.is_empty());
    }

    #[test]
    fn display_includes_kind_and_detail() {
        let notice = Notice::new("plugin failed", NoticeKind::Error).with_detail("boom");
        assert_eq!(notice.to_string(), "[error] plugin failed: boom");
    }
}
