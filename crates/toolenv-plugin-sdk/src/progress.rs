/// Presentation of a long-running plugin operation in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Normal,
    Error,
    /// Hide the indicator.
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    /// 0..=100
    pub percent: u8,
    pub state: ProgressState,
}

impl ProgressReport {
    pub fn new(percent: u8, state: ProgressState) -> Self {
        Self {
            percent: percent.min(100),
            state,
        }
    }
}
