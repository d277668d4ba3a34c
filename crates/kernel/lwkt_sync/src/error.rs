use crate::sleep::SleepError;

/// Why a condition variable wait returned without being signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("wait timed out")]
    TimedOut,
    #[error("wait interrupted")]
    Interrupted,
}

impl From<SleepError> for WaitError {
    fn from(error: SleepError) -> Self {
        match error {
            SleepError::WouldBlock => Self::TimedOut,
            SleepError::Interrupted | SleepError::Restart => Self::Interrupted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NetisrError {
    #[error("netisr index {index} out of range")]
    InvalidIndex { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ThreadListError {
    #[error("thread slot is no longer registered")]
    StaleSlot,
    #[error(
        "static TLS segment out of range (offset {offset}, copy {copy_len}, total {total_len})"
    )]
    TlsOutOfRange {
        offset: usize,
        copy_len: usize,
        total_len: usize,
    },
}
