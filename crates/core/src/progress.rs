use std::error::Error as StdError;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug)]
pub struct ProgressError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl ProgressError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.inner
    }
}

impl fmt::Display for ProgressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for ProgressError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// External progress sink. The engine reports after every coarse step and
/// never blocks on the result; a failed report is logged and dropped.
pub trait ProgressReporter: Send + Sync {
    fn report(
        &self,
        percent: u8,
        message: &str,
        detail: Option<&str>,
    ) -> Result<(), ProgressError>;
}

#[derive(Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report(
        &self,
        _percent: u8,
        _message: &str,
        _detail: Option<&str>,
    ) -> Result<(), ProgressError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
    pub detail: Option<String>,
}

#[derive(Default)]
pub struct VecProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl VecProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.events().last().map(|event| event.percent)
    }
}

impl ProgressReporter for VecProgress {
    fn report(
        &self,
        percent: u8,
        message: &str,
        detail: Option<&str>,
    ) -> Result<(), ProgressError> {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(ProgressEvent {
                percent,
                message: message.to_string(),
                detail: detail.map(str::to_string),
            });
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct StdoutProgress;

impl StdoutProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for StdoutProgress {
    fn report(
        &self,
        percent: u8,
        message: &str,
        detail: Option<&str>,
    ) -> Result<(), ProgressError> {
        match detail {
            Some(detail) => println!("[{percent:>3}%] {message}（{detail}）"),
            None => println!("[{percent:>3}%] {message}"),
        }
        Ok(())
    }
}
