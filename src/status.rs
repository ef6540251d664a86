use std::sync::{Arc, Mutex};

/// Shared phase/progress handle for long batch runs. Cheap to clone; the CLI
/// polls snapshots while the engine updates it.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    total_tickers: usize,
    completed_tickers: usize,
    failed_tickers: usize,
    last_ticker: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub total_tickers: usize,
    pub completed_tickers: usize,
    pub failed_tickers: usize,
    pub last_ticker: Option<String>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_tickers: usize,
        completed_tickers: usize,
        failed_tickers: usize,
        last_ticker: Option<&str>,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_tickers = total_tickers;
            data.completed_tickers = completed_tickers;
            data.failed_tickers = failed_tickers;
            if let Some(ticker) = last_ticker {
                data.last_ticker = Some(ticker.to_string());
            }
        }
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                total_tickers: data.total_tickers,
                completed_tickers: data.completed_tickers,
                failed_tickers: data.failed_tickers,
                last_ticker: data.last_ticker.clone(),
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_tickers: 0,
                completed_tickers: 0,
                failed_tickers: 0,
                last_ticker: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_visible_across_clones() {
        let status = RunStatus::new();
        let handle = status.clone();

        handle.set_phase("Replaying");
        handle.set_progress(10, 4, 1, Some("INFY"));

        let snapshot = status.snapshot();
        assert_eq!(snapshot.phase, "Replaying");
        assert_eq!(snapshot.total_tickers, 10);
        assert_eq!(snapshot.completed_tickers, 4);
        assert_eq!(snapshot.failed_tickers, 1);
        assert_eq!(snapshot.last_ticker.as_deref(), Some("INFY"));
    }
}
