use parking_lot::Mutex;

use crate::models::{JobProgress, JobReport, Phase, StatusSnapshot};

/// Oldest lines are dropped past this many.
pub const MAX_LOG_LINES: usize = 1000;

/// Receives a job's notifications. Calls are fire-and-forget and may arrive
/// from the job's worker task, so implementations must be cheap and thread-safe.
pub trait JobObserver: Send + Sync {
    fn started(&self, _job_id: u64) {}
    fn progress(&self, progress: &JobProgress);
    fn log(&self, line: &str);
    fn finished(&self, _job_id: u64, _report: &JobReport) {}
}

/// Writes everything to the tracing subscriber. Used by the foreground CLI.
#[derive(Default)]
pub struct TracingObserver {
    last_logged: Mutex<Option<f64>>,
}

/// Download percentages are logged in steps of this size.
const PERCENT_STEP: f64 = 5.0;

impl JobObserver for TracingObserver {
    fn progress(&self, progress: &JobProgress) {
        let mut last = self.last_logged.lock();
        match progress.phase {
            Phase::Downloading => {
                let Some(pct) = progress.percent else { return };
                let due = match *last {
                    // A drop means a new item started.
                    Some(prev) => {
                        pct >= prev + PERCENT_STEP || pct < prev || (pct >= 100.0 && prev < 100.0)
                    }
                    None => true,
                };
                if due {
                    *last = Some(pct);
                    tracing::info!(
                        title = progress.title.as_deref().unwrap_or(""),
                        "{}",
                        progress.status_line()
                    );
                }
            }
            _ => {
                *last = None;
                tracing::debug!("{}", progress.status_line());
            }
        }
    }

    fn log(&self, line: &str) {
        tracing::info!("{}", line);
    }
}

/// Shared status for the HTTP front end: a status line plus an append-only log.
#[derive(Default)]
pub struct JobBoard {
    state: Mutex<StatusSnapshot>,
}

impl JobBoard {
    pub fn new() -> Self {
        let board = JobBoard::default();
        board.state.lock().status_line = "Idle".to_string();
        board
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().clone()
    }

    fn push_line(state: &mut StatusSnapshot, line: String) {
        state.log.push(line);
        if state.log.len() > MAX_LOG_LINES {
            let excess = state.log.len() - MAX_LOG_LINES;
            state.log.drain(..excess);
        }
    }
}

impl JobObserver for JobBoard {
    fn started(&self, job_id: u64) {
        let mut state = self.state.lock();
        state.active_job = Some(job_id);
        state.phase = None;
        state.percent = None;
        state.status_line = "Starting...".to_string();
    }

    fn progress(&self, progress: &JobProgress) {
        let mut state = self.state.lock();
        state.phase = Some(progress.phase);
        state.percent = progress.percent;
        state.status_line = progress.status_line();
    }

    fn log(&self, line: &str) {
        let mut state = self.state.lock();
        Self::push_line(&mut state, line.to_string());
    }

    fn finished(&self, job_id: u64, report: &JobReport) {
        let mut state = self.state.lock();
        // A newer job already owns the board.
        if state.active_job.is_some_and(|active| active != job_id) {
            tracing::debug!("Ignoring report of job {} while job {:?} runs", job_id, state.active_job);
            return;
        }
        state.active_job = None;
        state.phase = Some(report.status.phase());
        state.status_line = JobProgress::terminal(report.status).status_line();
        state.last_report = Some(report.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TerminalStatus;

    #[test]
    fn board_tracks_status_line_and_log() {
        let board = JobBoard::new();
        assert_eq!(board.snapshot().status_line, "Idle");

        board.started(7);
        board.log("Starting download: https://example.com");
        board.progress(&JobProgress::downloading(Some(12.5), Some("Clip".into())));

        let snap = board.snapshot();
        assert_eq!(snap.active_job, Some(7));
        assert_eq!(snap.status_line, "Downloading... 12.5%");
        assert_eq!(snap.phase, Some(Phase::Downloading));
        assert_eq!(snap.log, vec!["Starting download: https://example.com"]);

        board.finished(7, &JobReport::failed("boom"));
        let snap = board.snapshot();
        assert_eq!(snap.active_job, None);
        assert_eq!(snap.status_line, "Download failed :(");
        assert_eq!(snap.last_report.unwrap().status, TerminalStatus::Failed);
        // The log survives the job.
        assert_eq!(snap.log.len(), 1);
    }

    #[test]
    fn board_ignores_report_of_an_older_job() {
        let board = JobBoard::new();
        board.started(1);
        board.started(2);
        board.progress(&JobProgress::downloading(Some(30.0), None));

        board.finished(1, &JobReport::failed("late"));

        let snap = board.snapshot();
        assert_eq!(snap.active_job, Some(2));
        assert_eq!(snap.status_line, "Downloading... 30.0%");
        assert!(snap.last_report.is_none());
    }

    #[test]
    fn board_log_is_capped() {
        let board = JobBoard::new();
        for i in 0..MAX_LOG_LINES + 5 {
            board.log(&format!("line {i}"));
        }
        let log = board.snapshot().log;
        assert_eq!(log.len(), MAX_LOG_LINES);
        assert_eq!(log[0], "line 5");
    }
}
