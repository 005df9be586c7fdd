//! What a worker process left behind.
//!
//! The pool only looks at exit status and captured streams; payload structure
//! is the business of whoever consumes the stage's outputs.

use std::time::Duration;

/// Final observation of one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Exit code zero. `stdout` is the result payload.
    Succeeded { stdout: Vec<u8> },

    /// Nonzero exit (or killed by a signal, in which case `code` is `None`).
    Exited { code: Option<i32>, stderr: String },

    /// Still running when the per-task timeout elapsed; the process was killed.
    TimedOut { after: Duration },

    /// The process could not be waited on.
    Lost { reason: String },
}

impl WorkerOutcome {
    /// Exit status zero.
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Succeeded { .. })
    }

    /// One-line diagnostic for logs. `None` on success.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            WorkerOutcome::Succeeded { .. } => None,
            WorkerOutcome::Exited { code, stderr } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                Some(format!("exit={code} stderr={}", stderr.trim()))
            }
            WorkerOutcome::TimedOut { after } => Some(format!("timed out after {after:?}")),
            WorkerOutcome::Lost { reason } => Some(format!("lost: {reason}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_includes_exit_code_and_stderr() {
        let outcome = WorkerOutcome::Exited {
            code: Some(3),
            stderr: "  quota exceeded\n".to_string(),
        };
        assert!(!outcome.is_success());
        assert_eq!(
            outcome.diagnostic().as_deref(),
            Some("exit=3 stderr=quota exceeded")
        );
    }

    #[test]
    fn killed_process_reports_signal() {
        let outcome = WorkerOutcome::Exited {
            code: None,
            stderr: String::new(),
        };
        assert!(outcome.diagnostic().unwrap().starts_with("exit=signal"));
    }

    #[test]
    fn success_has_no_diagnostic() {
        let outcome = WorkerOutcome::Succeeded { stdout: b"ok".to_vec() };
        assert!(outcome.is_success());
        assert!(outcome.diagnostic().is_none());
    }
}
