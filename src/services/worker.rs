use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::path_model;
use crate::services::remote::RemoteSession;
use crate::services::transfer::{CopyIntent, DeleteOutcome, TransferEngine};
use crate::status::FileStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Paste,
    Delete,
}

/// Unit of work handed to the worker. One payload shape per kind; the
/// worker receives deep copies of everything it touches.
#[derive(Debug, Clone)]
pub enum TransferJob {
    Paste {
        sources: Vec<CopyIntent>,
        target_dir: String,
        target_remote: bool,
        overwrite: bool,
    },
    Delete {
        path: String,
        remote: bool,
    },
}

impl TransferJob {
    pub fn kind(&self) -> JobKind {
        match self {
            TransferJob::Paste { .. } => JobKind::Paste,
            TransferJob::Delete { .. } => JobKind::Delete,
        }
    }

    /// Directory the caller should re-list once the job completes
    pub fn operating_dir(&self) -> String {
        match self {
            TransferJob::Paste { target_dir, .. } => target_dir.clone(),
            TransferJob::Delete { path, .. } => path_model::parent(path),
        }
    }
}

/// Posted back through the queue when the worker finishes.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub status: FileStatus,
    pub kind: JobKind,
    pub dir: String,
}

/// Completion message. A session moved into the worker rides back here
/// so the interactive thread regains ownership.
pub struct JobCompletion {
    pub result: TransferResult,
    pub session: Option<RemoteSession>,
}

/// Runs one transfer job at a time on a fresh background thread and
/// posts exactly one completion message per job. The interactive thread
/// polls the queue; it never blocks on it.
pub struct WorkerRunner {
    busy: Arc<AtomicBool>,
    tx: Sender<JobCompletion>,
    rx: Receiver<JobCompletion>,
}

impl WorkerRunner {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
        }
    }

    /// True while a job is in flight. Set immediately before dispatch,
    /// cleared by the worker just before it exits.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// The in-flight indicator itself, for callers that bind controls
    /// to it.
    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.busy)
    }

    /// Dispatch one job to a one-shot worker thread. Refused while
    /// another job is in flight; the inputs are handed back untouched.
    ///
    /// The caller clears the engine's cancellation flag before
    /// dispatching a fresh job; a flag still raised when the worker
    /// starts stops the job at its first check.
    pub fn run(
        &self,
        engine: &TransferEngine,
        job: TransferJob,
        session: Option<RemoteSession>,
    ) -> Result<(), (TransferJob, Option<RemoteSession>)> {
        if self.busy.swap(true, Ordering::SeqCst) {
            warn!("refusing transfer job: another one is in flight");
            return Err((job, session));
        }

        let engine = engine.clone();
        let tx = self.tx.clone();
        let busy = Arc::clone(&self.busy);
        thread::spawn(move || {
            let mut session = session;
            let kind = job.kind();
            let dir = job.operating_dir();

            let status = execute(&engine, &job, session.as_mut());
            info!("transfer job {:?} finished: {}", kind, status);

            let _ = tx.send(JobCompletion {
                result: TransferResult { status, kind, dir },
                session,
            });
            busy.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Non-blocking queue poll: `None` while the worker is still running,
    /// one completion message once it is done.
    pub fn poll(&self) -> Option<JobCompletion> {
        self.rx.try_recv().ok()
    }
}

impl Default for WorkerRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn execute(
    engine: &TransferEngine,
    job: &TransferJob,
    session: Option<&mut RemoteSession>,
) -> FileStatus {
    match job {
        TransferJob::Paste {
            sources,
            target_dir,
            target_remote,
            overwrite,
        } => engine.paste(session, sources, target_dir, *target_remote, *overwrite),
        TransferJob::Delete { path, remote } => {
            match engine.delete(session, path, *remote, true) {
                DeleteOutcome::Done(status) => status,
                DeleteOutcome::Prompt(_) => FileStatus::RemoveFailed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn wait_for_completion(runner: &WorkerRunner) -> JobCompletion {
        for _ in 0..500 {
            if let Some(completion) = runner.poll() {
                return completion;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("worker did not complete in time");
    }

    fn wait_until_idle(runner: &WorkerRunner) {
        for _ in 0..500 {
            if !runner.is_busy() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("in-flight indicator was never cleared");
    }

    #[test]
    fn test_paste_job_posts_one_completion() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("a.txt"), b"payload").unwrap();

        let engine = TransferEngine::new();
        let runner = WorkerRunner::new();
        let job = TransferJob::Paste {
            sources: vec![CopyIntent {
                name: "a.txt".to_string(),
                dir: src.display().to_string(),
                from_remote: false,
            }],
            target_dir: dst.display().to_string(),
            target_remote: false,
            overwrite: false,
        };

        runner.run(&engine, job, None).unwrap();
        let completion = wait_for_completion(&runner);

        assert_eq!(completion.result.status, FileStatus::WrittenSuccessfully);
        assert_eq!(completion.result.kind, JobKind::Paste);
        assert_eq!(completion.result.dir, dst.display().to_string());
        assert!(completion.session.is_none());
        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"payload");

        wait_until_idle(&runner);
        // One message per job, nothing queued behind it
        assert!(runner.poll().is_none());
    }

    #[test]
    fn test_second_job_is_refused_while_busy() {
        let engine = TransferEngine::new();
        let runner = WorkerRunner::new();
        runner.busy_flag().store(true, Ordering::SeqCst);

        let job = TransferJob::Delete {
            path: "/nowhere/at/all".to_string(),
            remote: false,
        };
        let refused = runner.run(&engine, job, None);
        let Err((returned, session)) = refused else {
            panic!("job must be refused while one is in flight");
        };
        assert_eq!(returned.kind(), JobKind::Delete);
        assert!(session.is_none());

        runner.busy_flag().store(false, Ordering::SeqCst);
    }

    #[test]
    fn test_cancelled_job_reports_stop_requested() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("one.txt"), b"1").unwrap();
        fs::write(src.join("two.txt"), b"2").unwrap();

        let engine = TransferEngine::new();
        let runner = WorkerRunner::new();
        let job = TransferJob::Paste {
            sources: vec![
                CopyIntent {
                    name: "one.txt".to_string(),
                    dir: src.display().to_string(),
                    from_remote: false,
                },
                CopyIntent {
                    name: "two.txt".to_string(),
                    dir: src.display().to_string(),
                    from_remote: false,
                },
            ],
            target_dir: dst.display().to_string(),
            target_remote: false,
            overwrite: false,
        };

        // Raised before the worker reaches its first check; the worker
        // observes the flag, never clears it
        engine.request_cancel();
        runner.run(&engine, job, None).unwrap();

        let completion = wait_for_completion(&runner);
        assert_eq!(completion.result.status, FileStatus::StopRequested);
        assert!(engine.cancel_requested());

        // Interactive thread clears the flag before the next job
        engine.clear_cancel();
        wait_until_idle(&runner);
        let retry = TransferJob::Paste {
            sources: vec![CopyIntent {
                name: "one.txt".to_string(),
                dir: src.display().to_string(),
                from_remote: false,
            }],
            target_dir: dst.display().to_string(),
            target_remote: false,
            overwrite: false,
        };
        runner.run(&engine, retry, None).unwrap();
        let completion = wait_for_completion(&runner);
        assert_eq!(completion.result.status, FileStatus::WrittenSuccessfully);
    }

    #[test]
    fn test_delete_job_reports_parent_dir_for_relisting() {
        let dir = tempdir().unwrap();
        let victim = dir.path().join("victim.txt");
        fs::write(&victim, b"x").unwrap();

        let engine = TransferEngine::new();
        let runner = WorkerRunner::new();
        let job = TransferJob::Delete {
            path: victim.display().to_string(),
            remote: false,
        };

        runner.run(&engine, job, None).unwrap();
        let completion = wait_for_completion(&runner);

        assert_eq!(completion.result.status, FileStatus::WrittenSuccessfully);
        assert_eq!(completion.result.kind, JobKind::Delete);
        assert_eq!(completion.result.dir, dir.path().display().to_string());
        assert!(!victim.exists());
    }
}
