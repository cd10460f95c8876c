//! Background warm-up of bare stores while the user reads a plan.
//!
//! One thread per repo key, started together by [`Prefetcher::start_all`] and
//! joined by [`Prefetcher::wait_all`] under a single deadline shared by the
//! whole batch. Tasks that miss the deadline are abandoned and their VCS
//! calls cancelled through the batch's own token.

use std::{
    collections::BTreeSet,
    mem,
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    cancel::CancelToken,
    config::Config,
    error::{CanopyError, Result},
    git::Vcs,
    repospec::RepoKey,
    repostore::RepoStores,
};

/// Upper bound on a single receive, so cancellation is noticed promptly.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Outcome reported by one prefetch thread.
type TaskResult = (String, Result<()>);

/// Runs one prefetch task per repo key.
pub struct Prefetcher {
    /// VCS shared with the worker threads.
    vcs: Arc<dyn Vcs>,
    /// Settings cloned into each worker.
    config: Config,
    /// Token for this batch; fired when the deadline passes.
    cancel: CancelToken,
    /// Deadline fixed at `start_all`.
    deadline: Option<Instant>,
    /// Results from workers.
    rx: Option<Receiver<TaskResult>>,
    /// Keys started but not yet reported.
    pending: BTreeSet<String>,
}

impl Prefetcher {
    /// Create a prefetcher. `cancel` should be a child of the invocation's
    /// token and the same token the VCS was built with.
    pub fn new(vcs: Arc<dyn Vcs>, config: Config, cancel: CancelToken) -> Self {
        Self {
            vcs,
            config,
            cancel,
            deadline: None,
            rx: None,
            pending: BTreeSet::new(),
        }
    }

    /// Start one task per key. Invalid keys and thread spawn failures are
    /// setup errors; task failures are reported by [`wait_all`](Self::wait_all).
    pub fn start_all(&mut self, keys: &[String]) -> Result<usize> {
        let keys = keys
            .iter()
            .map(|key| RepoKey::parse(key))
            .collect::<Result<BTreeSet<_>>>()?;
        let (tx, rx) = mpsc::channel::<TaskResult>();
        self.deadline = Some(Instant::now() + self.config.prefetch_timeout);

        for key in keys {
            let name = key.to_string();
            let tx = tx.clone();
            let vcs = Arc::clone(&self.vcs);
            let config = self.config.clone();
            thread::Builder::new()
                .name(format!("prefetch {name}"))
                .spawn(move || {
                    let result = RepoStores::new(&config, vcs.as_ref()).prefetch(&key);
                    if tx.send((key.to_string(), result)).is_err() {
                        debug!("prefetch of {key} finished after the batch was abandoned");
                    }
                })?;
            debug!("prefetch started: {name}");
            self.pending.insert(name);
        }
        self.rx = Some(rx);
        Ok(self.pending.len())
    }

    /// Stop waiting on the batch and cancel its in-flight VCS calls.
    pub fn abandon(&mut self) {
        if self.rx.take().is_some() {
            debug!("prefetch abandoned with {} task(s) pending", self.pending.len());
        }
        self.cancel.cancel();
        self.pending.clear();
    }

    /// Wait for every started task or the shared deadline, whichever is first.
    ///
    /// Failed tasks and a timeout are aggregated into one `Prefetch` error.
    /// Cancellation of the invocation returns `Cancelled`.
    pub fn wait_all(&mut self) -> Result<()> {
        let Some(rx) = self.rx.take() else {
            return Ok(());
        };
        let deadline = self.deadline.unwrap_or_else(Instant::now);
        let mut failures = Vec::new();

        while !self.pending.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(CanopyError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.cancel.cancel();
                let waiting: Vec<&str> = self.pending.iter().map(String::as_str).collect();
                failures.push(format!(
                    "timed out after {}s waiting for {}",
                    self.config.prefetch_timeout.as_secs(),
                    waiting.join(", ")
                ));
                self.pending.clear();
                break;
            }
            match rx.recv_timeout(remaining.min(POLL_SLICE)) {
                Ok((key, result)) => {
                    self.pending.remove(&key);
                    match result {
                        Ok(()) => debug!("prefetch done: {key}"),
                        Err(e) => {
                            warn!("prefetch failed: {key}: {e}");
                            failures.push(format!("{key}: {e}"));
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    for key in mem::take(&mut self.pending) {
                        failures.push(format!("{key}: task exited without reporting"));
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CanopyError::Prefetch(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::testing::FakeVcs;

    /// Fake with two remotes and a prefetcher over it.
    fn setup(vcs: FakeVcs, timeout: Duration) -> (TempDir, Arc<FakeVcs>, Prefetcher, CancelToken) {
        let tmp = TempDir::new().unwrap();
        vcs.add_remote("https://github.com/acme/app.git", "main", &["main"]);
        vcs.add_remote("https://github.com/acme/lib.git", "trunk", &["trunk"]);
        let vcs = Arc::new(vcs);
        let mut config = Config::with_root(tmp.path());
        config.prefetch_timeout = timeout;
        let parent = CancelToken::new();
        let prefetcher = Prefetcher::new(vcs.clone(), config, parent.child());
        (tmp, vcs, prefetcher, parent)
    }

    /// The two keys served by [`setup`].
    fn keys() -> Vec<String> {
        vec![
            "github.com/acme/lib.git".to_string(),
            "github.com/acme/app.git".to_string(),
            "github.com/acme/app.git".to_string(),
        ]
    }

    #[test]
    fn all_tasks_complete() {
        let (tmp, vcs, mut prefetcher, _) = setup(FakeVcs::new(), Duration::from_secs(10));
        assert_eq!(prefetcher.start_all(&keys()).unwrap(), 2);
        prefetcher.wait_all().unwrap();
        assert_eq!(vcs.count("clone"), 2);
        assert_eq!(vcs.count("fetch --prune"), 2);
        assert!(tmp.path().join("bare/github.com/acme/lib.git").exists());
    }

    #[test]
    fn failures_are_aggregated() {
        let (_tmp, vcs, mut prefetcher, _) = setup(FakeVcs::new(), Duration::from_secs(10));
        vcs.set_offline("https://github.com/acme/lib.git");
        prefetcher.start_all(&keys()).unwrap();
        let err = prefetcher.wait_all().unwrap_err();
        match err {
            CanopyError::Prefetch(msg) => {
                assert!(msg.contains("github.com/acme/lib.git"), "{msg}");
                assert!(!msg.contains("app.git"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn shared_deadline_bounds_the_batch() {
        let (_tmp, _vcs, mut prefetcher, _) = setup(
            FakeVcs::with_latency(Duration::from_millis(400)),
            Duration::from_millis(50),
        );
        let started = Instant::now();
        prefetcher.start_all(&keys()).unwrap();
        let err = prefetcher.wait_all().unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(350));
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(prefetcher.cancel.is_cancelled());
    }

    #[test]
    fn cancellation_unblocks_the_wait() {
        let (_tmp, _vcs, mut prefetcher, parent) = setup(
            FakeVcs::with_latency(Duration::from_millis(400)),
            Duration::from_secs(10),
        );
        prefetcher.start_all(&keys()).unwrap();
        parent.cancel();
        let started = Instant::now();
        assert!(matches!(prefetcher.wait_all(), Err(CanopyError::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn abandoned_batch_is_cancelled() {
        let (_tmp, _vcs, mut prefetcher, parent) = setup(
            FakeVcs::with_latency(Duration::from_millis(200)),
            Duration::from_secs(10),
        );
        prefetcher.start_all(&keys()).unwrap();
        prefetcher.abandon();
        assert!(prefetcher.cancel.is_cancelled());
        assert!(!parent.is_cancelled());
        prefetcher.wait_all().unwrap();
    }

    #[test]
    fn invalid_keys_fail_setup() {
        let (_tmp, vcs, mut prefetcher, _) = setup(FakeVcs::new(), Duration::from_secs(1));
        assert!(matches!(
            prefetcher.start_all(&["not a key".to_string()]),
            Err(CanopyError::InvalidRepoSpec { .. })
        ));
        assert!(vcs.calls().is_empty());
        prefetcher.wait_all().unwrap();
    }
}
