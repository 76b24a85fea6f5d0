//! Sequential, rate-limited application of one category request to a list
//! of files.
//!
//! Files are processed strictly in the order given, one at a time. A file
//! that fails is recorded and the loop moves on; only a failure to set up
//! the editing session aborts a batch. Cancellation is checked between
//! files and during the rate-limit wait, never inside a gateway call.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{BatchError, GatewayError};
use crate::failure_log::{FailureLog, FailureRecord};
use crate::gateway::WikiGateway;
use crate::model::{BatchRequest, BatchResult, FileRecord};
use crate::rate_limit::RateLimiter;
use crate::wikitext::apply_category_changes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Fatal,
}

/// Callbacks fired while a batch runs. All methods default to no-ops.
pub trait BatchObserver {
    fn on_progress(&mut self, _percent: u8, _result: &BatchResult) {}

    /// `changed` is `false` when the page already had the requested
    /// categories and no edit was made.
    fn on_file_complete(&mut self, _file: &FileRecord, _changed: bool) {}

    fn on_error(&mut self, _file: &FileRecord, _error: &GatewayError) {}
}

impl BatchObserver for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Changed,
    Unchanged,
}

pub struct BatchExecutor<G> {
    gateway: G,
    rate_limiter: RateLimiter,
    failure_log: Option<FailureLog>,
    state: BatchState,
}

impl<G: WikiGateway> BatchExecutor<G> {
    pub fn new(gateway: G, rate_limiter: RateLimiter) -> Self {
        Self {
            gateway,
            rate_limiter,
            failure_log: None,
            state: BatchState::Idle,
        }
    }

    pub fn with_failure_log(mut self, failure_log: FailureLog) -> Self {
        self.failure_log = Some(failure_log);
        self
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn into_gateway(self) -> G {
        self.gateway
    }

    /// Run `request` to completion or cancellation.
    ///
    /// Validation failures return before any network call and leave the
    /// executor `Idle`. Per-file failures never surface as `Err`; they are
    /// counted in the returned [`BatchResult`]. Taking `&mut self` keeps a
    /// second batch from starting on this executor while one is running.
    pub fn run<O: BatchObserver + ?Sized>(
        &mut self,
        request: &BatchRequest,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, BatchError> {
        if request.files.is_empty() {
            return Err(BatchError::validation("no files selected"));
        }
        request.ensure_has_categories()?;

        self.state = BatchState::Running;
        if let Err(error) = self.gateway.ensure_session() {
            warn!("could not establish an editing session: {error}");
            self.state = BatchState::Fatal;
            return Err(BatchError::Fatal(error));
        }

        info!(
            files = request.files.len(),
            add = ?request.categories_to_add,
            remove = ?request.categories_to_remove,
            "starting category batch"
        );

        let mut result = BatchResult::new(request.files.len());
        for file in &request.files {
            if cancel.is_cancelled() || !self.rate_limiter.wait(cancel) {
                result.cancelled = true;
                break;
            }

            match self.process_file(file, request) {
                Ok(FileOutcome::Changed) => {
                    debug!(file = %file.title, "categories updated");
                    result.record_success();
                    observer.on_file_complete(file, true);
                }
                Ok(FileOutcome::Unchanged) => {
                    debug!(file = %file.title, "no change needed");
                    result.record_skip();
                    observer.on_file_complete(file, false);
                }
                Err(error) => {
                    let message = error.to_string();
                    warn!(file = %file.title, "category update failed: {message}");
                    if let Some(log) = &self.failure_log {
                        log.record(&FailureRecord::now(
                            &file.title,
                            &message,
                            &request.categories_to_add,
                            &request.categories_to_remove,
                        ));
                    }
                    result.record_failure(&file.title, message);
                    observer.on_error(file, &error);
                }
            }

            observer.on_progress(result.percent_complete(), &result);
        }

        self.state = if result.cancelled {
            BatchState::Cancelled
        } else {
            BatchState::Completed
        };
        info!(
            processed = result.processed,
            total = result.total,
            successful = result.successful,
            skipped = result.skipped,
            failed = result.failed,
            cancelled = result.cancelled,
            "category batch finished"
        );
        Ok(result)
    }

    fn process_file(
        &mut self,
        file: &FileRecord,
        request: &BatchRequest,
    ) -> Result<FileOutcome, GatewayError> {
        let current = self.gateway.get_page_content(&file.title)?;
        let updated = apply_category_changes(
            &current,
            &request.categories_to_add,
            &request.categories_to_remove,
        );
        if updated == current {
            return Ok(FileOutcome::Unchanged);
        }
        self.gateway
            .edit_page(&file.title, &updated, &request.edit_summary)?;
        Ok(FileOutcome::Changed)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{BatchExecutor, BatchObserver, BatchState};
    use crate::cancel::CancellationToken;
    use crate::error::{BatchError, GatewayError};
    use crate::failure_log::FailureLog;
    use crate::model::{BatchRequest, BatchResult, FileRecord};
    use crate::rate_limit::RateLimiter;
    use crate::testing::MockGateway;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn request(titles: &[&str], add: &[&str], remove: &[&str]) -> BatchRequest {
        let files = titles
            .iter()
            .map(|title| FileRecord::new(*title, Vec::new()))
            .collect();
        BatchRequest::new(files, &strings(add), &strings(remove))
    }

    fn executor(gateway: MockGateway) -> BatchExecutor<MockGateway> {
        BatchExecutor::new(gateway, RateLimiter::from_millis(0))
    }

    #[derive(Default)]
    struct Recorder {
        progress: Vec<(u8, usize)>,
        completed: Vec<(String, bool)>,
        errors: Vec<(String, GatewayError)>,
        cancel_after_first: Option<CancellationToken>,
    }

    impl BatchObserver for Recorder {
        fn on_progress(&mut self, percent: u8, result: &BatchResult) {
            assert_eq!(
                result.processed,
                result.successful + result.skipped + result.failed
            );
            self.progress.push((percent, result.processed));
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
        }

        fn on_file_complete(&mut self, file: &FileRecord, changed: bool) {
            self.completed.push((file.title.clone(), changed));
        }

        fn on_error(&mut self, file: &FileRecord, error: &GatewayError) {
            self.errors.push((file.title.clone(), error.clone()));
        }
    }

    #[test]
    fn edits_changed_pages_with_generated_summary() {
        let gateway = MockGateway::with_pages(&[("File:1.png", "desc\n[[Category:Old]]\n")]);
        let mut executor = executor(gateway);
        let mut recorder = Recorder::default();

        let result = executor
            .run(
                &request(&["File:1.png"], &["New"], &["Old"]),
                &mut recorder,
                &CancellationToken::new(),
            )
            .expect("run");

        assert_eq!(result.successful, 1);
        assert_eq!(executor.state(), BatchState::Completed);
        let edits = &executor.gateway().edits;
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].text, "desc\n[[Category:New]]\n");
        assert_eq!(
            edits[0].summary,
            "Batch category update: +New; -Old (via Category Batch Manager)"
        );
        assert_eq!(recorder.completed, vec![("File:1.png".to_string(), true)]);
        assert_eq!(recorder.progress, vec![(100, 1)]);
    }

    #[test]
    fn unchanged_pages_are_skipped_without_editing() {
        let gateway = MockGateway::with_pages(&[("File:1.png", "[[Category:New]]\n")]);
        let mut executor = executor(gateway);
        let mut recorder = Recorder::default();

        let result = executor
            .run(
                &request(&["File:1.png"], &["new"], &["Absent"]),
                &mut recorder,
                &CancellationToken::new(),
            )
            .expect("run");

        assert_eq!(result.skipped, 1);
        assert_eq!(result.successful, 0);
        assert!(executor.gateway().edits.is_empty());
        assert_eq!(recorder.completed, vec![("File:1.png".to_string(), false)]);
    }

    #[test]
    fn edit_conflict_on_second_file_does_not_stop_batch() {
        let mut gateway = MockGateway::with_pages(&[("File:1.png", "a"), ("File:2.png", "b")]);
        gateway.edit_failures.insert(
            "File:2.png".to_string(),
            GatewayError::EditConflict("File:2.png".to_string()),
        );
        let mut executor = executor(gateway);
        let mut recorder = Recorder::default();

        let result = executor
            .run(
                &request(&["File:1.png", "File:2.png"], &["C"], &[]),
                &mut recorder,
                &CancellationToken::new(),
            )
            .expect("run");

        assert_eq!(result.total, 2);
        assert_eq!(result.processed, 2);
        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].file_title, "File:2.png");
        assert_eq!(result.errors[0].message, "edit conflict on File:2.png");
        assert_eq!(recorder.completed, vec![("File:1.png".to_string(), true)]);
        assert_eq!(recorder.errors.len(), 1);
        assert_eq!(recorder.errors[0].0, "File:2.png");
        assert_eq!(recorder.progress, vec![(50, 1), (100, 2)]);
    }

    #[test]
    fn failure_in_the_middle_continues_with_later_files() {
        let mut gateway = MockGateway::with_pages(&[("File:1", "a"), ("File:3", "c")]);
        gateway.read_failures.insert(
            "File:1".to_string(),
            GatewayError::Network("timed out".to_string()),
        );
        let mut executor = executor(gateway);

        let result = executor
            .run(
                &request(&["File:1", "File:2", "File:3"], &["X"], &[]),
                &mut (),
                &CancellationToken::new(),
            )
            .expect("run");

        assert_eq!(result.failed, 2);
        assert_eq!(result.successful, 1);
        assert_eq!(result.errors[0].message, "network error: timed out");
        assert_eq!(result.errors[1].message, "page not found: File:2");
        assert_eq!(executor.gateway().reads, strings(&["File:1", "File:2", "File:3"]));
    }

    #[test]
    fn cancellation_after_first_file_leaves_rest_untouched() {
        let gateway = MockGateway::with_pages(&[("File:1", "a"), ("File:2", "b"), ("File:3", "c")]);
        let mut executor = executor(gateway);
        let token = CancellationToken::new();
        let mut recorder = Recorder {
            cancel_after_first: Some(token.clone()),
            ..Recorder::default()
        };

        let result = executor
            .run(
                &request(&["File:1", "File:2", "File:3"], &["X"], &[]),
                &mut recorder,
                &token,
            )
            .expect("run");

        assert!(result.processed <= 2);
        assert_eq!(result.processed, 1);
        assert!(result.cancelled);
        assert!(result.errors.is_empty());
        assert_eq!(result.failed, 0);
        assert_eq!(executor.state(), BatchState::Cancelled);
        assert_eq!(executor.gateway().reads, strings(&["File:1"]));
    }

    #[test]
    fn cancelled_before_start_processes_nothing() {
        let gateway = MockGateway::with_pages(&[("File:1", "a")]);
        let mut executor = executor(gateway);
        let token = CancellationToken::new();
        token.cancel();

        let result = executor
            .run(&request(&["File:1"], &["X"], &[]), &mut (), &token)
            .expect("run");

        assert_eq!(result.processed, 0);
        assert_eq!(result.total, 1);
        assert!(result.cancelled);
        assert!(executor.gateway().reads.is_empty());
    }

    #[test]
    fn validation_errors_make_no_gateway_calls() {
        let mut executor = executor(MockGateway::default());

        let error = executor
            .run(&request(&[], &["X"], &[]), &mut (), &CancellationToken::new())
            .expect_err("no files");
        assert_eq!(error, BatchError::validation("no files selected"));

        let error = executor
            .run(&request(&["File:1"], &[], &[]), &mut (), &CancellationToken::new())
            .expect_err("no categories");
        assert_eq!(error, BatchError::validation("no categories specified"));

        assert_eq!(executor.gateway().session_calls, 0);
        assert_eq!(executor.state(), BatchState::Idle);
    }

    #[test]
    fn session_failure_is_fatal() {
        let mut gateway = MockGateway::with_pages(&[("File:1", "a")]);
        gateway.session_failure = Some(GatewayError::Permission("login failed".to_string()));
        let mut executor = executor(gateway);

        let error = executor
            .run(&request(&["File:1"], &["X"], &[]), &mut (), &CancellationToken::new())
            .expect_err("fatal");

        assert_eq!(
            error,
            BatchError::Fatal(GatewayError::Permission("login failed".to_string()))
        );
        assert_eq!(executor.state(), BatchState::Fatal);
        assert!(executor.gateway().reads.is_empty());
    }

    #[test]
    fn executor_can_run_again_after_completion() {
        let gateway = MockGateway::with_pages(&[("File:1", "a")]);
        let mut executor = executor(gateway);
        let token = CancellationToken::new();

        let first = executor
            .run(&request(&["File:1"], &["X"], &[]), &mut (), &token)
            .expect("first");
        let second = executor
            .run(&request(&["File:1"], &["X"], &[]), &mut (), &token)
            .expect("second");

        assert_eq!(first.successful, 1);
        assert_eq!(second.skipped, 1);
        assert_eq!(executor.gateway().session_calls, 2);
    }

    #[test]
    fn failures_are_appended_to_the_failure_log() {
        let temp = tempdir().expect("tempdir");
        let log = FailureLog::new(temp.path().join("failures.jsonl"));
        let mut gateway = MockGateway::with_pages(&[("File:1", "a")]);
        gateway.edit_failures.insert(
            "File:1".to_string(),
            GatewayError::Permission("protectedpage".to_string()),
        );
        let mut executor = executor(gateway).with_failure_log(log.clone());

        executor
            .run(&request(&["File:1"], &["X"], &["Y"]), &mut (), &CancellationToken::new())
            .expect("run");

        let records = log.load().expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_title, "File:1");
        assert_eq!(records[0].message, "permission denied: protectedpage");
        assert_eq!(records[0].added, strings(&["X"]));
        assert_eq!(records[0].removed, strings(&["Y"]));
    }

    #[test]
    fn fresh_content_is_used_instead_of_search_time_categories() {
        let gateway = MockGateway::with_pages(&[("File:1", "text\n[[Category:Added meanwhile]]\n")]);
        let mut executor = executor(gateway);
        let stale = BatchRequest::new(
            vec![FileRecord::new("File:1", Vec::new())],
            &strings(&["Added_meanwhile"]),
            &[],
        );

        let result = executor
            .run(&stale, &mut (), &CancellationToken::new())
            .expect("run");
        assert_eq!(result.skipped, 1);
    }
}
