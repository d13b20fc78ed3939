use anyhow::Result;
use serde::Serialize;
use similar::TextDiff;
use tracing::{info, warn};

use crate::batch::{MAX_BATCH_SIZE, chunk, dedup_by_key};
use crate::config::derive_wiki_url;
use crate::edit::{EditOutcome, EditRequest};
use crate::error::{ApiError, ErrorKind};
use crate::fetch::{FetchedPage, fetch_snapshots};
use crate::page::{PageRef, PageSnapshot};
use crate::throttle::{Pacer, ThrottledSession};
use crate::transport::ApiTransport;
use crate::usage::probe_usage;

/// Bot that rewrites page text with a pure function.
pub trait FixupTask {
    fn name(&self) -> &str;
    fn summary(&self) -> &str;
    fn tags(&self) -> Option<&str> {
        Some("Bot")
    }
    fn candidates(&self, transport: &mut dyn ApiTransport) -> Result<Vec<PageRef>>;
    fn is_excluded(&self, _title: &str) -> bool {
        false
    }
    fn transform(&self, content: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkDecision {
    Mark,
    Skip(&'static str),
}

/// Bot that replaces unused pages with a deletion request.
pub trait MarkTask {
    fn name(&self) -> &str;
    fn summary(&self) -> &str;
    fn tags(&self) -> Option<&str> {
        Some("Bot")
    }
    fn candidates(&self, transport: &mut dyn ApiTransport) -> Result<Vec<PageRef>>;
    fn is_excluded(&self, _title: &str) -> bool {
        false
    }
    /// Decide on an existing, readable page that no probe found in use.
    fn decide(&self, snapshot: &PageSnapshot) -> MarkDecision;
    fn marked_text(&self, snapshot: &PageSnapshot) -> String;
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    pub batch_size: usize,
    pub dry_run: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub task: String,
    pub success: bool,
    pub dry_run: bool,
    pub candidates: usize,
    pub batches: usize,
    pub edited: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub pages: Vec<PageResult>,
    pub request_count: usize,
}

impl RunReport {
    fn new(task: &str, dry_run: bool) -> Self {
        Self {
            task: task.to_string(),
            success: true,
            dry_run,
            candidates: 0,
            batches: 0,
            edited: 0,
            unchanged: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            pages: Vec::new(),
            request_count: 0,
        }
    }

    fn push(&mut self, title: &str, action: &str, detail: Option<String>) {
        self.pages.push(PageResult {
            title: title.to_string(),
            action: action.to_string(),
            detail,
        });
    }

    fn skip(&mut self, title: &str, reason: &str) {
        self.skipped += 1;
        self.push(title, "skipped", Some(reason.to_string()));
    }

    fn fail(&mut self, title: &str, reason: String) {
        self.failed += 1;
        self.errors.push(format!("{title}: {reason}"));
        self.push(title, "failed", Some(reason));
    }

    /// Conflicts and unknown pages are skips; everything else is a failure.
    fn error(&mut self, title: &str, error: &ApiError) {
        match error.kind() {
            ErrorKind::Conflict => self.skip(title, &error.to_string()),
            _ => self.fail(title, error.to_string()),
        }
    }
}

enum PageFlow {
    Continue,
    AbortBatch,
}

/// Drives one task over a throttled session: candidates, batches, reads,
/// decisions and edits, keeping the counters for the final report.
pub struct TaskRunner<'s, T: ApiTransport, P: Pacer> {
    session: &'s mut ThrottledSession<T, P>,
    options: RunnerOptions,
}

impl<'s, T: ApiTransport, P: Pacer> TaskRunner<'s, T, P> {
    pub fn new(session: &'s mut ThrottledSession<T, P>, options: RunnerOptions) -> Self {
        Self { session, options }
    }

    pub fn run_fixup(&mut self, task: &dyn FixupTask) -> RunReport {
        let mut report = RunReport::new(task.name(), self.options.dry_run);
        let candidates = {
            let transport: &mut dyn ApiTransport = self.session.transport_mut();
            task.candidates(transport)
        };
        let Some(candidates) = self.prepare(candidates, |title| task.is_excluded(title), &mut report)
        else {
            return self.finish(report);
        };

        for (index, batch) in chunk(&candidates, self.options.batch_size).enumerate() {
            self.session.begin_batch();
            report.batches += 1;
            info!(task = task.name(), batch = index + 1, size = batch.len(), "processing batch");

            let fetched = match fetch_snapshots(self.session.transport_mut(), batch) {
                Ok(fetched) => fetched,
                Err(error) => {
                    skip_batch(&mut report, batch, &error);
                    continue;
                }
            };
            let mut remaining = fetched.into_iter();
            for item in remaining.by_ref() {
                if let PageFlow::AbortBatch = self.fixup_page(task, item, &mut report) {
                    break;
                }
            }
            for item in remaining {
                report.skip(&item.requested.title, "batch aborted");
            }
        }

        self.finish(report)
    }

    pub fn run_marking(&mut self, task: &dyn MarkTask) -> RunReport {
        let mut report = RunReport::new(task.name(), self.options.dry_run);
        let candidates = {
            let transport: &mut dyn ApiTransport = self.session.transport_mut();
            task.candidates(transport)
        };
        let Some(candidates) = self.prepare(candidates, |title| task.is_excluded(title), &mut report)
        else {
            return self.finish(report);
        };

        for (index, batch) in chunk(&candidates, self.options.batch_size).enumerate() {
            self.session.begin_batch();
            report.batches += 1;
            info!(task = task.name(), batch = index + 1, size = batch.len(), "processing batch");

            let titles = batch.iter().map(|page| page.title.clone()).collect::<Vec<_>>();
            let verdicts = probe_usage(self.session.transport_mut(), &titles);
            let mut unused = Vec::new();
            for (page, verdict) in batch.iter().zip(&verdicts) {
                if verdict.is_unused() {
                    unused.push(page.clone());
                } else {
                    report.skip(&page.title, "in use");
                }
            }
            info!(batch = index + 1, unused = unused.len(), "usage probe finished");
            if unused.is_empty() {
                continue;
            }

            let fetched = match fetch_snapshots(self.session.transport_mut(), &unused) {
                Ok(fetched) => fetched,
                Err(error) => {
                    skip_batch(&mut report, &unused, &error);
                    continue;
                }
            };
            let mut remaining = fetched.into_iter();
            for item in remaining.by_ref() {
                if let PageFlow::AbortBatch = self.mark_page(task, item, &mut report) {
                    break;
                }
            }
            for item in remaining {
                report.skip(&item.requested.title, "batch aborted");
            }
        }

        self.finish(report)
    }

    fn prepare(
        &self,
        candidates: Result<Vec<PageRef>>,
        is_excluded: impl Fn(&str) -> bool,
        report: &mut RunReport,
    ) -> Option<Vec<PageRef>> {
        let candidates = match candidates {
            Ok(candidates) => candidates,
            Err(error) => {
                let reason = format!("{error:#}");
                warn!(task = %report.task, %reason, "candidate query failed");
                report.errors.push(format!("candidate query failed: {reason}"));
                return None;
            }
        };
        let found = candidates.len();
        let candidates = dedup_by_key(candidates, PageRef::identity)
            .into_iter()
            .filter(|page| !is_excluded(&page.title))
            .collect::<Vec<_>>();
        info!(task = %report.task, found, kept = candidates.len(), "collected candidates");
        report.candidates = candidates.len();
        Some(candidates)
    }

    fn fixup_page(
        &mut self,
        task: &dyn FixupTask,
        item: FetchedPage,
        report: &mut RunReport,
    ) -> PageFlow {
        let snapshot = match item.snapshot {
            Ok(snapshot) => snapshot,
            Err(error) => {
                report.error(&item.requested.title, &error);
                return PageFlow::Continue;
            }
        };
        if !snapshot.exists {
            report.skip(&snapshot.title, "page missing");
            return PageFlow::Continue;
        }
        let Some(content) = snapshot.content.as_deref() else {
            report.skip(&snapshot.title, "content unavailable");
            return PageFlow::Continue;
        };

        let fixed = task.transform(content);
        if fixed == content {
            report.unchanged += 1;
            report.push(&snapshot.title, "unchanged", None);
            return PageFlow::Continue;
        }
        if self.options.dry_run {
            self.preview(&snapshot.title, content, &fixed, report);
            return PageFlow::Continue;
        }

        let request = EditRequest::from_snapshot(&snapshot, fixed, task.summary())
            .with_tags(task.tags())
            .with_nocreate(true);
        self.submit(&request, report)
    }

    fn mark_page(&mut self, task: &dyn MarkTask, item: FetchedPage, report: &mut RunReport) -> PageFlow {
        let snapshot = match item.snapshot {
            Ok(snapshot) => snapshot,
            Err(error) => {
                report.error(&item.requested.title, &error);
                return PageFlow::Continue;
            }
        };
        if !snapshot.exists {
            report.skip(&snapshot.title, "page missing");
            return PageFlow::Continue;
        }
        let Some(content) = snapshot.content.as_deref() else {
            report.skip(&snapshot.title, "content unavailable");
            return PageFlow::Continue;
        };
        if let MarkDecision::Skip(reason) = task.decide(&snapshot) {
            report.skip(&snapshot.title, reason);
            return PageFlow::Continue;
        }

        let marked = task.marked_text(&snapshot);
        if self.options.dry_run {
            self.preview(&snapshot.title, content, &marked, report);
            return PageFlow::Continue;
        }
        let request =
            EditRequest::from_snapshot(&snapshot, marked, task.summary()).with_tags(task.tags());
        self.submit(&request, report)
    }

    fn submit(&mut self, request: &EditRequest, report: &mut RunReport) -> PageFlow {
        match self.session.submit_edit(request) {
            EditOutcome::Applied {
                old_revid,
                new_revid,
            } => {
                let link = diff_link(self.session.endpoint(), old_revid, new_revid);
                info!(title = %request.title, %link, "edit applied");
                report.edited += 1;
                report.push(&request.title, "edited", Some(link));
                PageFlow::Continue
            }
            EditOutcome::NoChange => {
                info!(title = %request.title, "edit made no change");
                report.unchanged += 1;
                report.push(&request.title, "no_change", None);
                PageFlow::Continue
            }
            EditOutcome::Failed(failure) => {
                warn!(title = %request.title, kind = failure.kind.as_str(), reason = %failure.reason, "edit failed");
                match failure.kind {
                    ErrorKind::Conflict => {
                        report.skip(&request.title, &failure.reason);
                        PageFlow::Continue
                    }
                    ErrorKind::AuthStale => {
                        report.fail(&request.title, failure.reason);
                        PageFlow::AbortBatch
                    }
                    _ => {
                        report.fail(&request.title, failure.reason);
                        PageFlow::Continue
                    }
                }
            }
        }
    }

    fn preview(&self, title: &str, current: &str, proposed: &str, report: &mut RunReport) {
        let diff = TextDiff::from_lines(current, proposed)
            .unified_diff()
            .context_radius(1)
            .header("current", "proposed")
            .to_string();
        info!(%title, "dry run; would edit\n{diff}");
        report.push(title, "would_edit", None);
    }

    fn finish(&self, mut report: RunReport) -> RunReport {
        report.request_count = self.session.request_count();
        report.success = report.errors.is_empty();
        info!(
            task = %report.task,
            edited = report.edited,
            total = report.candidates,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "task finished: {}/{} edited",
            report.edited,
            report.candidates
        );
        report
    }
}

fn skip_batch(report: &mut RunReport, batch: &[PageRef], error: &ApiError) {
    warn!(%error, size = batch.len(), "content fetch failed; skipping batch");
    report.errors.push(format!("batch fetch failed: {error}"));
    for page in batch {
        report.skip(&page.title, "batch fetch failed");
    }
}

/// `Special:Diff` link for a revision pair on the wiki behind `endpoint`.
pub fn diff_link(endpoint: &str, old_revid: u64, new_revid: u64) -> String {
    let base = derive_wiki_url(endpoint).unwrap_or_else(|| endpoint.to_string());
    format!("{base}/Special:Diff/{old_revid}/{new_revid}")
}
