use anyhow::{Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::page::{NS_FILE, PageRef, PageSnapshot};
use crate::paginate::{ListQuery, Paginator};
use crate::response::CategoryMember;
use crate::runner::{MarkDecision, MarkTask};
use crate::transport::ApiTransport;

/// Catch-all categories that mostly collect mis-categorised uploads.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Category:未知",
    "Category:作者:未知",
    "Category:作者:",
    "Category:A",
    "Category:And",
    "Category:Of",
    "Category:The",
    "Category:To",
    "Category:With",
    "Category:In",
];
pub const DEFAULT_MIN_AGE_DAYS: u32 = 3;
pub const DELETION_MARKER: &str = "{{即将删除";
pub const UNUSED_FILE_TEXT: &str =
    "<noinclude>{{即将删除|user=机娘亚衣琴|无使用或不再使用的文件}}</noinclude>";
pub const UNUSED_FILE_SUMMARY: &str = "自动挂删错误分类下的无使用文件";

/// Files sitting in the catch-all categories for longer than the grace period.
#[derive(Debug, Clone)]
pub struct UnusedFilesTask {
    categories: Vec<String>,
    min_age: TimeDelta,
    now: DateTime<Utc>,
}

impl UnusedFilesTask {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.iter().map(ToString::to_string).collect(),
            min_age: TimeDelta::days(i64::from(DEFAULT_MIN_AGE_DAYS)),
            now,
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        if !categories.is_empty() {
            self.categories = categories;
        }
        self
    }

    pub fn with_min_age_days(mut self, days: u32) -> Self {
        self.min_age = TimeDelta::days(i64::from(days));
        self
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.now - self.min_age
    }

    /// Strictly older than the cutoff. Members without a readable timestamp
    /// are left alone.
    fn is_old_enough(&self, member: &CategoryMember) -> bool {
        member
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .is_some_and(|added| added.with_timezone(&Utc) < self.cutoff())
    }
}

impl MarkTask for UnusedFilesTask {
    fn name(&self) -> &str {
        "unused-files"
    }

    fn summary(&self) -> &str {
        UNUSED_FILE_SUMMARY
    }

    fn candidates(&self, transport: &mut dyn ApiTransport) -> Result<Vec<PageRef>> {
        let mut refs = Vec::new();
        let mut failures = Vec::new();
        for category in &self.categories {
            let query = ListQuery::new("categorymembers", "cmcontinue")
                .param("list", "categorymembers")
                .param("cmtitle", category.as_str())
                .param("cmnamespace", NS_FILE.to_string())
                .param("cmprop", "ids|title|timestamp")
                .param("cmsort", "timestamp")
                .param("cmdir", "desc")
                .param("cmlimit", "max");
            let mut paginator = Paginator::new(&mut *transport, query);
            let members = paginator.drain_typed::<CategoryMember>();
            if let Some(error) = paginator.failure() {
                failures.push(format!("{category}: {error}"));
            }
            let total = members.len();
            let old = members
                .into_iter()
                .filter(|member| self.is_old_enough(member))
                .map(|member| match member.pageid {
                    Some(id) => PageRef::with_id(id, member.title),
                    None => PageRef::from_title(member.title),
                })
                .collect::<Vec<_>>();
            info!(%category, total, old_enough = old.len(), "category listed");
            refs.extend(old);
        }
        if refs.is_empty() && !failures.is_empty() {
            bail!("every category listing failed: {}", failures.join("; "));
        }
        Ok(refs)
    }

    fn decide(&self, snapshot: &PageSnapshot) -> MarkDecision {
        match snapshot.content.as_deref() {
            Some(content) if content.contains(DELETION_MARKER) => {
                debug!(title = %snapshot.title, "already carries the deletion template");
                MarkDecision::Skip("already marked")
            }
            Some(content) if content.is_empty() => MarkDecision::Skip("empty description page"),
            Some(_) => MarkDecision::Mark,
            None => MarkDecision::Skip("content unavailable"),
        }
    }

    fn marked_text(&self, _snapshot: &PageSnapshot) -> String {
        UNUSED_FILE_TEXT.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use super::{DEFAULT_CATEGORIES, UNUSED_FILE_TEXT, UnusedFilesTask};
    use crate::error::ApiError;
    use crate::page::PageSnapshot;
    use crate::runner::{MarkDecision, MarkTask};
    use crate::testing::ScriptedTransport;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-10T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn snapshot(content: Option<&str>) -> PageSnapshot {
        PageSnapshot {
            title: "File:A.png".to_string(),
            page_id: Some(9),
            content: content.map(ToString::to_string),
            exists: true,
            revision_timestamp: Some("2026-03-01T00:00:00Z".to_string()),
            server_timestamp: "2026-03-10T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn only_files_older_than_grace_period_are_candidates() {
        let task = UnusedFilesTask::new(now()).with_categories(vec!["Category:A".to_string()]);
        let mut transport = ScriptedTransport::new(|call| {
            assert!(call.is("cmtitle", "Category:A"));
            assert!(call.is("cmnamespace", "6"));
            Ok(json!({ "query": { "categorymembers": [
                { "pageid": 1, "ns": 6, "title": "File:New.png", "timestamp": "2026-03-09T00:00:00Z" },
                { "pageid": 2, "ns": 6, "title": "File:Edge.png", "timestamp": "2026-03-07T12:00:00Z" },
                { "pageid": 3, "ns": 6, "title": "File:Old.png", "timestamp": "2026-02-01T00:00:00Z" },
                { "pageid": 4, "ns": 6, "title": "File:Odd.png", "timestamp": "yesterday" }
            ]}}))
        });
        let refs = task.candidates(&mut transport).expect("candidates");
        let titles = refs.iter().map(|page| page.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["File:Old.png"]);
        assert_eq!(refs[0].id, Some(3));
    }

    #[test]
    fn every_default_category_is_listed() {
        let task = UnusedFilesTask::new(now()).with_min_age_days(0);
        let mut transport = ScriptedTransport::new(|_| Ok(json!({ "query": { "categorymembers": [] } })));
        let refs = task.candidates(&mut transport).expect("candidates");
        assert!(refs.is_empty());
        assert_eq!(transport.calls.len(), DEFAULT_CATEGORIES.len());
    }

    #[test]
    fn partial_listing_failure_keeps_other_categories() {
        let task = UnusedFilesTask::new(now())
            .with_categories(vec!["Category:A".to_string(), "Category:B".to_string()]);
        let mut transport = ScriptedTransport::new(|call| {
            if call.is("cmtitle", "Category:A") {
                return Err(ApiError::HttpStatus(502));
            }
            Ok(json!({ "query": { "categorymembers": [
                { "ns": 6, "title": "File:Old.png", "timestamp": "2026-01-01T00:00:00Z" }
            ]}}))
        });
        let refs = task.candidates(&mut transport).expect("candidates");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, None);
    }

    #[test]
    fn all_listings_failing_is_an_error() {
        let task = UnusedFilesTask::new(now());
        let mut transport = ScriptedTransport::new(|_| Err(ApiError::HttpStatus(503)));
        assert!(task.candidates(&mut transport).is_err());
    }

    #[test]
    fn marked_pages_are_not_marked_twice() {
        let task = UnusedFilesTask::new(now());
        assert_eq!(
            task.decide(&snapshot(Some("{{即将删除|user=X}}"))),
            MarkDecision::Skip("already marked")
        );
        assert_eq!(task.decide(&snapshot(Some("a picture"))), MarkDecision::Mark);
        assert_eq!(
            task.decide(&snapshot(Some(""))),
            MarkDecision::Skip("empty description page")
        );
        assert_eq!(task.marked_text(&snapshot(None)), UNUSED_FILE_TEXT);
    }
}
