use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use regex::Regex;
use tracing::{debug, info};

use crate::page::{PageRef, PageSnapshot};
use crate::paginate::{ListQuery, Paginator};
use crate::response::LogEvent;
use crate::runner::{MarkDecision, MarkTask};
use crate::transport::ApiTransport;

pub const DEFAULT_WINDOW_HOURS: u32 = 24;
pub const REDIRECT_TEXT: &str = "<noinclude>{{即将删除|user=机娘亚衣琴|移动残留重定向}}</noinclude>";
pub const REDIRECT_SUMMARY: &str = "自动挂删文件移动残留重定向";

static REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#(?:重定向|redirect)\s*\[\[.*?\]\]").expect("valid regex")
});

pub fn is_redirect(content: &str) -> bool {
    REDIRECT.is_match(content)
}

/// Redirects left behind by file moves inside the look-back window.
#[derive(Debug, Clone)]
pub struct MovedRedirectsTask {
    window: TimeDelta,
    now: DateTime<Utc>,
}

impl MovedRedirectsTask {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window: TimeDelta::hours(i64::from(DEFAULT_WINDOW_HOURS)),
            now,
        }
    }

    pub fn with_window_hours(mut self, hours: u32) -> Self {
        self.window = TimeDelta::hours(i64::from(hours));
        self
    }

    fn window_start(&self) -> String {
        (self.now - self.window).to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl MarkTask for MovedRedirectsTask {
    fn name(&self) -> &str {
        "moved-redirects"
    }

    fn summary(&self) -> &str {
        REDIRECT_SUMMARY
    }

    fn candidates(&self, transport: &mut dyn ApiTransport) -> Result<Vec<PageRef>> {
        let query = ListQuery::new("logevents", "lecontinue")
            .param("list", "logevents")
            .param("letype", "move")
            .param("lestart", self.window_start())
            .param("ledir", "newer")
            .param("lelimit", "500")
            .param("leprop", "title|timestamp|comment|details");
        let mut paginator = Paginator::new(transport, query);
        let events = paginator.drain_typed::<LogEvent>();
        if events.is_empty()
            && let Some(error) = paginator.failure()
        {
            return Err(anyhow!("move log query failed: {error}"));
        }

        let refs = events
            .into_iter()
            .filter_map(|event| {
                let target = event.move_target().map(ToString::to_string);
                let title = event.title?;
                debug!(%title, target = ?target, "file move logged");
                Some(PageRef::from_title(title))
            })
            .collect::<Vec<_>>();
        info!(since = %self.window_start(), moves = refs.len(), "move log read");
        Ok(refs)
    }

    fn is_excluded(&self, title: &str) -> bool {
        !title.starts_with("File:")
    }

    fn decide(&self, snapshot: &PageSnapshot) -> MarkDecision {
        match snapshot.content.as_deref() {
            Some(content) if is_redirect(content) => MarkDecision::Mark,
            Some(_) => MarkDecision::Skip("not a redirect"),
            None => MarkDecision::Skip("content unavailable"),
        }
    }

    fn marked_text(&self, _snapshot: &PageSnapshot) -> String {
        REDIRECT_TEXT.to_string()
    }
}
