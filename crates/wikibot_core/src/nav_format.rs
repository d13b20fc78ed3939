//! Navbox template layout fixup.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::{debug, info};

use crate::page::{NS_TEMPLATE, PageRef};
use crate::paginate::{ListQuery, Paginator};
use crate::response::SearchHit;
use crate::runner::FixupTask;
use crate::transport::ApiTransport;

pub const NAV_SEARCHES: &[&str] = &[
    r#"hastemplate:"navbox" insource:"name" insource:"navbox""#,
    r#"insource:"invoke:nav" insource:"name""#,
];
pub const NAV_SUMMARY: &str = "自动修复格式排版";

static EXCLUDED_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Template:(?:Navbox|沙盒|Sandbox)|/doc").expect("valid regex"));

struct Rule {
    label: &'static str,
    pattern: LazyLock<Regex>,
    replacement: &'static str,
}

static RULES: [Rule; 4] = [
    Rule {
        label: "newline before navbox",
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)(</noinclude>)\s*\n\s*(\{\{\s*navbox)").expect("valid regex")
        }),
        replacement: "$1$2",
    },
    Rule {
        label: "newline before nav invoke",
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)(</noinclude>)\s*\n\s*(\{\{#invoke:Nav\|box)").expect("valid regex")
        }),
        replacement: "$1$2",
    },
    Rule {
        label: "space after link",
        pattern: LazyLock::new(|| Regex::new(r"\]\]•").expect("valid regex")),
        replacement: "]] •",
    },
    Rule {
        label: "space before link",
        pattern: LazyLock::new(|| Regex::new(r"•\[\[").expect("valid regex")),
        replacement: "• [[",
    },
];

/// Apply every layout rule in order. Already tidy text comes back unchanged.
pub fn fix_nav_layout(content: &str) -> String {
    let mut text = content.to_string();
    for rule in &RULES {
        let replaced = rule.pattern.replace_all(&text, rule.replacement);
        if replaced != text.as_str() {
            debug!(rule = rule.label, "layout rule applied");
            text = replaced.into_owned();
        }
    }
    text
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NavFormatTask;

impl FixupTask for NavFormatTask {
    fn name(&self) -> &str {
        "nav-format"
    }

    fn summary(&self) -> &str {
        NAV_SUMMARY
    }

    fn candidates(&self, transport: &mut dyn ApiTransport) -> Result<Vec<PageRef>> {
        let mut refs = Vec::new();
        let mut failures = Vec::new();
        for search in NAV_SEARCHES {
            let query = ListQuery::new("search", "sroffset")
                .param("list", "search")
                .param("srsearch", *search)
                .param("srnamespace", NS_TEMPLATE.to_string())
                .param("srlimit", "max")
                .param("srprop", "");
            let mut paginator = Paginator::new(&mut *transport, query);
            let hits = paginator.drain_typed::<SearchHit>();
            if let Some(error) = paginator.failure() {
                failures.push(format!("{search}: {error}"));
            }
            info!(search, hits = hits.len(), "template search finished");
            refs.extend(hits.into_iter().map(|hit| match hit.pageid {
                Some(id) => PageRef::with_id(id, hit.title),
                None => PageRef::from_title(hit.title),
            }));
        }
        if refs.is_empty() && !failures.is_empty() {
            bail!("every template search failed: {}", failures.join("; "));
        }
        Ok(refs)
    }

    fn is_excluded(&self, title: &str) -> bool {
        EXCLUDED_TITLE.is_match(title)
    }

    fn transform(&self, content: &str) -> String {
        fix_nav_layout(content)
    }
}
