use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::page::title_key;
use crate::paginate::{ListQuery, Paginator};
use crate::response::UsagePage;
use crate::transport::ApiTransport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageVerdict {
    pub title: String,
    pub has_global_usage: bool,
    pub has_local_usage: bool,
}

impl UsageVerdict {
    pub fn is_unused(&self) -> bool {
        !self.has_global_usage && !self.has_local_usage
    }
}

#[derive(Debug, Clone, Copy)]
enum UsageProp {
    Global,
    Local,
}

impl UsageProp {
    fn query(self, titles: &str) -> ListQuery {
        match self {
            Self::Global => ListQuery::new("pages", "gucontinue")
                .param("prop", "globalusage")
                .param("gulimit", "max")
                .param("titles", titles),
            Self::Local => ListQuery::new("pages", "fucontinue")
                .param("prop", "fileusage")
                .param("fulimit", "max")
                .param("titles", titles),
        }
    }

    fn has_hits(self, page: &UsagePage) -> bool {
        match self {
            Self::Global => !page.globalusage.is_empty(),
            Self::Local => !page.fileusage.is_empty(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Global => "globalusage",
            Self::Local => "fileusage",
        }
    }
}

/// Keys a probe may call "unused". Everything outside that set counts as used.
struct ProbeOutcome {
    unused: HashSet<String>,
}

/// Global and local usage for a batch of file titles.
///
/// Each probe is paginated to exhaustion before any title is cleared; a title
/// is cleared by a probe only when it appeared in that probe's responses and
/// never with a hit. A failed or partial probe clears nothing.
pub fn probe_usage<T: ApiTransport + ?Sized>(
    transport: &mut T,
    titles: &[String],
) -> Vec<UsageVerdict> {
    if titles.is_empty() {
        return Vec::new();
    }
    let joined = titles.join("|");
    let global = run_probe(transport, UsageProp::Global, &joined);
    let local = run_probe(transport, UsageProp::Local, &joined);

    titles
        .iter()
        .map(|title| {
            let key = title_key(title);
            UsageVerdict {
                title: title.clone(),
                has_global_usage: !global.unused.contains(&key),
                has_local_usage: !local.unused.contains(&key),
            }
        })
        .collect()
}

fn run_probe<T: ApiTransport + ?Sized>(
    transport: &mut T,
    prop: UsageProp,
    titles: &str,
) -> ProbeOutcome {
    let mut seen = HashSet::new();
    let mut used = HashSet::new();
    let mut paginator = Paginator::new(transport, prop.query(titles));
    for page in paginator.drain_typed::<UsagePage>() {
        let key = title_key(&page.title);
        if prop.has_hits(&page) {
            used.insert(key.clone());
        }
        seen.insert(key);
    }

    if !paginator.is_complete() {
        warn!(
            probe = prop.name(),
            pages = paginator.pages_fetched(),
            error = ?paginator.failure(),
            "usage probe incomplete; treating batch as in use"
        );
        return ProbeOutcome {
            unused: HashSet::new(),
        };
    }

    ProbeOutcome {
        unused: seen.difference(&used).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::probe_usage;
    use crate::error::ApiError;
    use crate::testing::{Call, ScriptedTransport};

    fn titles(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    fn usage_pages(field: &str, hits: &[(&str, bool)]) -> Value {
        let pages = hits
            .iter()
            .map(|(title, used)| {
                let usage = if *used {
                    json!([{ "title": "Some page", "wiki": "zh.example.org" }])
                } else {
                    json!([])
                };
                let mut page = json!({ "ns": 6, "title": title });
                page[field] = usage;
                page
            })
            .collect::<Vec<_>>();
        json!({ "query": { "pages": pages } })
    }

    fn with_cursor(mut payload: Value, key: &str, cursor: &str) -> Value {
        let mut container = serde_json::Map::new();
        container.insert(key.to_string(), json!(cursor));
        container.insert("continue".to_string(), json!("||"));
        payload["continue"] = Value::Object(container);
        payload
    }

    fn page_number(call: &Call, key: &str) -> usize {
        match call.get(key) {
            None => 1,
            Some(cursor) => cursor.parse::<usize>().unwrap_or(0),
        }
    }

    #[test]
    fn titles_without_hits_are_unused() {
        let mut transport = ScriptedTransport::new(|call| {
            if call.is("prop", "globalusage") {
                return Ok(usage_pages("globalusage", &[("File:A.png", false), ("File:B.png", false)]));
            }
            Ok(usage_pages("fileusage", &[("File:A.png", false), ("File:B.png", true)]))
        });
        let verdicts = probe_usage(&mut transport, &titles(&["File:A.png", "File:B.png"]));
        assert!(verdicts[0].is_unused());
        assert!(!verdicts[1].is_unused());
        assert!(verdicts[1].has_local_usage);
        assert!(!verdicts[1].has_global_usage);
    }

    #[test]
    fn hit_on_final_continuation_page_is_not_lost() {
        let mut transport = ScriptedTransport::new(|call| {
            if call.is("prop", "globalusage") {
                let page = page_number(call, "gucontinue");
                let hit = page == 3;
                let payload = usage_pages("globalusage", &[("File:A.png", false), ("File:B.png", hit)]);
                return Ok(if page < 3 {
                    with_cursor(payload, "gucontinue", &(page + 1).to_string())
                } else {
                    payload
                });
            }
            Ok(usage_pages("fileusage", &[("File:A.png", false), ("File:B.png", false)]))
        });
        let verdicts = probe_usage(&mut transport, &titles(&["File:A.png", "File:B.png"]));
        assert!(verdicts[0].is_unused());
        assert!(verdicts[1].has_global_usage);
        assert_eq!(transport.calls_where("prop", "globalusage").len(), 3);
    }

    #[test]
    fn local_hit_on_later_page_is_not_lost() {
        let mut transport = ScriptedTransport::new(|call| {
            if call.is("prop", "fileusage") {
                return Ok(match call.get("fucontinue") {
                    None => with_cursor(
                        usage_pages("fileusage", &[("File:A.png", false)]),
                        "fucontinue",
                        "6|A.png|77",
                    ),
                    Some(_) => usage_pages("fileusage", &[("File:A.png", true)]),
                });
            }
            Ok(usage_pages("globalusage", &[("File:A.png", false)]))
        });
        let verdicts = probe_usage(&mut transport, &titles(&["File:A.png"]));
        assert!(verdicts[0].has_local_usage);
    }

    #[test]
    fn failed_probe_defaults_to_used() {
        let mut transport = ScriptedTransport::new(|call| {
            if call.is("prop", "globalusage") {
                return Err(ApiError::Transport("timed out".to_string()));
            }
            Ok(usage_pages("fileusage", &[("File:A.png", false)]))
        });
        let verdicts = probe_usage(&mut transport, &titles(&["File:A.png"]));
        assert!(verdicts[0].has_global_usage);
        assert!(!verdicts[0].has_local_usage);
        assert!(!verdicts[0].is_unused());
    }

    #[test]
    fn failure_after_partial_pages_still_defaults_to_used() {
        let mut transport = ScriptedTransport::new(|call| {
            if call.is("prop", "fileusage") && call.get("fucontinue").is_some() {
                return Err(ApiError::HttpStatus(503));
            }
            if call.is("prop", "fileusage") {
                return Ok(with_cursor(
                    usage_pages("fileusage", &[("File:A.png", false)]),
                    "fucontinue",
                    "next",
                ));
            }
            Ok(usage_pages("globalusage", &[("File:A.png", false)]))
        });
        let verdicts = probe_usage(&mut transport, &titles(&["File:A.png"]));
        assert!(verdicts[0].has_local_usage);
    }

    #[test]
    fn titles_absent_from_responses_count_as_used() {
        let mut transport = ScriptedTransport::new(|call| {
            if call.is("prop", "globalusage") {
                return Ok(usage_pages("globalusage", &[("File:A.png", false)]));
            }
            Ok(usage_pages("fileusage", &[("File:A.png", false)]))
        });
        let verdicts = probe_usage(&mut transport, &titles(&["File:A.png", "File:Ghost.png"]));
        assert!(verdicts[0].is_unused());
        assert!(!verdicts[1].is_unused());
    }
}
