use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::page::{PageRef, PageSnapshot, title_key};
use crate::paginate::cursor_value;
use crate::response::{PageItem, PageQueryPayload, PageQueryResult, parse};
use crate::transport::ApiTransport;

/// Result for one requested ref. `snapshot` is an error only when the server
/// did not account for the ref at all, or flagged its title as invalid.
#[derive(Debug)]
pub struct FetchedPage {
    pub requested: PageRef,
    pub snapshot: Result<PageSnapshot, ApiError>,
}

/// Read current content, revision timestamp and server clock for a batch in
/// one `prop=revisions` call.
///
/// Refs are looked up by page id when every ref carries one, otherwise by
/// title. Callers keep batches within [`crate::batch::MAX_BATCH_SIZE`].
pub fn fetch_snapshots<T: ApiTransport + ?Sized>(
    transport: &mut T,
    refs: &[PageRef],
) -> Result<Vec<FetchedPage>, ApiError> {
    if refs.is_empty() {
        return Ok(Vec::new());
    }
    let by_id = refs.iter().all(|page| page.id.is_some());

    let mut params = vec![
        ("action", "query".to_string()),
        ("prop", "revisions".to_string()),
        ("rvprop", "content|timestamp".to_string()),
        ("rvslots", "main".to_string()),
        ("curtimestamp", "1".to_string()),
    ];
    if by_id {
        let ids = refs
            .iter()
            .filter_map(|page| page.id.map(|id| id.to_string()))
            .collect::<Vec<_>>();
        params.push(("pageids", ids.join("|")));
    } else {
        let titles = refs.iter().map(|page| page.title.as_str()).collect::<Vec<_>>();
        params.push(("titles", titles.join("|")));
    }

    // Large pages can push the response past the server's size limit; the
    // content of later pages then arrives through `continue` follow-ups.
    let mut continuation = Map::new();
    let mut server_timestamp = None;
    let mut payload = PageQueryPayload::default();
    let mut requests = 0;
    loop {
        let mut request: Vec<(&str, String)> = params.clone();
        request.extend(
            continuation
                .iter()
                .map(|(key, value)| (key.as_str(), cursor_value(value))),
        );
        let response = transport.read(&request)?;
        requests += 1;
        let next = response.get("continue").and_then(Value::as_object).cloned();

        let parsed: PageQueryResult = parse(response, "page content")?;
        if server_timestamp.is_none() {
            server_timestamp = parsed.curtimestamp;
        }
        let part = parsed
            .query
            .ok_or_else(|| ApiError::malformed("query missing from page content response"))?;
        payload.pages.extend(part.pages);
        payload.normalized.extend(part.normalized);

        match next {
            None => break,
            Some(next) if next == continuation || requests > refs.len() => {
                warn!(
                    requested = refs.len(),
                    requests,
                    "page content still truncated; remaining pages have no content"
                );
                break;
            }
            Some(next) => {
                debug!(requests, "page content truncated; continuing");
                continuation = next;
            }
        }
    }
    let server_timestamp = server_timestamp
        .ok_or_else(|| ApiError::malformed("curtimestamp missing from page content response"))?;

    let renamed = payload
        .normalized
        .iter()
        .map(|item| (title_key(&item.from), title_key(&item.to)))
        .collect::<HashMap<_, _>>();

    let mut pages_by_id = HashMap::new();
    let mut pages_by_title = HashMap::new();
    for (index, page) in payload.pages.iter().enumerate() {
        if let Some(id) = page.pageid {
            keep_fullest(&mut pages_by_id, id, index, &payload.pages);
        }
        if let Some(title) = &page.title {
            keep_fullest(&mut pages_by_title, title_key(title), index, &payload.pages);
        }
    }

    let fetched = refs
        .iter()
        .map(|requested| {
            let index = if by_id {
                requested.id.and_then(|id| pages_by_id.get(&id))
            } else {
                let key = title_key(&requested.title);
                let key = renamed.get(&key).cloned().unwrap_or(key);
                pages_by_title.get(&key)
            };
            let snapshot = match index {
                Some(index) => snapshot_from_item(requested, &payload.pages[*index], &server_timestamp),
                None => Err(ApiError::UnknownPage(requested.title.clone())),
            };
            FetchedPage {
                requested: requested.clone(),
                snapshot,
            }
        })
        .collect::<Vec<_>>();

    debug!(
        requested = refs.len(),
        returned = payload.pages.len(),
        "fetched page snapshots"
    );
    Ok(fetched)
}

/// A page repeats across follow-up responses; the copy carrying revisions wins.
fn keep_fullest<K: Eq + Hash>(map: &mut HashMap<K, usize>, key: K, index: usize, pages: &[PageItem]) {
    match map.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(index);
        }
        Entry::Occupied(mut slot) => {
            if pages[*slot.get()].revisions.is_empty() && !pages[index].revisions.is_empty() {
                slot.insert(index);
            }
        }
    }
}

fn snapshot_from_item(
    requested: &PageRef,
    item: &PageItem,
    server_timestamp: &str,
) -> Result<PageSnapshot, ApiError> {
    let title = item
        .title
        .clone()
        .unwrap_or_else(|| requested.title.clone());
    if item.invalid {
        return Err(ApiError::UnknownPage(title));
    }
    if item.missing {
        return Ok(PageSnapshot::missing(title, item.pageid.or(requested.id), server_timestamp));
    }

    let revision = item.revisions.first();
    Ok(PageSnapshot {
        title,
        page_id: item.pageid,
        content: revision
            .and_then(|revision| revision.main_content())
            .map(ToString::to_string),
        exists: true,
        revision_timestamp: revision.and_then(|revision| revision.timestamp.clone()),
        server_timestamp: server_timestamp.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use serde_json::json;

    use super::fetch_snapshots;
    use crate::error::ApiError;
    use crate::page::PageRef;
    use crate::testing::ScriptedTransport;

    fn revision(content: &str) -> serde_json::Value {
        json!([{ "timestamp": "2026-03-01T10:00:00Z", "slots": { "main": { "content": content } } }])
    }

    #[test]
    fn classifies_existing_missing_and_unknown_titles() {
        let mut transport = ScriptedTransport::new(|call| {
            assert!(call.is("curtimestamp", "1"));
            assert_eq!(call.list("titles"), vec!["Alpha", "beta", "Gone", "Bad<>"]);
            Ok(json!({
                "curtimestamp": "2026-03-02T00:00:00Z",
                "query": {
                    "normalized": [{ "fromencoded": false, "from": "beta", "to": "Beta" }],
                    "pages": [
                        { "pageid": 1, "ns": 0, "title": "Alpha", "revisions": revision("alpha body") },
                        { "pageid": 2, "ns": 0, "title": "Beta", "revisions": revision("beta body") },
                        { "ns": 0, "title": "Gone", "missing": true }
                    ]
                }
            }))
        });
        let refs = ["Alpha", "beta", "Gone", "Bad<>"].map(PageRef::from_title);
        let fetched = fetch_snapshots(&mut transport, &refs).expect("fetch");
        assert_eq!(fetched.len(), 4);

        let alpha = fetched[0].snapshot.as_ref().expect("alpha");
        assert!(alpha.exists);
        assert_eq!(alpha.content.as_deref(), Some("alpha body"));
        assert_eq!(alpha.revision_timestamp.as_deref(), Some("2026-03-01T10:00:00Z"));
        assert_eq!(alpha.server_timestamp, "2026-03-02T00:00:00Z");

        let beta = fetched[1].snapshot.as_ref().expect("normalized title resolves");
        assert_eq!(beta.title, "Beta");
        assert_eq!(fetched[1].requested.title, "beta");

        let gone = fetched[2].snapshot.as_ref().expect("missing is not an error");
        assert!(!gone.exists);
        assert!(gone.content.is_none());

        assert!(matches!(fetched[3].snapshot, Err(ApiError::UnknownPage(_))));
    }

    #[test]
    fn fetches_by_page_id_when_every_ref_has_one() {
        let mut transport = ScriptedTransport::new(|call| {
            assert_eq!(call.get("pageids"), Some("10|11"));
            assert!(call.get("titles").is_none());
            Ok(json!({
                "curtimestamp": "2026-03-02T00:00:00Z",
                "query": { "pages": [
                    { "pageid": 11, "missing": true },
                    { "pageid": 10, "ns": 10, "title": "Template:Nav", "revisions": revision("x") }
                ]}
            }))
        });
        let refs = [PageRef::with_id(10, "Template:Nav"), PageRef::with_id(11, "Template:Old")];
        let fetched = fetch_snapshots(&mut transport, &refs).expect("fetch");
        assert!(fetched[0].snapshot.as_ref().expect("nav").exists);
        let old = fetched[1].snapshot.as_ref().expect("old");
        assert!(!old.exists);
        assert_eq!(old.title, "Template:Old");
        assert_eq!(old.page_id, Some(11));
    }

    #[test]
    fn hidden_revision_is_existing_without_content() {
        let mut transport = ScriptedTransport::new(|_| {
            Ok(json!({
                "curtimestamp": "2026-03-02T00:00:00Z",
                "query": { "pages": [
                    { "pageid": 5, "ns": 6, "title": "File:Locked.png", "revisions": [
                        { "timestamp": "2026-01-01T00:00:00Z", "slots": { "main": { "texthidden": true } } }
                    ]}
                ]}
            }))
        });
        let fetched =
            fetch_snapshots(&mut transport, &[PageRef::from_title("File:Locked.png")]).expect("fetch");
        let snapshot = fetched[0].snapshot.as_ref().expect("snapshot");
        assert!(snapshot.exists);
        assert!(snapshot.content.is_none());
    }

    #[test]
    fn repeated_fetch_differs_only_in_server_timestamp() {
        let clock = Rc::new(Cell::new(0u32));
        let ticks = Rc::clone(&clock);
        let mut transport = ScriptedTransport::new(move |_| {
            ticks.set(ticks.get() + 1);
            Ok(json!({
                "curtimestamp": format!("2026-03-02T00:00:0{}Z", ticks.get()),
                "query": { "pages": [
                    { "pageid": 1, "ns": 0, "title": "Alpha", "revisions": revision("same") }
                ]}
            }))
        });
        let refs = [PageRef::from_title("Alpha")];
        let first = fetch_snapshots(&mut transport, &refs).expect("first");
        let second = fetch_snapshots(&mut transport, &refs).expect("second");
        let first = first[0].snapshot.as_ref().expect("first snapshot");
        let second = second[0].snapshot.as_ref().expect("second snapshot");
        assert_eq!(first.content, second.content);
        assert_eq!(first.exists, second.exists);
        assert_eq!(first.revision_timestamp, second.revision_timestamp);
        assert_ne!(first.server_timestamp, second.server_timestamp);
        assert_eq!(clock.get(), 2);
    }

    #[test]
    fn missing_curtimestamp_is_malformed() {
        let mut transport = ScriptedTransport::new(|_| Ok(json!({ "query": { "pages": [] } })));
        let error = fetch_snapshots(&mut transport, &[PageRef::from_title("A")])
            .expect_err("must fail");
        assert!(matches!(error, ApiError::MalformedResponse(_)));
    }

    #[test]
    fn truncated_content_is_completed_through_continue() {
        let mut transport = ScriptedTransport::new(|call| {
            assert_eq!(call.list("titles"), vec!["Big", "Small"]);
            Ok(match call.get("rvcontinue") {
                None => json!({
                    "curtimestamp": "2026-03-02T00:00:00Z",
                    "continue": { "rvcontinue": "2|20", "continue": "||" },
                    "query": { "pages": [
                        { "pageid": 1, "ns": 0, "title": "Big", "revisions": revision("big body") },
                        { "pageid": 2, "ns": 0, "title": "Small" }
                    ]}
                }),
                Some("2|20") => json!({
                    "curtimestamp": "2026-03-02T00:00:01Z",
                    "query": { "pages": [
                        { "pageid": 1, "ns": 0, "title": "Big" },
                        { "pageid": 2, "ns": 0, "title": "Small", "revisions": revision("small body") }
                    ]}
                }),
                Some(other) => panic!("unexpected cursor {other}"),
            })
        });
        let refs = ["Big", "Small"].map(PageRef::from_title);
        let fetched = fetch_snapshots(&mut transport, &refs).expect("fetch");
        let contents = fetched
            .iter()
            .map(|page| page.snapshot.as_ref().expect("snapshot").content.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec![Some("big body"), Some("small body")]);
        let small = fetched[1].snapshot.as_ref().expect("small");
        assert_eq!(small.server_timestamp, "2026-03-02T00:00:00Z");
        assert_eq!(transport.calls.len(), 2);
        assert!(transport.calls[1].is("continue", "||"));
    }

    #[test]
    fn repeated_continuation_stops_without_content() {
        let mut transport = ScriptedTransport::new(|_| {
            Ok(json!({
                "curtimestamp": "2026-03-02T00:00:00Z",
                "continue": { "rvcontinue": "1|10", "continue": "||" },
                "query": { "pages": [{ "pageid": 1, "ns": 0, "title": "Stuck" }] }
            }))
        });
        let fetched = fetch_snapshots(&mut transport, &[PageRef::from_title("Stuck")]).expect("fetch");
        let snapshot = fetched[0].snapshot.as_ref().expect("snapshot");
        assert!(snapshot.exists);
        assert!(snapshot.content.is_none());
        assert_eq!(transport.calls.len(), 2);
    }
}
