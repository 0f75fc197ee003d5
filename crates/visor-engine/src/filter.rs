//! Tag & Event Filter (spec §4.G).
//!
//! Decides which checks are eligible for the *initial* schedule given the
//! trigger's event kind and the run's tag filter. Dependencies drawn in by
//! closure are never re-filtered — they run because something eligible
//! required them.

use visor_types::check::CheckSpec;
use visor_types::trigger::{EventKind, TagFilter};

pub fn is_eligible(check: &CheckSpec, event: EventKind, filter: &TagFilter) -> bool {
    let event_matches = check.matches_event(event);
    let include_matches =
        filter.include.is_empty() || check.tags.iter().any(|t| filter.include.contains(t));
    let exclude_matches = check.tags.iter().all(|t| !filter.exclude.contains(t));
    event_matches && include_matches && exclude_matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(on: Vec<EventKind>, tags: Vec<&str>) -> CheckSpec {
        let mut value = json!({ "type": "noop", "on": on, "tags": tags });
        value["tags"] = json!(tags);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn empty_trigger_list_matches_any_event() {
        let check = check(vec![], vec![]);
        assert!(is_eligible(&check, EventKind::PrOpened, &TagFilter::default()));
    }

    #[test]
    fn explicit_trigger_list_must_contain_the_event() {
        let check = check(vec![EventKind::PrOpened], vec![]);
        assert!(is_eligible(&check, EventKind::PrOpened, &TagFilter::default()));
        assert!(!is_eligible(&check, EventKind::IssueOpened, &TagFilter::default()));
    }

    #[test]
    fn include_filter_requires_tag_intersection() {
        let check = check(vec![], vec!["security"]);
        let filter = TagFilter {
            include: vec!["perf".into()],
            exclude: vec![],
        };
        assert!(!is_eligible(&check, EventKind::Manual, &filter));

        let filter = TagFilter {
            include: vec!["security".into()],
            exclude: vec![],
        };
        assert!(is_eligible(&check, EventKind::Manual, &filter));
    }

    #[test]
    fn exclude_filter_rejects_tag_overlap() {
        let check = check(vec![], vec!["slow"]);
        let filter = TagFilter {
            include: vec![],
            exclude: vec!["slow".into()],
        };
        assert!(!is_eligible(&check, EventKind::Manual, &filter));
    }
}
