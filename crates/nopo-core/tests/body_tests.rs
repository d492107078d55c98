use chrono::{TimeZone, Utc};

use nopo_core::body;
use nopo_core::markdown;

const GROOMED_BODY: &str = "\
## Description

Add dark mode across the app.

## Todos

- [x] Add theme context
- [ ] Wire toggle into settings
- [ ] [Manual] Verify contrast on a real device
- [ ] Ship screenshots *(manual)*

## Questions

- [x] Which palette do we standardize on? `id:palette`
- [ ] Do we theme emails too? `id:emails`

## Iteration History

| Time | # | Phase | Action | SHA | Run |
| --- | --- | --- | --- | --- | --- |
| Jan 5 10:00 | 1 | - | Iteration started | abc1234 | [42](https://ci.example/runs/42) |
| Jan 5 11:30 | 2 | - | Retrying after CI failure | def5678 | - |

## Agent Notes

### [Run 42](https://ci.example/runs/42) - 2026-01-05 10:20 UTC

- Theme context landed behind a feature flag
- Settings toggle still pending

<!-- CLAUDE_MAIN_STATE
sub_issues: [101, 102, 103]
-->
";

#[test]
fn todo_stats_counts_manual_markers() {
    let doc = markdown::parse(GROOMED_BODY);
    let stats = body::todo_stats(&doc);
    assert_eq!(stats.total, 4);
    assert_eq!(stats.completed, 1);
    // Two of the three unchecked todos are manual.
    assert_eq!(stats.unchecked_non_manual, 1);
}

#[test]
fn todo_stats_is_zero_without_a_todos_section() {
    let doc = markdown::parse("## Description\n\nJust words.\n");
    assert_eq!(body::todo_stats(&doc), body::TodoStats::default());
}

#[test]
fn history_parses_rows_and_maps_dash_to_none() {
    let doc = markdown::parse(GROOMED_BODY);
    let entries = body::history(&doc);
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0].time.as_deref(), Some("Jan 5 10:00"));
    assert_eq!(entries[0].iteration, Some(1));
    assert_eq!(entries[0].phase, None);
    assert_eq!(entries[0].action, "Iteration started");
    assert_eq!(entries[0].sha.as_deref(), Some("abc1234"));
    assert_eq!(entries[0].run.as_deref(), Some("https://ci.example/runs/42"));

    assert_eq!(entries[1].action, "Retrying after CI failure");
    assert_eq!(entries[1].run, None);
}

#[test]
fn questions_parse_ids_and_answers() {
    let doc = markdown::parse(GROOMED_BODY);
    let questions = body::questions(&doc);
    assert_eq!(questions.len(), 2);
    assert_eq!(questions[0].id.as_deref(), Some("palette"));
    assert!(questions[0].answered);
    assert_eq!(questions[1].id.as_deref(), Some("emails"));
    assert!(!questions[1].answered);

    let stats = body::question_stats(&doc);
    assert_eq!((stats.total, stats.answered, stats.unanswered), (2, 1, 1));
}

#[test]
fn agent_notes_parse_run_heading_and_bullets() {
    let doc = markdown::parse(GROOMED_BODY);
    let notes = body::agent_notes(&doc);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].run_id, "42");
    assert_eq!(notes[0].run_link, "https://ci.example/runs/42");
    assert_eq!(notes[0].timestamp, "2026-01-05 10:20 UTC");
    assert_eq!(notes[0].notes.len(), 2);
    assert_eq!(notes[0].notes[1], "Settings toggle still pending");
}

#[test]
fn main_state_marker_survives_multiline_html() {
    let doc = markdown::parse(GROOMED_BODY);
    assert_eq!(
        body::main_state_sub_issues(&doc),
        Some(vec![101, 102, 103])
    );
}

#[test]
fn body_structure_reports_sections() {
    let doc = markdown::parse(GROOMED_BODY);
    let structure = body::body_structure(&doc);
    assert!(structure.has_description);
    assert!(structure.has_todos);
    assert!(structure.has_history);
    assert!(structure.has_agent_notes);
    assert!(structure.has_questions);
    assert!(!structure.has_affected_areas);
    assert!(!structure.has_approach);
    assert_eq!(structure.history_entries.len(), 2);
    assert_eq!(structure.agent_notes_entries.len(), 1);
}

#[test]
fn append_history_creates_section_and_numbers_rows() {
    let mut doc = markdown::parse("## Description\n\nWords.\n");
    let ts = Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 0).unwrap();

    let appended = body::append_history_row(
        &mut doc,
        &body::NewHistoryRow {
            phase: None,
            action: "Triage started".into(),
            sha: None,
            run_link: None,
            timestamp: ts,
            idempotency_key: None,
        },
    );
    assert!(appended);

    let entries = body::history(&doc);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].time.as_deref(), Some("Mar 7 14:05"));
    assert_eq!(entries[0].iteration, Some(1));
    assert_eq!(entries[0].action, "Triage started");
    assert_eq!(entries[0].sha, None);

    body::append_history_row(
        &mut doc,
        &body::NewHistoryRow {
            phase: Some(2),
            action: "Iteration started".into(),
            sha: Some("cafe123".into()),
            run_link: None,
            timestamp: ts,
            idempotency_key: None,
        },
    );
    let entries = body::history(&doc);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].iteration, Some(2));
    assert_eq!(entries[1].phase, Some(2));
    assert_eq!(entries[1].sha.as_deref(), Some("cafe123"));
}

#[test]
fn append_history_dedupes_only_with_a_key() {
    let mut doc = markdown::parse("# Issue\n");
    let ts = Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 0).unwrap();
    let keyed = body::NewHistoryRow {
        phase: None,
        action: "CI retry".into(),
        sha: None,
        run_link: Some("https://ci.example/runs/77".into()),
        timestamp: ts,
        idempotency_key: Some("77".into()),
    };

    assert!(body::append_history_row(&mut doc, &keyed));
    assert!(!body::append_history_row(&mut doc, &keyed));
    assert_eq!(body::history(&doc).len(), 1);

    // Without a key the same row appends again.
    let unkeyed = body::NewHistoryRow {
        idempotency_key: None,
        ..keyed
    };
    assert!(body::append_history_row(&mut doc, &unkeyed));
    assert_eq!(body::history(&doc).len(), 2);
}

#[test]
fn history_dedup_matches_the_exact_key_only() {
    let mut doc = markdown::parse("# Issue\n");
    let ts = Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 0).unwrap();
    let row = |key: &str| body::NewHistoryRow {
        phase: None,
        action: "CI retry".into(),
        sha: None,
        run_link: Some(format!("https://ci.example/runs/{key}")),
        timestamp: ts,
        idempotency_key: Some(key.into()),
    };

    assert!(body::append_history_row(&mut doc, &row("555")));
    // "55" is a substring of the first row's run URL but a different run.
    assert!(body::append_history_row(&mut doc, &row("55")));
    assert_eq!(body::history(&doc).len(), 2);

    // Each key still dedupes against itself.
    assert!(!body::append_history_row(&mut doc, &row("55")));
    assert!(!body::append_history_row(&mut doc, &row("555")));
    assert_eq!(body::history(&doc).len(), 2);
}

#[test]
fn set_todos_preserves_other_sections() {
    let mut doc = markdown::parse(GROOMED_BODY);
    let todos = vec![
        body::TodoItem {
            text: "New only todo".into(),
            checked: false,
            manual: false,
        },
    ];
    body::set_todos(&mut doc, &todos);

    assert_eq!(body::todo_stats(&doc).total, 1);
    // Unrelated sections survive verbatim.
    assert_eq!(body::history(&doc).len(), 2);
    assert_eq!(body::questions(&doc).len(), 2);
    assert_eq!(
        body::main_state_sub_issues(&doc),
        Some(vec![101, 102, 103])
    );
}

#[test]
fn remove_section_drops_heading_and_content() {
    let mut doc = markdown::parse(GROOMED_BODY);
    body::remove_section(&mut doc, "Iteration History");
    assert!(body::history(&doc).is_empty());
    let structure = body::body_structure(&doc);
    assert!(!structure.has_history);
    assert!(structure.has_todos);
}

#[test]
fn parse_render_parse_is_stable() {
    let doc1 = markdown::parse(GROOMED_BODY);
    let rendered = markdown::render(&doc1);
    let doc2 = markdown::parse(&rendered);
    assert_eq!(doc1, doc2);

    // And a second round-trip changes nothing further.
    let rendered2 = markdown::render(&doc2);
    assert_eq!(rendered, rendered2);
}

#[test]
fn set_main_state_marker_rewrites_in_place() {
    let mut doc = markdown::parse(GROOMED_BODY);
    body::set_main_state_marker(&mut doc, &[201, 202]);
    assert_eq!(body::main_state_sub_issues(&doc), Some(vec![201, 202]));
    // Still exactly one marker.
    let rendered = markdown::render(&doc);
    assert_eq!(rendered.matches("CLAUDE_MAIN_STATE").count(), 1);
}

#[test]
fn phase_from_title_requires_prefix() {
    assert_eq!(body::phase_from_title("[Phase 3] Wire the toggle"), Some(3));
    assert_eq!(body::phase_from_title("Phase 3 is not prefixed"), None);
    assert_eq!(body::phase_from_title("[Phase x] nope"), None);
}
