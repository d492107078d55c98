use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::markdown::{Document, Node};
use crate::types::{IssueState, PrState, SubIssue};

// ── Regexes ──────────────────────────────────────────────────────────────

#[allow(clippy::expect_used)]
fn phase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[Phase (\d+)\]").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn manual_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\[manual\]|\(manual\))").expect("valid regex"))
}

#[allow(clippy::expect_used)]
fn main_state_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)CLAUDE_MAIN_STATE.*?sub_issues:\s*\[([0-9,\s]*)\]").expect("valid regex")
    })
}

#[allow(clippy::expect_used)]
fn run_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Run (\d+)$").expect("valid regex"))
}

/// Phase number from a `[Phase N]` title prefix.
pub fn phase_from_title(title: &str) -> Option<u32> {
    phase_re()
        .captures(title)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ── Extractor types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoStats {
    pub total: u32,
    pub completed: u32,
    /// Unchecked items that are not marked `[Manual]` / `*(manual)*`.
    pub unchecked_non_manual: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub checked: bool,
    pub manual: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub time: Option<String>,
    pub iteration: Option<u32>,
    pub phase: Option<u32>,
    pub action: String,
    pub sha: Option<String>,
    /// Run link URL when the cell is a link, otherwise its literal text.
    pub run: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionStats {
    pub total: u32,
    pub answered: u32,
    pub unanswered: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionItem {
    /// Trailing inline-code `id:slug`, when present.
    pub id: Option<String>,
    pub text: String,
    pub answered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNotesEntry {
    pub run_id: String,
    pub run_link: String,
    pub timestamp: String,
    pub notes: Vec<String>,
}

/// A sub-issue's parsed spec, as reconciliation sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingSubIssue {
    pub number: u64,
    pub title: String,
    pub phase: Option<u32>,
    pub description: String,
    pub affected_areas: Vec<String>,
    pub todos: Vec<TodoItem>,
    pub closed: bool,
    pub merged: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyStructure {
    pub has_description: bool,
    pub has_todos: bool,
    pub has_history: bool,
    pub has_agent_notes: bool,
    pub has_questions: bool,
    pub has_affected_areas: bool,
    pub has_requirements: bool,
    pub has_approach: bool,
    pub has_acceptance_criteria: bool,
    pub has_testing: bool,
    pub has_related: bool,
    pub todo_stats: Option<TodoStats>,
    pub question_stats: Option<QuestionStats>,
    pub history_entries: Vec<HistoryEntry>,
    pub agent_notes_entries: Vec<AgentNotesEntry>,
}

// ── Section helpers ──────────────────────────────────────────────────────

fn heading_matches(text: &str, names: &[&str]) -> bool {
    names.iter().any(|n| text.eq_ignore_ascii_case(n))
}

fn find_section(doc: &Document, names: &[&str]) -> Option<usize> {
    doc.find_heading(|t| heading_matches(t, names))
}

fn section_nodes<'a>(doc: &'a Document, names: &[&str]) -> Option<&'a [Node]> {
    let idx = find_section(doc, names)?;
    let range = doc.section_range(idx);
    Some(&doc.children[range])
}

fn first_list(nodes: &[Node]) -> Option<&[Node]> {
    nodes.iter().find_map(|n| match n {
        Node::List { children, .. } => Some(children.as_slice()),
        _ => None,
    })
}

fn first_table(nodes: &[Node]) -> Option<&[Node]> {
    nodes.iter().find_map(|n| match n {
        Node::Table { children } => Some(children.as_slice()),
        _ => None,
    })
}

fn section_text(doc: &Document, names: &[&str]) -> String {
    section_nodes(doc, names)
        .map(|nodes| {
            nodes
                .iter()
                .map(Node::text_content)
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

// ── Extractors ───────────────────────────────────────────────────────────

/// Todo items under the first `Todo` / `Todos` heading.
pub fn todos(doc: &Document) -> Vec<TodoItem> {
    let Some(nodes) = section_nodes(doc, &["Todo", "Todos"]) else {
        return Vec::new();
    };
    let Some(items) = first_list(nodes) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Node::ListItem { checked, .. } => {
                let text = item.text_content().trim().to_string();
                Some(TodoItem {
                    manual: manual_re().is_match(&text),
                    text,
                    checked: checked.unwrap_or(false),
                })
            }
            _ => None,
        })
        .collect()
}

pub fn todo_stats(doc: &Document) -> TodoStats {
    let items = todos(doc);
    let total = items.len() as u32;
    let completed = items.iter().filter(|t| t.checked).count() as u32;
    let unchecked_non_manual = items
        .iter()
        .filter(|t| !t.checked && !t.manual)
        .count() as u32;
    TodoStats {
        total,
        completed,
        unchecked_non_manual,
    }
}

/// Rows of the `Iteration History` table
/// (`Time | # | Phase | Action | SHA | Run`). Literal `-` cells map to None.
pub fn history(doc: &Document) -> Vec<HistoryEntry> {
    let Some(nodes) = section_nodes(doc, &["Iteration History"]) else {
        return Vec::new();
    };
    let Some(rows) = first_table(nodes) else {
        return Vec::new();
    };
    rows.iter()
        .skip(1)
        .filter_map(|row| {
            let Node::TableRow { children: cells } = row else {
                return None;
            };
            let cell = |i: usize| -> Option<String> {
                let text = cells.get(i)?.text_content().trim().to_string();
                if text.is_empty() || text == "-" {
                    None
                } else {
                    Some(text)
                }
            };
            // Run cell: prefer the link URL over its label.
            let run = cells.get(5).and_then(|c| {
                c.children().iter().find_map(|n| match n {
                    Node::Link { url, .. } => Some(url.clone()),
                    _ => None,
                })
            });
            Some(HistoryEntry {
                time: cell(0),
                iteration: cell(1).and_then(|v| v.parse().ok()),
                phase: cell(2).and_then(|v| v.parse().ok()),
                action: cell(3).unwrap_or_default(),
                sha: cell(4),
                run: run.or_else(|| cell(5)),
            })
        })
        .collect()
}

/// Items under the `Questions` heading; per-item IDs come from a trailing
/// inline-code `id:slug`.
pub fn questions(doc: &Document) -> Vec<QuestionItem> {
    let Some(nodes) = section_nodes(doc, &["Questions"]) else {
        return Vec::new();
    };
    let Some(items) = first_list(nodes) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Node::ListItem { checked, children } => {
                let id = find_last_inline_code(children)
                    .and_then(|code| code.strip_prefix("id:").map(str::to_string));
                Some(QuestionItem {
                    id,
                    text: item.text_content().trim().to_string(),
                    answered: checked.unwrap_or(false),
                })
            }
            _ => None,
        })
        .collect()
}

fn find_last_inline_code(children: &[Node]) -> Option<String> {
    let mut found = None;
    for child in children {
        match child {
            Node::InlineCode { value } => found = Some(value.clone()),
            other => {
                if let Some(code) = find_last_inline_code(other.children()) {
                    found = Some(code);
                }
            }
        }
    }
    found
}

pub fn question_stats(doc: &Document) -> QuestionStats {
    let items = questions(doc);
    let total = items.len() as u32;
    let answered = items.iter().filter(|q| q.answered).count() as u32;
    QuestionStats {
        total,
        answered,
        unanswered: total - answered,
    }
}

/// Third-level `### [Run <digits>](<url>) - <timestamp>` headings followed
/// by a bullet list.
pub fn agent_notes(doc: &Document) -> Vec<AgentNotesEntry> {
    let mut entries = Vec::new();
    let children = &doc.children;
    for (i, node) in children.iter().enumerate() {
        let Node::Heading { depth: 3, children: heading } = node else {
            continue;
        };
        let Some((run_id, run_link)) = heading.iter().find_map(|n| match n {
            Node::Link { url, children } => {
                let label: String = children.iter().map(Node::text_content).collect();
                run_heading_re()
                    .captures(label.trim())
                    .and_then(|c| c.get(1))
                    .map(|m| (m.as_str().to_string(), url.clone()))
            }
            _ => None,
        }) else {
            continue;
        };
        let tail: String = heading
            .iter()
            .filter_map(|n| match n {
                Node::Text { value } => Some(value.as_str()),
                _ => None,
            })
            .collect();
        let timestamp = tail.trim_start_matches(|c: char| c == '-' || c.is_whitespace());
        let notes = children
            .get(i + 1)
            .and_then(|n| match n {
                Node::List { children, .. } => Some(
                    children
                        .iter()
                        .map(|item| item.text_content().trim().to_string())
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();
        entries.push(AgentNotesEntry {
            run_id,
            run_link,
            timestamp: timestamp.trim().to_string(),
            notes,
        });
    }
    entries
}

/// Sub-issue numbers from the hidden `CLAUDE_MAIN_STATE` marker on a
/// parent issue body, used when the sub-issue relation has not yet
/// propagated upstream.
pub fn main_state_sub_issues(doc: &Document) -> Option<Vec<u64>> {
    for node in &doc.children {
        let Node::Html { value } = node else { continue };
        if let Some(caps) = main_state_re().captures(value) {
            let list = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            return Some(
                list.split(',')
                    .filter_map(|part| part.trim().parse().ok())
                    .collect(),
            );
        }
    }
    None
}

/// Per-sub-issue specs for reconciliation. Superseded sub-issues are
/// filtered out; CLOSED ones are kept so completed phases stay visible.
pub fn sub_issue_specs(sub_issues: &[SubIssue]) -> Vec<ExistingSubIssue> {
    sub_issues
        .iter()
        .filter(|s| !s.is_superseded())
        .map(|s| ExistingSubIssue {
            number: s.number,
            title: s.title.clone(),
            phase: s.phase(),
            description: section_text(&s.body, &["Description"]),
            affected_areas: section_nodes(&s.body, &["Affected Areas"])
                .and_then(first_list)
                .map(|items| {
                    items
                        .iter()
                        .map(|i| i.text_content().trim().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            todos: todos(&s.body),
            closed: s.state == IssueState::Closed,
            merged: s.state == IssueState::Closed
                && s.pr.as_ref().map(|pr| pr.state) == Some(PrState::Merged),
        })
        .collect()
}

pub fn body_structure(doc: &Document) -> BodyStructure {
    let has = |names: &[&str]| find_section(doc, names).is_some();
    let has_todos = has(&["Todo", "Todos"]);
    let has_questions = has(&["Questions"]);
    BodyStructure {
        has_description: has(&["Description"]),
        has_todos,
        has_history: has(&["Iteration History"]),
        has_agent_notes: has(&["Agent Notes"]),
        has_questions,
        has_affected_areas: has(&["Affected Areas"]),
        has_requirements: has(&["Requirements"]),
        has_approach: has(&["Approach"]),
        has_acceptance_criteria: has(&["Acceptance Criteria"]),
        has_testing: has(&["Testing"]),
        has_related: has(&["Related"]),
        todo_stats: has_todos.then(|| todo_stats(doc)),
        question_stats: has_questions.then(|| question_stats(doc)),
        history_entries: history(doc),
        agent_notes_entries: agent_notes(doc),
    }
}

// ── Mutators ─────────────────────────────────────────────────────────────

const HISTORY_COLUMNS: [&str; 6] = ["Time", "#", "Phase", "Action", "SHA", "Run"];

#[derive(Debug, Clone)]
pub struct NewHistoryRow {
    pub phase: Option<u32>,
    pub action: String,
    pub sha: Option<String>,
    pub run_link: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// When set, a second append with the same key is a no-op.
    pub idempotency_key: Option<String>,
}

fn text_cell(value: &str) -> Node {
    Node::TableCell {
        children: vec![Node::Text {
            value: value.to_string(),
        }],
    }
}

/// Idempotency keys already present in the history table's Run column.
/// A keyed append writes the key as the link label (or as the bare cell
/// text when there is no link), so that is what dedup reads back.
fn history_keys(doc: &Document) -> Vec<String> {
    let Some(rows) = section_nodes(doc, &["Iteration History"]).and_then(first_table) else {
        return Vec::new();
    };
    rows.iter()
        .skip(1)
        .filter_map(|row| {
            let Node::TableRow { children: cells } = row else {
                return None;
            };
            let cell = cells.get(5)?;
            let label = cell
                .children()
                .iter()
                .find_map(|n| match n {
                    Node::Link { children, .. } => {
                        Some(children.iter().map(Node::text_content).collect::<String>())
                    }
                    _ => None,
                })
                .unwrap_or_else(|| cell.text_content());
            let label = label.trim().to_string();
            if label.is_empty() || label == "-" {
                None
            } else {
                Some(label)
            }
        })
        .collect()
}

/// Append a row to the `Iteration History` table, creating the section and
/// header when absent. The iteration number is the count of existing data
/// rows plus one; the time renders as `Mon D HH:MM` UTC; missing cells
/// render as `-`. Returns false when the idempotency key deduplicated the
/// append.
pub fn append_history_row(doc: &mut Document, row: &NewHistoryRow) -> bool {
    if let Some(key) = &row.idempotency_key {
        if history_keys(doc).iter().any(|k| k == key) {
            return false;
        }
    }

    let idx = match find_section(doc, &["Iteration History"]) {
        Some(idx) => idx,
        None => {
            doc.children.push(Node::Heading {
                depth: 2,
                children: vec![Node::Text {
                    value: "Iteration History".into(),
                }],
            });
            doc.children.push(Node::Table {
                children: vec![Node::TableRow {
                    children: HISTORY_COLUMNS.iter().map(|c| text_cell(c)).collect(),
                }],
            });
            doc.children.len() - 2
        }
    };

    let range = doc.section_range(idx);
    let table_idx = doc.children[range.clone()]
        .iter()
        .position(|n| matches!(n, Node::Table { .. }))
        .map(|off| range.start + off);
    let table_idx = match table_idx {
        Some(i) => i,
        None => {
            doc.children.insert(
                range.start,
                Node::Table {
                    children: vec![Node::TableRow {
                        children: HISTORY_COLUMNS.iter().map(|c| text_cell(c)).collect(),
                    }],
                },
            );
            range.start
        }
    };

    if let Node::Table { children } = &mut doc.children[table_idx] {
        let iteration = children.len(); // header row + data rows
        let run_cell = match &row.run_link {
            Some(url) => Node::TableCell {
                children: vec![Node::Link {
                    url: url.clone(),
                    children: vec![Node::Text {
                        value: row
                            .idempotency_key
                            .clone()
                            .unwrap_or_else(|| "Run".into()),
                    }],
                }],
            },
            None => text_cell(
                row.idempotency_key
                    .as_deref()
                    .unwrap_or("-"),
            ),
        };
        children.push(Node::TableRow {
            children: vec![
                text_cell(&row.timestamp.format("%b %-d %H:%M").to_string()),
                text_cell(&iteration.to_string()),
                text_cell(&row.phase.map(|p| p.to_string()).unwrap_or_else(|| "-".into())),
                text_cell(&row.action),
                text_cell(row.sha.as_deref().unwrap_or("-")),
                run_cell,
            ],
        });
    }
    true
}

/// Remove a section entirely, heading included. No-op when absent.
pub fn remove_section(doc: &mut Document, name: &str) {
    if let Some(idx) = find_section(doc, &[name]) {
        let range = doc.section_range(idx);
        doc.children.drain(idx..range.end);
    }
}

/// Replace the content of a section (heading stays), creating the section
/// at the end of the document when absent.
pub fn replace_section(doc: &mut Document, name: &str, depth: u8, nodes: Vec<Node>) {
    match find_section(doc, &[name]) {
        Some(idx) => {
            let range = doc.section_range(idx);
            doc.children.splice(range, nodes);
        }
        None => {
            doc.children.push(Node::Heading {
                depth,
                children: vec![Node::Text { value: name.into() }],
            });
            doc.children.extend(nodes);
        }
    }
}

fn checkbox_list(items: impl Iterator<Item = (bool, String)>) -> Node {
    Node::List {
        ordered: false,
        children: items
            .map(|(checked, text)| Node::ListItem {
                checked: Some(checked),
                children: vec![Node::Text { value: text }],
            })
            .collect(),
    }
}

/// Rewrite the `Todos` section from a todo list; untouched sections are
/// preserved verbatim.
pub fn set_todos(doc: &mut Document, items: &[TodoItem]) {
    let list = checkbox_list(items.iter().map(|t| (t.checked, t.text.clone())));
    let name = if find_section(doc, &["Todo"]).is_some() && find_section(doc, &["Todos"]).is_none()
    {
        "Todo"
    } else {
        "Todos"
    };
    replace_section(doc, name, 2, vec![list]);
}

/// Rewrite the `Questions` section; each item carries its `id:slug` as a
/// trailing inline code span.
pub fn set_questions(doc: &mut Document, items: &[QuestionItem]) {
    let list = Node::List {
        ordered: false,
        children: items
            .iter()
            .map(|q| {
                let mut children = vec![Node::Text {
                    value: format!("{} ", q.text.trim_end()),
                }];
                if let Some(id) = &q.id {
                    children.push(Node::InlineCode {
                        value: format!("id:{id}"),
                    });
                }
                Node::ListItem {
                    checked: Some(q.answered),
                    children,
                }
            })
            .collect(),
    };
    replace_section(doc, "Questions", 2, vec![list]);
}

/// Rewrite the `Affected Areas` section as a plain bullet list.
pub fn set_affected_areas(doc: &mut Document, areas: &[String]) {
    let list = Node::List {
        ordered: false,
        children: areas
            .iter()
            .map(|a| Node::ListItem {
                checked: None,
                children: vec![Node::Text { value: a.clone() }],
            })
            .collect(),
    };
    replace_section(doc, "Affected Areas", 2, vec![list]);
}

/// Append a `### [Run <id>](<link>) - <timestamp>` block with a bullet
/// list under `## Agent Notes`, creating the section when absent.
pub fn append_agent_notes(
    doc: &mut Document,
    run_id: &str,
    run_link: &str,
    timestamp: DateTime<Utc>,
    notes: &[String],
) {
    if find_section(doc, &["Agent Notes"]).is_none() {
        doc.children.push(Node::Heading {
            depth: 2,
            children: vec![Node::Text {
                value: "Agent Notes".into(),
            }],
        });
    }
    let idx = match find_section(doc, &["Agent Notes"]) {
        Some(idx) => idx,
        None => return,
    };
    let range = doc.section_range(idx);
    let heading = Node::Heading {
        depth: 3,
        children: vec![
            Node::Link {
                url: run_link.to_string(),
                children: vec![Node::Text {
                    value: format!("Run {run_id}"),
                }],
            },
            Node::Text {
                value: format!(" - {}", timestamp.format("%Y-%m-%d %H:%M UTC")),
            },
        ],
    };
    let list = Node::List {
        ordered: false,
        children: notes
            .iter()
            .map(|n| Node::ListItem {
                checked: None,
                children: vec![Node::Text { value: n.clone() }],
            })
            .collect(),
    };
    doc.children.splice(range.end..range.end, [heading, list]);
}

/// Write (or rewrite) the hidden machine-state marker on a parent body.
pub fn set_main_state_marker(doc: &mut Document, sub_issues: &[u64]) {
    let list = sub_issues
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let marker = format!("<!-- CLAUDE_MAIN_STATE\nsub_issues: [{list}]\n-->");
    for node in &mut doc.children {
        if let Node::Html { value } = node {
            if value.contains("CLAUDE_MAIN_STATE") {
                *value = marker;
                return;
            }
        }
    }
    doc.children.push(Node::Html { value: marker });
}
