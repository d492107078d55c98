use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

/// Canonical issue-body representation. All body reads go through the
/// extractors in [`crate::body`]; all writes go through mutators that edit
/// this tree, so unknown sections survive untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Heading { depth: u8, children: Vec<Node> },
    Paragraph { children: Vec<Node> },
    List { ordered: bool, children: Vec<Node> },
    ListItem { checked: Option<bool>, children: Vec<Node> },
    Text { value: String },
    InlineCode { value: String },
    Link { url: String, children: Vec<Node> },
    Emphasis { children: Vec<Node> },
    Strong { children: Vec<Node> },
    Table { children: Vec<Node> },
    TableRow { children: Vec<Node> },
    TableCell { children: Vec<Node> },
    CodeBlock { lang: String, value: String },
    Html { value: String },
    ThematicBreak,
}

impl Node {
    /// Concatenated plain text of this node and its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text { value } | Node::InlineCode { value } => out.push_str(value),
            Node::Heading { children, .. }
            | Node::Paragraph { children }
            | Node::List { children, .. }
            | Node::ListItem { children, .. }
            | Node::Link { children, .. }
            | Node::Emphasis { children }
            | Node::Strong { children }
            | Node::Table { children }
            | Node::TableRow { children }
            | Node::TableCell { children } => {
                for child in children {
                    child.collect_text(out);
                }
            }
            Node::CodeBlock { .. } | Node::Html { .. } | Node::ThematicBreak => {}
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Heading { children, .. }
            | Node::Paragraph { children }
            | Node::List { children, .. }
            | Node::ListItem { children, .. }
            | Node::Link { children, .. }
            | Node::Emphasis { children }
            | Node::Strong { children }
            | Node::Table { children }
            | Node::TableRow { children }
            | Node::TableCell { children } => children,
            _ => &[],
        }
    }
}

impl Document {
    /// Index of the first heading whose text satisfies `pred`.
    pub fn find_heading<F: Fn(&str) -> bool>(&self, pred: F) -> Option<usize> {
        self.children.iter().position(|n| match n {
            Node::Heading { children, .. } => {
                let text: String = children.iter().map(Node::text_content).collect();
                pred(text.trim())
            }
            _ => false,
        })
    }

    /// The nodes belonging to the section opened by the heading at `idx`:
    /// everything up to the next heading of the same or shallower depth.
    pub fn section_range(&self, idx: usize) -> std::ops::Range<usize> {
        let depth = match self.children.get(idx) {
            Some(Node::Heading { depth, .. }) => *depth,
            _ => return idx..idx,
        };
        let end = self.children[idx + 1..]
            .iter()
            .position(|n| matches!(n, Node::Heading { depth: d, .. } if *d <= depth))
            .map(|off| idx + 1 + off)
            .unwrap_or(self.children.len());
        idx + 1..end
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────

/// Parse markdown into the typed AST. Tables and task-list checkboxes are
/// enabled; anything else pulldown reports that the model has no node for
/// is preserved as raw `Html`.
pub fn parse(text: &str) -> Document {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(text, options);

    // Stack of open containers; finished nodes fall through to the root.
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Vec<Node> = Vec::new();

    fn push_child(stack: &mut Vec<Node>, root: &mut Vec<Node>, node: Node) {
        match stack.last_mut() {
            Some(
                Node::Heading { children, .. }
                | Node::Paragraph { children }
                | Node::List { children, .. }
                | Node::ListItem { children, .. }
                | Node::Link { children, .. }
                | Node::Emphasis { children }
                | Node::Strong { children }
                | Node::Table { children }
                | Node::TableRow { children }
                | Node::TableCell { children },
            ) => children.push(node),
            Some(Node::CodeBlock { value, .. }) => {
                if let Node::Text { value: t } = node {
                    value.push_str(&t);
                }
            }
            _ => root.push(node),
        }
    }

    for event in parser {
        match event {
            Event::Start(tag) => {
                let node = match tag {
                    Tag::Heading { level, .. } => Node::Heading {
                        depth: level as u8,
                        children: Vec::new(),
                    },
                    Tag::Paragraph => Node::Paragraph { children: Vec::new() },
                    Tag::List(start) => Node::List {
                        ordered: start.is_some(),
                        children: Vec::new(),
                    },
                    Tag::Item => Node::ListItem {
                        checked: None,
                        children: Vec::new(),
                    },
                    Tag::Emphasis => Node::Emphasis { children: Vec::new() },
                    Tag::Strong => Node::Strong { children: Vec::new() },
                    Tag::Link { dest_url, .. } => Node::Link {
                        url: dest_url.to_string(),
                        children: Vec::new(),
                    },
                    Tag::Table(_) => Node::Table { children: Vec::new() },
                    Tag::TableHead | Tag::TableRow => Node::TableRow { children: Vec::new() },
                    Tag::TableCell => Node::TableCell { children: Vec::new() },
                    Tag::CodeBlock(kind) => Node::CodeBlock {
                        lang: match kind {
                            CodeBlockKind::Fenced(lang) => lang.to_string(),
                            CodeBlockKind::Indented => String::new(),
                        },
                        value: String::new(),
                    },
                    // Block quotes and anything else unmodeled: open a
                    // paragraph so inline content is not lost.
                    _ => Node::Paragraph { children: Vec::new() },
                };
                stack.push(node);
            }
            Event::End(end) => {
                if let Some(node) = stack.pop() {
                    // Strip the trailing newline pulldown includes in
                    // fenced code bodies so render() does not double it.
                    let node = if matches!(end, TagEnd::CodeBlock) {
                        match node {
                            Node::CodeBlock { lang, value } => Node::CodeBlock {
                                lang,
                                value: value.trim_end_matches('\n').to_string(),
                            },
                            other => other,
                        }
                    } else {
                        node
                    };
                    push_child(&mut stack, &mut root, node);
                }
            }
            Event::Text(t) => push_child(&mut stack, &mut root, Node::Text { value: t.to_string() }),
            Event::Code(t) => push_child(
                &mut stack,
                &mut root,
                Node::InlineCode { value: t.to_string() },
            ),
            Event::Html(t) | Event::InlineHtml(t) => push_child(
                &mut stack,
                &mut root,
                Node::Html {
                    value: t.trim_end_matches('\n').to_string(),
                },
            ),
            Event::SoftBreak | Event::HardBreak => {
                push_child(&mut stack, &mut root, Node::Text { value: "\n".into() })
            }
            Event::Rule => push_child(&mut stack, &mut root, Node::ThematicBreak),
            Event::TaskListMarker(done) => {
                if let Some(Node::ListItem { checked, .. }) = stack.last_mut() {
                    *checked = Some(done);
                }
            }
            _ => {}
        }
    }

    // Html blocks arrive one event per line; stitch adjacent fragments
    // back into one node so markers spanning lines stay matchable.
    let mut merged: Vec<Node> = Vec::new();
    for node in root {
        match (merged.last_mut(), node) {
            (Some(Node::Html { value: prev }), Node::Html { value }) => {
                prev.push('\n');
                prev.push_str(&value);
            }
            (_, node) => merged.push(node),
        }
    }
    Document { children: merged }
}

// ── Rendering ────────────────────────────────────────────────────────────

/// Serialize the AST back to markdown. One render normalizes spacing and
/// list tightness; after that, parse → render → parse is stable.
pub fn render(doc: &Document) -> String {
    let mut out = String::new();
    for node in &doc.children {
        render_block(node, &mut out, 0);
    }
    while out.ends_with('\n') {
        out.pop();
    }
    out.push('\n');
    out
}

fn render_block(node: &Node, out: &mut String, indent: usize) {
    match node {
        Node::Heading { depth, children } => {
            out.push_str(&"#".repeat(*depth as usize));
            out.push(' ');
            render_inline_children(children, out);
            out.push_str("\n\n");
        }
        Node::Paragraph { children } => {
            out.push_str(&" ".repeat(indent));
            render_inline_children(children, out);
            out.push_str("\n\n");
        }
        Node::List { ordered, children } => {
            for (i, item) in children.iter().enumerate() {
                render_list_item(item, *ordered, i, out, indent);
            }
            out.push('\n');
        }
        Node::Table { children } => {
            let mut rows = children.iter();
            if let Some(header) = rows.next() {
                render_table_row(header, out);
                if let Node::TableRow { children: cells } = header {
                    out.push('|');
                    for _ in cells {
                        out.push_str(" --- |");
                    }
                    out.push('\n');
                }
            }
            for row in rows {
                render_table_row(row, out);
            }
            out.push('\n');
        }
        Node::CodeBlock { lang, value } => {
            out.push_str("```");
            out.push_str(lang);
            out.push('\n');
            out.push_str(value);
            out.push_str("\n```\n\n");
        }
        Node::Html { value } => {
            out.push_str(value);
            out.push_str("\n\n");
        }
        Node::ThematicBreak => out.push_str("---\n\n"),
        inline => {
            render_inline(inline, out);
            out.push_str("\n\n");
        }
    }
}

fn render_list_item(item: &Node, ordered: bool, index: usize, out: &mut String, indent: usize) {
    let Node::ListItem { checked, children } = item else {
        return;
    };
    out.push_str(&" ".repeat(indent));
    if ordered {
        out.push_str(&format!("{}. ", index + 1));
    } else {
        out.push_str("- ");
    }
    if let Some(done) = checked {
        out.push_str(if *done { "[x] " } else { "[ ] " });
    }
    let mut first = true;
    for child in children {
        match child {
            Node::List { ordered, children } => {
                if first {
                    out.push('\n');
                }
                for (i, nested) in children.iter().enumerate() {
                    render_list_item(nested, *ordered, i, out, indent + 2);
                }
                first = false;
            }
            Node::Paragraph { children } => {
                if !first {
                    out.push_str(&" ".repeat(indent + 2));
                }
                render_inline_children(children, out);
                out.push('\n');
                first = false;
            }
            other => {
                render_inline(other, out);
                first = false;
            }
        }
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
}

fn render_table_row(row: &Node, out: &mut String) {
    if let Node::TableRow { children } = row {
        out.push('|');
        for cell in children {
            out.push(' ');
            let mut rendered = String::new();
            render_inline(cell, &mut rendered);
            out.push_str(rendered.trim());
            out.push_str(" |");
        }
        out.push('\n');
    }
}

fn render_inline_children(children: &[Node], out: &mut String) {
    for child in children {
        render_inline(child, out);
    }
}

fn render_inline(node: &Node, out: &mut String) {
    match node {
        Node::Text { value } => out.push_str(value),
        Node::InlineCode { value } => {
            out.push('`');
            out.push_str(value);
            out.push('`');
        }
        Node::Emphasis { children } => {
            out.push('*');
            render_inline_children(children, out);
            out.push('*');
        }
        Node::Strong { children } => {
            out.push_str("**");
            render_inline_children(children, out);
            out.push_str("**");
        }
        Node::Link { url, children } => {
            out.push('[');
            render_inline_children(children, out);
            out.push_str("](");
            out.push_str(url);
            out.push(')');
        }
        Node::Html { value } => out.push_str(value),
        Node::TableCell { children } | Node::Paragraph { children } => {
            render_inline_children(children, out)
        }
        other => out.push_str(&other.text_content()),
    }
}
