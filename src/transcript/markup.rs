//! Markdown to structured markup
//!
//! `render` is a pure function of its input text: the same text always yields
//! the same blocks, so a node can be re-rendered from scratch after every
//! append without tracking what changed.

use markdown::{mdast, to_mdast, ParseOptions};

/// Inline text with its styling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: SpanStyle,
    /// Target of a link span
    pub link: Option<String>,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanStyle {
    pub strong: bool,
    pub emphasis: bool,
    pub strikethrough: bool,
    pub code: bool,
}

/// One block-level element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupBlock {
    Heading {
        level: u8,
        spans: Vec<Span>,
    },
    Paragraph(Vec<Span>),
    ListItem {
        depth: usize,
        /// Item number for ordered lists
        number: Option<u32>,
        checked: Option<bool>,
        spans: Vec<Span>,
    },
    Quote(Vec<Span>),
    Code {
        language: Option<String>,
        code: String,
    },
    Table(Vec<Vec<String>>),
    Rule,
    Html(String),
}

/// Structured rendering of a markdown text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Markup {
    pub blocks: Vec<MarkupBlock>,
}

impl Markup {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Text content of the markup without styling
    pub fn plain_text(&self) -> String {
        let mut lines = Vec::new();
        for block in &self.blocks {
            match block {
                MarkupBlock::Heading { spans, .. }
                | MarkupBlock::Paragraph(spans)
                | MarkupBlock::ListItem { spans, .. }
                | MarkupBlock::Quote(spans) => lines.push(spans_text(spans)),
                MarkupBlock::Code { code, .. } => lines.push(code.clone()),
                MarkupBlock::Table(rows) => {
                    lines.extend(rows.iter().map(|row| row.join(" | ")));
                }
                MarkupBlock::Rule => {}
                MarkupBlock::Html(html) => lines.push(html.clone()),
            }
        }
        lines.join("\n")
    }
}

fn spans_text(spans: &[Span]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

/// Render markdown text into markup blocks.
///
/// Unclosed constructs (an open code fence, half a table) render as whatever
/// they parse as so far; streaming text re-renders as it grows.
pub fn render(text: &str) -> Markup {
    let mut markup = Markup::default();
    if text.trim().is_empty() {
        return markup;
    }

    let root = match to_mdast(text, &ParseOptions::gfm()) {
        Ok(node) => node,
        Err(_) => mdast::Node::Text(mdast::Text {
            value: text.to_string(),
            position: None,
        }),
    };
    let nodes = match root {
        mdast::Node::Root(root) => root.children,
        other => vec![other],
    };

    for node in &nodes {
        block(node, 0, &mut markup.blocks);
    }
    markup
}

fn block(node: &mdast::Node, depth: usize, out: &mut Vec<MarkupBlock>) {
    match node {
        mdast::Node::Heading(heading) => out.push(MarkupBlock::Heading {
            level: heading.depth,
            spans: inline(&heading.children, SpanStyle::default()),
        }),
        mdast::Node::Paragraph(paragraph) => {
            out.push(MarkupBlock::Paragraph(inline(
                &paragraph.children,
                SpanStyle::default(),
            )));
        }
        mdast::Node::List(list) => {
            let mut number = list.start.unwrap_or(1);
            for child in &list.children {
                if let mdast::Node::ListItem(item) = child {
                    list_item(item, depth, list.ordered.then_some(number), out);
                    number += 1;
                }
            }
        }
        mdast::Node::Blockquote(quote) => {
            for child in &quote.children {
                let mut inner = Vec::new();
                block(child, depth, &mut inner);
                for b in inner {
                    out.push(match b {
                        MarkupBlock::Paragraph(spans) | MarkupBlock::Heading { spans, .. } => {
                            MarkupBlock::Quote(spans)
                        }
                        other => other,
                    });
                }
            }
        }
        mdast::Node::Code(code) => out.push(MarkupBlock::Code {
            language: code.lang.clone(),
            code: code.value.clone(),
        }),
        mdast::Node::Math(math) => out.push(MarkupBlock::Code {
            language: Some("latex".to_string()),
            code: math.value.clone(),
        }),
        mdast::Node::ThematicBreak(_) => out.push(MarkupBlock::Rule),
        mdast::Node::Html(html) => out.push(MarkupBlock::Html(html.value.clone())),
        mdast::Node::Table(table) => {
            let rows = table
                .children
                .iter()
                .filter_map(|row| match row {
                    mdast::Node::TableRow(row) => Some(
                        row.children
                            .iter()
                            .map(|cell| match cell {
                                mdast::Node::TableCell(cell) => {
                                    spans_text(&inline(&cell.children, SpanStyle::default()))
                                }
                                other => spans_text(&inline(
                                    std::slice::from_ref(other),
                                    SpanStyle::default(),
                                )),
                            })
                            .collect(),
                    ),
                    _ => None,
                })
                .collect();
            out.push(MarkupBlock::Table(rows));
        }
        other => {
            let spans = inline(std::slice::from_ref(other), SpanStyle::default());
            if !spans.is_empty() {
                out.push(MarkupBlock::Paragraph(spans));
            }
        }
    }
}

fn list_item(
    item: &mdast::ListItem,
    depth: usize,
    number: Option<u32>,
    out: &mut Vec<MarkupBlock>,
) {
    let mut spans = Vec::new();
    let mut nested = Vec::new();
    for child in &item.children {
        match child {
            mdast::Node::Paragraph(paragraph) => {
                if !spans.is_empty() {
                    spans.push(Span::plain(" "));
                }
                spans.extend(inline(&paragraph.children, SpanStyle::default()));
            }
            mdast::Node::List(_) => block(child, depth + 1, &mut nested),
            other => block(other, depth + 1, &mut nested),
        }
    }
    out.push(MarkupBlock::ListItem {
        depth,
        number,
        checked: item.checked,
        spans,
    });
    out.extend(nested);
}

fn inline(nodes: &[mdast::Node], style: SpanStyle) -> Vec<Span> {
    let mut spans = Vec::new();
    for node in nodes {
        match node {
            mdast::Node::Text(text) => push_span(&mut spans, &text.value, style, None),
            mdast::Node::Strong(strong) => spans.extend(inline(
                &strong.children,
                SpanStyle {
                    strong: true,
                    ..style
                },
            )),
            mdast::Node::Emphasis(emphasis) => spans.extend(inline(
                &emphasis.children,
                SpanStyle {
                    emphasis: true,
                    ..style
                },
            )),
            mdast::Node::Delete(delete) => spans.extend(inline(
                &delete.children,
                SpanStyle {
                    strikethrough: true,
                    ..style
                },
            )),
            mdast::Node::InlineCode(code) => {
                push_span(&mut spans, &code.value, SpanStyle { code: true, ..style }, None)
            }
            mdast::Node::InlineMath(math) => {
                push_span(&mut spans, &math.value, SpanStyle { code: true, ..style }, None)
            }
            mdast::Node::Link(link) => {
                for mut span in inline(&link.children, style) {
                    span.link = Some(link.url.clone());
                    spans.push(span);
                }
            }
            mdast::Node::Image(image) => {
                push_span(&mut spans, &image.alt, style, Some(image.url.clone()))
            }
            mdast::Node::Break(_) => push_span(&mut spans, "\n", style, None),
            mdast::Node::Html(html) => push_span(&mut spans, &html.value, style, None),
            mdast::Node::Paragraph(paragraph) => spans.extend(inline(&paragraph.children, style)),
            _ => {}
        }
    }
    spans
}

/// Append text, merging with the previous span when the styling matches
fn push_span(spans: &mut Vec<Span>, text: &str, style: SpanStyle, link: Option<String>) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = spans.last_mut() {
        if last.style == style && last.link == link {
            last.text.push_str(text);
            return;
        }
    }
    spans.push(Span {
        text: text.to_string(),
        style,
        link,
    });
}
