//! ANSI terminal surface for the live transcript
//!
//! Settled nodes are printed once and scroll away normally. The tail of the
//! transcript that can still change (the open node, plus the latest code node
//! while its output is streaming, since active-line markers keep moving) is
//! the live region: it is erased and redrawn in place. Redraws caused by
//! appends are coalesced to at most one per `redraw_interval`.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use super::document::{DocumentNode, DocumentUpdate, NodeState};
use super::highlight::Highlighter;
use super::markup::{Markup, MarkupBlock, Span};
use crate::event::Role;
use crate::tracker::BlockKind;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const ITALIC: &str = "\x1b[3m";
const UNDERLINE: &str = "\x1b[4m";
const STRIKE: &str = "\x1b[9m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";

/// Writes document updates to a terminal
pub struct TerminalSurface<W: Write> {
    out: W,
    highlighter: Highlighter,
    redraw_interval: Duration,
    live: Vec<DocumentNode>,
    live_lines: usize,
    last_draw: Option<Instant>,
    dirty: bool,
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W, highlighter: Highlighter, redraw_interval: Duration) -> Self {
        Self {
            out,
            highlighter,
            redraw_interval,
            live: Vec::new(),
            live_lines: 0,
            last_draw: None,
            dirty: false,
        }
    }

    /// Apply updates, redrawing now if a node appeared or froze, or if the
    /// redraw interval has passed
    pub fn apply(&mut self, updates: Vec<DocumentUpdate>) -> io::Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut force = false;
        for update in updates {
            match update {
                DocumentUpdate::Upsert(node) => {
                    match self.live.iter_mut().find(|n| n.id == node.id) {
                        Some(existing) => *existing = node,
                        None => {
                            self.live.push(node);
                            force = true;
                        }
                    }
                }
                DocumentUpdate::Freeze { id } => {
                    if let Some(node) = self.live.iter_mut().find(|n| n.id == id) {
                        node.state = NodeState::Frozen;
                        force = true;
                    }
                }
                DocumentUpdate::ActiveLine { id, line } => {
                    if let Some(node) = self.live.iter_mut().find(|n| n.id == id) {
                        node.active_line = line;
                    }
                }
            }
        }

        let due = self
            .last_draw
            .map(|t| t.elapsed() >= self.redraw_interval)
            .unwrap_or(true);
        if force || due {
            self.redraw(false)
        } else {
            self.dirty = true;
            Ok(())
        }
    }

    /// Draw pending changes that were held back by the redraw interval
    pub fn flush(&mut self) -> io::Result<()> {
        if self.dirty {
            self.redraw(false)?;
        }
        Ok(())
    }

    /// Draw everything and settle it; the next node starts below
    pub fn finish(&mut self) -> io::Result<()> {
        self.redraw(true)
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Number of leading live nodes that can no longer change on screen.
    /// The latest code node stays live while only console output follows it.
    fn settled_prefix(&self) -> usize {
        let mut k = self.live.len();
        while k > 0 && self.live[k - 1].kind == BlockKind::Console {
            k -= 1;
        }
        if k > 0 && self.live[k - 1].kind == BlockKind::Code {
            return k - 1;
        }
        self.live
            .iter()
            .position(|n| n.is_open())
            .unwrap_or(self.live.len())
    }

    fn redraw(&mut self, settle_all: bool) -> io::Result<()> {
        let mut buffer = String::new();
        if self.live_lines > 0 {
            buffer.push_str(&format!("\r\x1b[{}A", self.live_lines));
        }
        buffer.push_str("\x1b[J");

        let keep_from = if settle_all {
            self.live.len()
        } else {
            self.settled_prefix()
        };

        let mut live_lines = 0;
        for (index, node) in self.live.iter().enumerate() {
            for line in render_node(node, &self.highlighter) {
                buffer.push_str(&line);
                buffer.push_str(RESET);
                buffer.push('\n');
                if index >= keep_from {
                    live_lines += 1;
                }
            }
        }

        self.out.write_all(buffer.as_bytes())?;
        self.out.flush()?;

        self.live.drain(..keep_from);
        self.live_lines = live_lines;
        self.last_draw = Some(Instant::now());
        self.dirty = false;
        Ok(())
    }
}

/// Terminal lines for one node, separated from the next node by a blank line
pub fn render_node(node: &DocumentNode, highlighter: &Highlighter) -> Vec<String> {
    let mut lines = match (node.role, node.kind) {
        (Role::User, _) => node
            .content
            .lines()
            .map(|line| format!("{BOLD}{CYAN}> {RESET}{BOLD}{line}"))
            .collect(),
        (_, BlockKind::Message) => render_markup(&node.markup(), highlighter),
        (_, BlockKind::Code) => {
            let format = node.format.as_deref().unwrap_or("text");
            let mut lines = vec![format!("{DIM}┌─ {format}{RESET}")];
            for (index, line) in highlighter
                .highlight_ansi(&node.content, Some(format))
                .into_iter()
                .enumerate()
            {
                let marker = if node.active_line == Some(index + 1) {
                    format!("{YELLOW}▶{RESET}")
                } else {
                    format!("{DIM}│{RESET}")
                };
                lines.push(format!("{marker} {line}"));
            }
            lines.push(format!("{DIM}└─{RESET}"));
            lines
        }
        (_, BlockKind::Console) => {
            let mut lines = vec![format!("{DIM}┌─ output{RESET}")];
            lines.extend(
                node.content
                    .lines()
                    .map(|line| format!("{DIM}│{RESET} {line}")),
            );
            lines.push(format!("{DIM}└─{RESET}"));
            lines
        }
        (_, BlockKind::Confirmation) => {
            vec![format!("{YELLOW}{BOLD}?{RESET} {}", node.content.trim())]
        }
    };

    if node.flagged {
        match lines.first_mut() {
            Some(first) => first.insert_str(0, &format!("{YELLOW}[?]{RESET} ")),
            None => lines.push(format!("{YELLOW}[?]{RESET}")),
        }
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Terminal lines for markup blocks
pub fn render_markup(markup: &Markup, highlighter: &Highlighter) -> Vec<String> {
    let mut lines = Vec::new();
    for (index, block) in markup.blocks.iter().enumerate() {
        let is_list = matches!(block, MarkupBlock::ListItem { .. });
        let after_list = index > 0 && matches!(markup.blocks[index - 1], MarkupBlock::ListItem { .. });
        if index > 0 && !(is_list && after_list) {
            lines.push(String::new());
        }

        match block {
            MarkupBlock::Heading { level, spans } => lines.push(format!(
                "{BOLD}{} {}{RESET}",
                "#".repeat(usize::from(*level)),
                render_spans(spans)
            )),
            MarkupBlock::Paragraph(spans) => {
                lines.extend(render_spans(spans).split('\n').map(str::to_string));
            }
            MarkupBlock::ListItem {
                depth,
                number,
                checked,
                spans,
            } => {
                let bullet = match number {
                    Some(n) => format!("{n}."),
                    None => "•".to_string(),
                };
                let checkbox = match checked {
                    Some(true) => "[x] ",
                    Some(false) => "[ ] ",
                    None => "",
                };
                lines.push(format!(
                    "{}{bullet} {checkbox}{}",
                    "  ".repeat(*depth),
                    render_spans(spans)
                ));
            }
            MarkupBlock::Quote(spans) => {
                for line in render_spans(spans).split('\n') {
                    lines.push(format!("{DIM}│{RESET} {ITALIC}{line}{RESET}"));
                }
            }
            MarkupBlock::Code { language, code } => {
                for line in highlighter.highlight_ansi(code, language.as_deref()) {
                    lines.push(format!("    {line}"));
                }
            }
            MarkupBlock::Table(rows) => {
                for (row_index, row) in rows.iter().enumerate() {
                    let line = row.join(" │ ");
                    if row_index == 0 {
                        lines.push(format!("{BOLD}{line}{RESET}"));
                    } else {
                        lines.push(line);
                    }
                }
            }
            MarkupBlock::Rule => lines.push(format!("{DIM}{}{RESET}", "─".repeat(40))),
            MarkupBlock::Html(html) => lines.extend(html.lines().map(str::to_string)),
        }
    }
    lines
}

fn render_spans(spans: &[Span]) -> String {
    let mut out = String::new();
    for span in spans {
        let mut prefix = String::new();
        if span.style.strong {
            prefix.push_str(BOLD);
        }
        if span.style.emphasis {
            prefix.push_str(ITALIC);
        }
        if span.style.strikethrough {
            prefix.push_str(STRIKE);
        }
        if span.style.code {
            prefix.push_str(CYAN);
        }
        if span.link.is_some() {
            prefix.push_str(UNDERLINE);
        }

        if prefix.is_empty() {
            out.push_str(&span.text);
        } else {
            out.push_str(&prefix);
            out.push_str(&span.text);
            out.push_str(RESET);
        }
        if let Some(url) = &span.link {
            if url != &span.text {
                out.push_str(&format!(" {DIM}({url}){RESET}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::tracker::BlockTracker;
    use crate::transcript::TranscriptRenderer;

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\x1b' && chars.peek() == Some(&'[') {
                chars.next();
                for c in chars.by_ref() {
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn feed(
        renderer: &mut TranscriptRenderer,
        tracker: &mut BlockTracker,
        surface: &mut TerminalSurface<Vec<u8>>,
        event: Event,
    ) {
        for t in tracker.advance(event) {
            renderer.apply(&t);
        }
        surface.apply(renderer.updates()).unwrap();
    }

    fn output(surface: TerminalSurface<Vec<u8>>) -> String {
        String::from_utf8(surface.into_inner()).unwrap()
    }

    #[test]
    fn test_render_user_and_flagged_nodes() {
        let mut renderer = TranscriptRenderer::new();
        renderer.user_message("list files");
        for t in crate::tracker::track_all(vec![Event::unknown("odd output")], "text") {
            renderer.apply(&t);
        }

        let hl = Highlighter::default();
        let nodes = renderer.document().nodes();
        assert_eq!(strip_ansi(&render_node(&nodes[0], &hl)[0]), "> list files");
        assert_eq!(strip_ansi(&render_node(&nodes[1], &hl)[0]), "[?] odd output");
    }

    #[test]
    fn test_render_code_marks_active_line() {
        let mut renderer = TranscriptRenderer::new();
        for t in crate::tracker::track_all(
            vec![
                Event::code_start("python"),
                Event::code("a = 1\nb = 2\n"),
                Event::active_line(Some(2)),
            ],
            "text",
        ) {
            renderer.apply(&t);
        }

        let lines: Vec<String> = render_node(&renderer.document().nodes()[0], &Highlighter::default())
            .iter()
            .map(|l| strip_ansi(l))
            .collect();
        assert_eq!(lines, vec!["┌─ python", "│ a = 1", "▶ b = 2", "└─", ""]);
    }

    #[test]
    fn test_render_markup_lists_and_headings() {
        let markup = crate::transcript::markup::render("# Plan\n\n1. list\n2. count\n");
        let lines: Vec<String> = render_markup(&markup, &Highlighter::default())
            .iter()
            .map(|l| strip_ansi(l))
            .collect();
        assert_eq!(lines, vec!["# Plan", "", "1. list", "2. count"]);
    }

    #[test]
    fn test_appends_are_coalesced_until_flush() {
        let mut renderer = TranscriptRenderer::new();
        let mut tracker = BlockTracker::new("text");
        let mut surface =
            TerminalSurface::new(Vec::new(), Highlighter::default(), Duration::from_secs(3600));

        feed(&mut renderer, &mut tracker, &mut surface, Event::message("Hello"));
        let drawn = surface.out.len();
        feed(&mut renderer, &mut tracker, &mut surface, Event::message(" world"));
        assert_eq!(surface.out.len(), drawn, "append within the interval is held back");

        surface.flush().unwrap();
        let text = strip_ansi(&output(surface));
        assert!(text.ends_with("Hello world\n\n"));
    }

    #[test]
    fn test_live_region_is_redrawn_in_place() {
        let mut renderer = TranscriptRenderer::new();
        let mut tracker = BlockTracker::new("text");
        let mut surface = TerminalSurface::new(Vec::new(), Highlighter::default(), Duration::ZERO);

        feed(&mut renderer, &mut tracker, &mut surface, Event::message("one"));
        feed(&mut renderer, &mut tracker, &mut surface, Event::message(" two"));
        let out = output(surface);
        // The second draw moves back over the two lines of the first.
        assert!(out.contains("\r\x1b[2A\x1b[J"));
    }

    #[test]
    fn test_settled_nodes_are_not_redrawn() {
        let mut renderer = TranscriptRenderer::new();
        let mut tracker = BlockTracker::new("text");
        let mut surface = TerminalSurface::new(Vec::new(), Highlighter::default(), Duration::ZERO);

        feed(&mut renderer, &mut tracker, &mut surface, Event::message("intro"));
        feed(&mut renderer, &mut tracker, &mut surface, Event::confirmation("run it?"));
        feed(&mut renderer, &mut tracker, &mut surface, Event::message("after"));
        surface.finish().unwrap();

        assert!(surface.live.is_empty());
        assert_eq!(surface.live_lines, 0);
        let text = strip_ansi(&output(surface));
        assert_eq!(text.matches("intro").count(), 2);
        assert!(text.contains("? run it?"));
    }

    #[test]
    fn test_code_stays_live_while_output_streams() {
        let mut renderer = TranscriptRenderer::new();
        let mut tracker = BlockTracker::new("text");
        let mut surface = TerminalSurface::new(Vec::new(), Highlighter::default(), Duration::ZERO);

        for event in [
            Event::code_start("python"),
            Event::code("print(1)"),
            Event::code_end(),
            Event::console_start(),
            Event::active_line(Some(1)),
        ] {
            feed(&mut renderer, &mut tracker, &mut surface, event);
        }
        assert_eq!(surface.live.len(), 2);
        assert_eq!(surface.live[0].active_line, Some(1));

        feed(&mut renderer, &mut tracker, &mut surface, Event::message("done"));
        assert_eq!(surface.live.len(), 1);
        assert_eq!(surface.live[0].kind, BlockKind::Message);
    }
}
