//! Live transcript rendering
//!
//! `document` folds block transitions into replaceable nodes, `markup` turns
//! node text into structured blocks, `highlight` colours code, and `terminal`
//! draws the whole thing to an ANSI terminal.

pub mod document;
pub mod highlight;
pub mod markup;
pub mod terminal;

pub use document::{DocumentNode, DocumentUpdate, NodeState, RenderedDocument, TranscriptRenderer};
pub use highlight::Highlighter;
pub use markup::{Markup, MarkupBlock, Span, SpanStyle};
pub use terminal::TerminalSurface;
