//! Syntax highlighting for code and console nodes

use once_cell::sync::OnceCell;
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Style, Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::{as_24_bit_terminal_escaped, LinesWithEndings};

/// Theme used when none is configured or the configured one is unknown
pub const DEFAULT_THEME: &str = "base16-ocean.dark";

static SYNTAXES: OnceCell<SyntaxSet> = OnceCell::new();
static THEMES: OnceCell<ThemeSet> = OnceCell::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAXES.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn themes() -> &'static ThemeSet {
    THEMES.get_or_init(ThemeSet::load_defaults)
}

/// Names of the available themes
pub fn theme_names() -> Vec<&'static str> {
    themes().themes.keys().map(String::as_str).collect()
}

/// Resolve a format tag (`python`, `py`, `sh`, `Rust`, ...) to a syntax
fn find_syntax(format: Option<&str>) -> &'static SyntaxReference {
    let ps = syntax_set();
    let Some(lang) = format.map(str::trim).filter(|l| !l.is_empty()) else {
        return ps.find_syntax_plain_text();
    };
    let lower = lang.to_ascii_lowercase();
    let alias = match lower.as_str() {
        "shell" | "bash" | "zsh" => "sh",
        "javascript" | "node" => "js",
        "python3" => "py",
        other => other,
    };

    ps.find_syntax_by_token(alias)
        .or_else(|| ps.find_syntax_by_extension(alias))
        .or_else(|| ps.find_syntax_by_name(lang))
        .or_else(|| {
            ps.syntaxes()
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(lang))
        })
        .unwrap_or_else(|| ps.find_syntax_plain_text())
}

/// A run of text with a single style
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledText {
    pub text: String,
    pub foreground: (u8, u8, u8),
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl StyledText {
    fn from_syntect(style: Style, text: &str) -> Self {
        Self {
            text: text.to_string(),
            foreground: (style.foreground.r, style.foreground.g, style.foreground.b),
            bold: style.font_style.contains(FontStyle::BOLD),
            italic: style.font_style.contains(FontStyle::ITALIC),
            underline: style.font_style.contains(FontStyle::UNDERLINE),
        }
    }
}

/// Highlighter bound to one theme
#[derive(Debug, Clone)]
pub struct Highlighter {
    theme_name: String,
    theme: Theme,
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new(DEFAULT_THEME)
    }
}

impl Highlighter {
    /// Create a highlighter; an unknown theme falls back to the default one
    pub fn new(theme_name: &str) -> Self {
        let set = themes();
        if let Some(theme) = set.themes.get(theme_name) {
            return Self {
                theme_name: theme_name.to_string(),
                theme: theme.clone(),
            };
        }

        tracing::warn!(theme = theme_name, fallback = DEFAULT_THEME, "Unknown highlight theme");
        Self {
            theme_name: DEFAULT_THEME.to_string(),
            theme: set.themes.get(DEFAULT_THEME).cloned().unwrap_or_default(),
        }
    }

    pub fn theme_name(&self) -> &str {
        &self.theme_name
    }

    /// Highlight `code` line by line, without line terminators
    pub fn highlight(&self, code: &str, format: Option<&str>) -> Vec<Vec<StyledText>> {
        let ps = syntax_set();
        let mut highlighter = HighlightLines::new(find_syntax(format), &self.theme);

        LinesWithEndings::from(code)
            .map(|line| {
                let ranges = highlighter
                    .highlight_line(line, ps)
                    .unwrap_or_else(|_| vec![(Style::default(), line)]);
                ranges
                    .into_iter()
                    .filter_map(|(style, text)| {
                        let text = text.trim_end_matches(['\n', '\r']);
                        (!text.is_empty()).then(|| StyledText::from_syntect(style, text))
                    })
                    .collect()
            })
            .collect()
    }

    /// Highlight `code` as 24-bit ANSI terminal lines
    pub fn highlight_ansi(&self, code: &str, format: Option<&str>) -> Vec<String> {
        let ps = syntax_set();
        let mut highlighter = HighlightLines::new(find_syntax(format), &self.theme);

        LinesWithEndings::from(code)
            .map(|line| {
                let line = line.trim_end_matches(['\n', '\r']);
                match highlighter.highlight_line(&format!("{line}\n"), ps) {
                    Ok(ranges) => {
                        let escaped = as_24_bit_terminal_escaped(&ranges[..], false);
                        format!("{}\x1b[0m", escaped.trim_end_matches('\n'))
                    }
                    Err(_) => line.to_string(),
                }
            })
            .collect()
    }
}
