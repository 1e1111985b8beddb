//! Line-oriented terminal output for the active tab.
//!
//! Finished lines scroll normally; the live (still streaming) buffer occupies
//! the last row and is rewritten in place until the next line lands.

use std::io::{self, Write};

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

const FALLBACK_COLUMNS: usize = 80;
const ELLIPSIS: &str = "…";
const TAB_WIDTH: usize = 3;
const CLEAR_ROW: &str = "\r\x1b[2K";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const LIVE_PREFIX: &str = "… ";

pub struct Renderer<W: Write> {
    out: W,
    fixed_width: Option<usize>,
    live_visible: bool,
}

impl Renderer<io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            fixed_width: None,
            live_visible: false,
        }
    }

    /// Pins the width instead of asking the terminal.
    #[must_use]
    pub fn with_width(mut self, width: usize) -> Self {
        self.fixed_width = Some(width.max(1));
        self
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.fixed_width
            .or_else(|| terminal_columns().map(usize::from))
            .unwrap_or(FALLBACK_COLUMNS)
    }

    /// Prints finished text, one row per line, truncated to the width.
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        self.clear_live()?;
        let width = self.width();
        for row in text.split('\n') {
            writeln!(self.out, "{}", truncate_to_width(row, width))?;
        }
        self.out.flush()
    }

    /// Replaces the live row; empty text removes it.
    pub fn live(&mut self, text: &str) -> io::Result<()> {
        self.clear_live()?;
        let tail = text.rsplit('\n').next().unwrap_or_default();
        if !text.is_empty() {
            let width = self.width().saturating_sub(LIVE_PREFIX.width());
            write!(self.out, "{LIVE_PREFIX}{}", truncate_to_width(tail, width))?;
            self.live_visible = true;
        }
        self.out.flush()
    }

    /// Clears the screen and homes the cursor before a tab replay.
    pub fn reset(&mut self) -> io::Result<()> {
        self.live_visible = false;
        write!(self.out, "{CLEAR_SCREEN}")?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn clear_live(&mut self) -> io::Result<()> {
        if self.live_visible {
            write!(self.out, "{CLEAR_ROW}")?;
            self.live_visible = false;
        }
        Ok(())
    }
}

/// Cuts `text` to at most `width` display columns, ending in `…` when cut.
///
/// Control characters are dropped so remote text cannot move the cursor;
/// tabs expand to spaces.
#[must_use]
pub fn truncate_to_width(text: &str, width: usize) -> String {
    let clean: String = text
        .chars()
        .flat_map(|ch| match ch {
            '\t' => vec![' '; TAB_WIDTH],
            ch if ch.is_control() => Vec::new(),
            ch => vec![ch],
        })
        .collect();
    if clean.width() <= width {
        return clean;
    }

    let budget = width.saturating_sub(ELLIPSIS.width());
    let mut used = 0;
    let mut result = String::new();
    for grapheme in clean.graphemes(true) {
        let grapheme_width = grapheme.width();
        if used + grapheme_width > budget {
            break;
        }
        used += grapheme_width;
        result.push_str(grapheme);
    }
    if width > 0 {
        result.push_str(ELLIPSIS);
    }
    result
}

#[cfg(unix)]
fn terminal_columns() -> Option<u16> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let result = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) };
    (result == 0 && size.ws_col > 0).then_some(size.ws_col)
}

#[cfg(not(unix))]
fn terminal_columns() -> Option<u16> {
    None
}
