//! Read-only browser over the workspace's session logs.

use std::path::{Path, PathBuf};

use session_store::{load_history, HistoryIndex, HistoryRecord};
use tab_bus::HistoryRow;

pub const DEFAULT_LIST_LEN: usize = 20;
const SESSION_ID_CHARS: usize = 8;

pub const HISTORY_HELP: &str = "History commands:
  /list [n]       show the newest n records (default 20)
  /show <n>       print record n in full
  /search <text>  records whose text contains <text>
  /refresh        reload the session logs
  /help           this help
Any other text is searched for.";

/// What a browser command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserOutput {
    Line(String),
    Rows(Vec<HistoryRow>),
}

pub struct HistoryBrowser {
    root: PathBuf,
    index: HistoryIndex,
}

impl HistoryBrowser {
    /// Loads the index eagerly; an unreadable session directory leaves the
    /// browser empty rather than failing the tab.
    pub fn open(root: &Path) -> Self {
        let mut browser = Self {
            root: root.to_path_buf(),
            index: HistoryIndex::default(),
        };
        browser.reload();
        browser
    }

    #[must_use]
    pub fn index(&self) -> &HistoryIndex {
        &self.index
    }

    /// Greeting plus the newest records.
    pub fn startup(&self) -> Vec<BrowserOutput> {
        let mut output = vec![self.summary_line()];
        output.extend(self.list(DEFAULT_LIST_LEN));
        output
    }

    pub fn handle_input(&mut self, input: &str) -> Vec<BrowserOutput> {
        let text = input.trim();
        if text.is_empty() {
            return Vec::new();
        }
        let Some(command) = text.strip_prefix('/') else {
            return self.search(text);
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, rest)| (name, rest.trim()));
        match name {
            "list" | "ls" => match parse_count(rest) {
                Some(count) => self.list(count),
                None => vec![BrowserOutput::Line("Usage: /list [n]".to_string())],
            },
            "show" => match rest.parse::<usize>() {
                Ok(number) => self.show(number),
                Err(_) => vec![BrowserOutput::Line("Usage: /show <n>".to_string())],
            },
            "search" | "find" => {
                if rest.is_empty() {
                    vec![BrowserOutput::Line("Usage: /search <text>".to_string())]
                } else {
                    self.search(rest)
                }
            }
            "refresh" => {
                self.reload();
                let mut output = vec![self.summary_line()];
                output.extend(self.list(DEFAULT_LIST_LEN));
                output
            }
            "help" => vec![BrowserOutput::Line(HISTORY_HELP.to_string())],
            other => vec![BrowserOutput::Line(format!(
                "Unknown command: /{other}. Type /help for commands."
            ))],
        }
    }

    fn reload(&mut self) {
        self.index = load_history(&self.root).unwrap_or_else(|error| {
            tracing::warn!(root = %self.root.display(), error = %error, "failed to load history");
            HistoryIndex::default()
        });
    }

    fn summary_line(&self) -> BrowserOutput {
        let mut sessions: Vec<&str> = self
            .index
            .records
            .iter()
            .map(|record| record.session_id.as_str())
            .collect();
        sessions.sort_unstable();
        sessions.dedup();

        let mut line = format!(
            "{} records in {} sessions.",
            self.index.len(),
            sessions.len()
        );
        if !self.index.skipped.is_empty() {
            line.push_str(&format!(" {} unreadable logs skipped.", self.index.skipped.len()));
        }
        BrowserOutput::Line(line)
    }

    fn list(&self, count: usize) -> Vec<BrowserOutput> {
        if self.index.is_empty() {
            return vec![BrowserOutput::Line("No history yet.".to_string())];
        }
        let start = self.index.len().saturating_sub(count);
        let rows = self.index.records[start..]
            .iter()
            .enumerate()
            .map(|(offset, record)| history_row(start + offset, record))
            .collect();
        vec![BrowserOutput::Rows(rows)]
    }

    fn show(&self, number: usize) -> Vec<BrowserOutput> {
        let Some(record) = number
            .checked_sub(1)
            .and_then(|index| self.index.records.get(index))
        else {
            return vec![BrowserOutput::Line(format!("No record {number}."))];
        };

        let body = serde_json::to_string_pretty(&record.item.to_value())
            .unwrap_or_else(|_| record.item.summary());
        let mut output = vec![BrowserOutput::Line(format!(
            "Record {number} from session {} at {}:",
            record.session_id, record.ts
        ))];
        output.extend(body.lines().map(|line| BrowserOutput::Line(line.to_string())));
        output
    }

    fn search(&self, needle: &str) -> Vec<BrowserOutput> {
        let matches = self.index.search(needle);
        if matches.is_empty() {
            return vec![BrowserOutput::Line(format!("No records match {needle:?}."))];
        }
        let rows = matches
            .into_iter()
            .map(|(index, record)| history_row(index, record))
            .collect();
        vec![BrowserOutput::Rows(rows)]
    }
}

fn parse_count(rest: &str) -> Option<usize> {
    if rest.is_empty() {
        return Some(DEFAULT_LIST_LEN);
    }
    rest.parse::<usize>().ok().filter(|count| *count > 0)
}

/// Row numbers are 1-based so they can be passed straight to `/show`.
fn history_row(index: usize, record: &HistoryRecord) -> HistoryRow {
    HistoryRow {
        index: index + 1,
        session: record.session_id.chars().take(SESSION_ID_CHARS).collect(),
        ts: record.ts.clone(),
        kind: record.item.kind().to_string(),
        summary: record.item.summary(),
    }
}

/// One display line per row, as the supervisor prints them.
#[must_use]
pub fn format_row(row: &HistoryRow) -> String {
    format!(
        "{:>4}  {}  {}  {:<11}  {}",
        row.index, row.ts, row.session, row.kind, row.summary
    )
}
