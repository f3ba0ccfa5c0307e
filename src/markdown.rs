//! Markdown rendering for the terminal.
//!
//! [`render_markdown`] is a pure function of the buffer.  It is called on every update, so it
//! must tolerate half-received documents.  GitHub-flavored tables, strikethrough, and task lists
//! are supported, and single newlines inside a paragraph are kept as line breaks.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};

const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_DIM: &str = "\x1b[2m";
const ANSI_ITALIC: &str = "\x1b[3m";
const ANSI_UNDERLINE: &str = "\x1b[4m";
const ANSI_STRIKE: &str = "\x1b[9m";
const ANSI_CYAN: &str = "\x1b[36m";
const ANSI_BLUE: &str = "\x1b[34m";
const ANSI_RESET: &str = "\x1b[0m";

const RULE_WIDTH: usize = 40;

/// Output styling for [`render_markdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MarkdownStyle {
    /// ANSI escape codes for emphasis, headings, and code.
    #[default]
    Ansi,
    /// Plain text with markup removed.
    Plain,
}

/// Render markdown source as terminal text.
pub fn render_markdown(source: &str, style: MarkdownStyle) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut writer = Writer::new(style);
    for event in Parser::new_ext(source, options) {
        writer.event(event);
    }
    writer.finish()
}

/// Blocks and spans that need work when they end.
enum Open {
    Paragraph,
    Heading(HeadingLevel),
    Quote,
    CodeBlock,
    List,
    Item,
    Table,
    TableHead,
    TableRow,
    TableCell,
    Style,
    Link(String),
    Other,
}

struct Writer {
    style: MarkdownStyle,
    out: String,
    stack: Vec<Open>,
    /// Next number for each open ordered list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
    quote_depth: usize,
    line_start: bool,
    /// Text of the heading being written, for the underline in plain mode.
    heading: Option<String>,
    table: Vec<Vec<String>>,
    table_head_rows: usize,
    cell: Option<String>,
}

impl Writer {
    fn new(style: MarkdownStyle) -> Self {
        Self {
            style,
            out: String::new(),
            stack: Vec::new(),
            lists: Vec::new(),
            quote_depth: 0,
            line_start: true,
            heading: None,
            table: Vec::new(),
            table_head_rows: 0,
            cell: None,
        }
    }

    fn ansi(&self) -> bool {
        self.style == MarkdownStyle::Ansi
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(_) => {
                if let Some(open) = self.stack.pop() {
                    self.end(open);
                }
            }
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                if self.ansi() && self.cell.is_none() {
                    self.escape(ANSI_CYAN);
                    self.text(&code);
                    self.escape(ANSI_RESET);
                    self.restyle();
                } else {
                    self.text(&format!("`{code}`"));
                }
            }
            Event::SoftBreak | Event::HardBreak => self.newline(),
            Event::Rule => {
                self.block_gap();
                let rule = if self.ansi() { "\u{2500}" } else { "-" };
                self.text(&rule.repeat(RULE_WIDTH));
                self.newline();
            }
            Event::TaskListMarker(checked) => {
                self.text(if checked { "[x] " } else { "[ ] " });
            }
            Event::Html(html) | Event::InlineHtml(html) => self.text(&html),
            Event::FootnoteReference(label) => self.text(&format!("[^{label}]")),
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        let open = match tag {
            Tag::Paragraph => {
                if !self.in_tight_item() {
                    self.block_gap();
                }
                Open::Paragraph
            }
            Tag::Heading { level, .. } => {
                self.block_gap();
                if self.ansi() {
                    self.escape(ANSI_BOLD);
                    if level == HeadingLevel::H1 {
                        self.escape(ANSI_UNDERLINE);
                    }
                }
                self.heading = Some(String::new());
                Open::Heading(level)
            }
            Tag::BlockQuote(_) => {
                self.block_gap();
                self.quote_depth += 1;
                Open::Quote
            }
            Tag::CodeBlock(kind) => {
                self.block_gap();
                if let CodeBlockKind::Fenced(lang) = &kind {
                    if !lang.is_empty() && !self.ansi() {
                        self.text(&format!("[{lang}]"));
                        self.newline();
                    }
                }
                if self.ansi() {
                    self.escape(ANSI_DIM);
                }
                Open::CodeBlock
            }
            Tag::List(start) => {
                if self.lists.is_empty() {
                    self.block_gap();
                } else if !self.line_start {
                    self.newline();
                }
                self.lists.push(start);
                Open::List
            }
            Tag::Item => {
                if !self.line_start {
                    self.newline();
                }
                let indent = "  ".repeat(self.lists.len().saturating_sub(1));
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => "- ".to_string(),
                };
                self.text(&format!("{indent}{marker}"));
                Open::Item
            }
            Tag::Table(_) => {
                self.block_gap();
                self.table.clear();
                self.table_head_rows = 0;
                Open::Table
            }
            Tag::TableHead => {
                self.table.push(Vec::new());
                Open::TableHead
            }
            Tag::TableRow => {
                self.table.push(Vec::new());
                Open::TableRow
            }
            Tag::TableCell => {
                self.cell = Some(String::new());
                Open::TableCell
            }
            Tag::Emphasis => self.open_style(ANSI_ITALIC),
            Tag::Strong => self.open_style(ANSI_BOLD),
            Tag::Strikethrough => self.open_style(ANSI_STRIKE),
            Tag::Link { dest_url, .. } => {
                if self.ansi() && self.cell.is_none() {
                    self.escape(ANSI_BLUE);
                    self.escape(ANSI_UNDERLINE);
                }
                Open::Link(dest_url.to_string())
            }
            _ => Open::Other,
        };
        self.stack.push(open);
    }

    fn end(&mut self, open: Open) {
        match open {
            Open::Paragraph => {}
            Open::Heading(level) => {
                let heading = self.heading.take().unwrap_or_default();
                if self.ansi() {
                    self.escape(ANSI_RESET);
                } else {
                    let underline = match level {
                        HeadingLevel::H1 => Some('='),
                        HeadingLevel::H2 => Some('-'),
                        _ => None,
                    };
                    if let Some(c) = underline {
                        self.newline();
                        let width = heading.chars().count().max(1);
                        self.text(&c.to_string().repeat(width));
                    }
                }
            }
            Open::Quote => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            Open::CodeBlock => {
                if self.ansi() {
                    self.escape(ANSI_RESET);
                }
                while self.out.ends_with('\n') {
                    self.out.pop();
                }
                self.line_start = false;
            }
            Open::List => {
                self.lists.pop();
            }
            Open::Item => {}
            Open::Table => self.flush_table(),
            Open::TableHead => {
                self.table_head_rows = self.table.len();
            }
            Open::TableRow => {}
            Open::TableCell => {
                let cell = self.cell.take().unwrap_or_default();
                if let Some(row) = self.table.last_mut() {
                    row.push(cell.trim().to_string());
                }
            }
            Open::Style => {
                if self.ansi() && self.cell.is_none() {
                    self.escape(ANSI_RESET);
                    self.restyle();
                }
            }
            Open::Link(url) => {
                if self.ansi() && self.cell.is_none() {
                    self.escape(ANSI_RESET);
                    self.restyle();
                }
                if !url.is_empty() && !self.out.ends_with(&url) {
                    self.text(&format!(" ({url})"));
                }
            }
            Open::Other => {}
        }
    }

    fn open_style(&mut self, code: &'static str) -> Open {
        if self.ansi() && self.cell.is_none() {
            self.escape(code);
        }
        Open::Style
    }

    /// Re-apply styles still open after an inner span reset them.
    fn restyle(&mut self) {
        let heading = self.heading.is_some();
        let in_code = self.stack.iter().any(|o| matches!(o, Open::CodeBlock));
        if heading {
            self.escape(ANSI_BOLD);
        }
        if in_code {
            self.escape(ANSI_DIM);
        }
    }

    fn in_tight_item(&self) -> bool {
        matches!(self.stack.last(), Some(Open::Item))
    }

    /// Separate a new block from whatever came before with one blank line.
    fn block_gap(&mut self) {
        if self.out.is_empty() || self.cell.is_some() {
            return;
        }
        if !self.line_start {
            self.newline();
        }
        if !self.out.ends_with("\n\n") {
            self.newline();
        }
    }

    fn newline(&mut self) {
        if let Some(cell) = self.cell.as_mut() {
            cell.push(' ');
            return;
        }
        if self.line_start {
            let prefix = self.prefix();
            self.out.push_str(prefix.trim_end());
        }
        self.out.push('\n');
        self.line_start = true;
    }

    fn prefix(&self) -> String {
        let mut prefix = "> ".repeat(self.quote_depth);
        if self.stack.iter().any(|o| matches!(o, Open::CodeBlock)) {
            prefix.push_str("    ");
        }
        prefix
    }

    fn escape(&mut self, code: &str) {
        self.out.push_str(code);
    }

    fn text(&mut self, text: &str) {
        if let Some(cell) = self.cell.as_mut() {
            cell.push_str(text);
            return;
        }
        if let Some(heading) = self.heading.as_mut() {
            heading.push_str(text);
        }
        for line in text.split_inclusive('\n') {
            let (body, ends) = match line.strip_suffix('\n') {
                Some(body) => (body, true),
                None => (line, false),
            };
            if !body.is_empty() {
                if self.line_start {
                    let prefix = self.prefix();
                    self.out.push_str(&prefix);
                }
                self.out.push_str(body);
                self.line_start = false;
            }
            if ends {
                self.newline();
            }
        }
    }

    fn flush_table(&mut self) {
        let rows = std::mem::take(&mut self.table);
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        if columns == 0 {
            return;
        }
        let mut widths = vec![0; columns];
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        let separator = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-|-");
        for (i, row) in rows.iter().enumerate() {
            let line = (0..columns)
                .map(|c| {
                    let cell = row.get(c).map(String::as_str).unwrap_or("");
                    let pad = widths[c] - cell.chars().count();
                    format!("{cell}{}", " ".repeat(pad))
                })
                .collect::<Vec<_>>()
                .join(" | ");
            let bold = self.ansi() && i < self.table_head_rows;
            if bold {
                self.escape(ANSI_BOLD);
            }
            self.text(line.trim_end());
            if bold {
                self.escape(ANSI_RESET);
            }
            self.newline();
            if i + 1 == self.table_head_rows {
                self.text(&separator);
                self.newline();
            }
        }
    }

    fn finish(mut self) -> String {
        while self.out.ends_with('\n') {
            self.out.pop();
        }
        self.out
    }
}
