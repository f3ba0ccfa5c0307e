//! Output rendering for the idea page.
//!
//! This module provides the [`Renderer`] trait and a terminal implementation.  The renderer
//! receives whole views rather than deltas; each [`View::Content`] is the full buffer, rendered
//! as markdown from scratch.

use std::io::{self, Stdout, Write};

use crate::entitlement::{Account, PricingTier};
use crate::markdown::{MarkdownStyle, render_markdown};
use crate::page::{PRICING_SUBTITLE, PRICING_TITLE, TITLE, TITLE_SUBTITLE};
use crate::stream::View;

const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_DIM: &str = "\x1b[2m";
const ANSI_RESET: &str = "\x1b[0m";
const ANSI_CYAN: &str = "\x1b[36m";
const ANSI_RED: &str = "\x1b[31m";

/// Move the cursor up `n` lines to column 0.
fn cursor_up(n: usize) -> String {
    format!("\x1b[{n}F")
}

/// Clear from the cursor to the end of the screen.
const CLEAR_BELOW: &str = "\x1b[J";

/// Trait for rendering the idea page.
pub trait Renderer: Send {
    /// Show the account affordance.
    fn print_account(&mut self, account: Option<&Account>);

    /// Show the pricing view offered to accounts without the plan.
    fn print_pricing(&mut self, tiers: &[PricingTier]);

    /// Show the generator header, before the first view.
    fn start_generator(&mut self) {}

    /// Show the current view, replacing the previous one.
    fn print_view(&mut self, view: &View);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Called once the stream has settled.
    fn finish(&mut self) {}
}

/// Terminal renderer.
///
/// With color enabled, every view redraws the region below the header in place.  Without color
/// the output is assumed to be piped, so intermediate views are skipped and only the last view
/// is written by [`Renderer::finish`].
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    drawn_lines: usize,
    last_view: Option<View>,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            drawn_lines: 0,
            last_view: None,
        }
    }

    fn markdown_style(&self) -> MarkdownStyle {
        if self.use_color {
            MarkdownStyle::Ansi
        } else {
            MarkdownStyle::Plain
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn write(&mut self, text: &str) {
        let _ = self.stdout.write_all(text.as_bytes());
    }

    fn draw(&mut self, view: &View) {
        let body = format_view(view, self.markdown_style(), self.use_color);
        let mut frame = String::new();
        if self.drawn_lines > 0 {
            frame.push_str(&cursor_up(self.drawn_lines));
            frame.push_str(CLEAR_BELOW);
        }
        frame.push_str(&body);
        frame.push('\n');
        self.drawn_lines = body.lines().count().max(1);
        self.write(&frame);
        self.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_account(&mut self, account: Option<&Account>) {
        let line = format_account(account);
        if self.use_color {
            self.write(&format!("{ANSI_DIM}{line}{ANSI_RESET}\n\n"));
        } else {
            self.write(&format!("{line}\n\n"));
        }
        self.flush();
    }

    fn print_pricing(&mut self, tiers: &[PricingTier]) {
        let header = format_header(PRICING_TITLE, PRICING_SUBTITLE, self.use_color);
        let table = render_markdown(&pricing_markdown(tiers), self.markdown_style());
        self.write(&format!("{header}\n\n{table}\n"));
        self.flush();
    }

    fn start_generator(&mut self) {
        let header = format_header(TITLE, TITLE_SUBTITLE, self.use_color);
        self.write(&format!("{header}\n\n"));
        self.flush();
    }

    fn print_view(&mut self, view: &View) {
        if self.last_view.as_ref() == Some(view) {
            return;
        }
        self.last_view = Some(view.clone());
        if self.use_color {
            self.draw(view);
        }
    }

    fn print_error(&mut self, error: &str) {
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    fn finish(&mut self) {
        if self.use_color {
            return;
        }
        if let Some(view) = self.last_view.take() {
            let body = format_view(&view, MarkdownStyle::Plain, false);
            self.write(&format!("{body}\n"));
            self.flush();
        }
    }
}

/// The account affordance line.
pub fn format_account(account: Option<&Account>) -> String {
    match account {
        Some(Account {
            name,
            email: Some(email),
        }) => format!("Signed in as {name} <{email}>"),
        Some(Account { name, email: None }) => format!("Signed in as {name}"),
        None => "Signed out".to_string(),
    }
}

/// A view as terminal text.
pub fn format_view(view: &View, style: MarkdownStyle, use_color: bool) -> String {
    match (view, view.placeholder()) {
        (View::Content(buffer), _) => render_markdown(buffer, style),
        (View::Loading | View::Refreshing, Some(text)) if use_color => {
            format!("{ANSI_DIM}{text}{ANSI_RESET}")
        }
        (View::AuthenticationRequired | View::ConnectionFailed, Some(text)) if use_color => {
            format!("{ANSI_RED}{text}{ANSI_RESET}")
        }
        (_, Some(text)) => text.to_string(),
        (_, None) => String::new(),
    }
}

/// The pricing tiers as a markdown document.
pub fn pricing_markdown(tiers: &[PricingTier]) -> String {
    let mut doc = String::new();
    for tier in tiers {
        doc.push_str(&format!("## {} ({})\n\n", tier.name, tier.price));
        if !tier.description.is_empty() {
            doc.push_str(&format!("{}\n\n", tier.description));
        }
        for feature in &tier.features {
            doc.push_str(&format!("- {feature}\n"));
        }
        doc.push('\n');
    }
    doc
}

fn format_header(title: &str, subtitle: &str, use_color: bool) -> String {
    if use_color {
        format!("{ANSI_BOLD}{ANSI_CYAN}{title}{ANSI_RESET}\n{ANSI_DIM}{subtitle}{ANSI_RESET}")
    } else {
        format!("{title}\n{subtitle}")
    }
}
