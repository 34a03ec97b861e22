//! UI utilities for Roomdrop CLI.

use roomdrop_core::file::format_size;
use roomdrop_core::transfer::{ProgressEntry, ProgressStatus};

const BOX_WIDTH: usize = 33;

/// A formatted box for displaying room codes.
pub struct CodeBox<'a> {
    code: &'a str,
    caption: Option<&'a str>,
}

impl<'a> CodeBox<'a> {
    /// Create a new code box.
    #[must_use]
    pub const fn new(code: &'a str) -> Self {
        Self {
            code,
            caption: None,
        }
    }

    /// Add a line under the code.
    #[must_use]
    pub const fn with_caption(mut self, caption: &'a str) -> Self {
        self.caption = Some(caption);
        self
    }

    /// Display the code box to stdout.
    pub fn display(&self) {
        let spaced_code = format_code_spaced(self.code);
        let code_line = format!("Code:  {}", spaced_code);

        println!("  ┌{}┐", "─".repeat(BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));
        println!("  │{}│", center_in_box(&code_line, BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));

        if let Some(caption) = self.caption {
            println!("  │{}│", center_in_box(caption, BOX_WIDTH));
            println!("  │{}│", " ".repeat(BOX_WIDTH));
        }

        println!("  └{}┘", "─".repeat(BOX_WIDTH));
    }
}

fn format_code_spaced(code: &str) -> String {
    code.chars()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn center_in_box(content: &str, width: usize) -> String {
    let content_len = content.chars().count();
    let padding = width.saturating_sub(content_len);
    let left = padding / 2;
    let right = padding - left;
    format!("{}{}{}", " ".repeat(left), content, " ".repeat(right))
}

/// Short tag for a MIME type.
pub fn mime_icon(mime_type: &str) -> &'static str {
    if mime_type.starts_with("image/") {
        "[img]"
    } else if mime_type.starts_with("video/") {
        "[vid]"
    } else if mime_type.starts_with("audio/") {
        "[aud]"
    } else if mime_type.starts_with("text/") {
        "[txt]"
    } else {
        "[file]"
    }
}

/// One progress line, e.g. `  [ 42%] report.pdf  1.2 MB / 2.9 MB`.
pub fn progress_line(entry: &ProgressEntry) -> String {
    match entry.status {
        ProgressStatus::Pending => format!("  [ ...] {}  waiting for sender", entry.name),
        ProgressStatus::Error => format!("  [FAIL] {}", entry.name),
        ProgressStatus::Completed => {
            format!("  [done] {}  {}", entry.name, format_size(entry.total))
        }
        ProgressStatus::Downloading | ProgressStatus::Uploading => format!(
            "  [{:>3}%] {}  {} / {}",
            entry.percent,
            entry.name,
            format_size(entry.received),
            format_size(entry.total)
        ),
    }
}
