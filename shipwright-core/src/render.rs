//! Human-readable rendering of events.

use std::collections::HashMap;

use colored::{Color, Colorize};

use crate::event::{Event, Record};

const RAINBOW: [Color; 6] = [
    Color::Red,
    Color::Yellow,
    Color::Green,
    Color::Cyan,
    Color::Blue,
    Color::Magenta,
];

/// Render an event as a single line, or `None` when there is nothing to show.
pub fn format_event(event: &Event) -> Option<String> {
    match event {
        Event::BuildMsg { record, .. } | Event::Push { record, .. } => format_record(record),
        Event::Tag {
            old_image,
            repository,
            tag,
        } => Some(format!("Tagging {old_image} to {repository}:{tag}")),
        Event::Alias {
            old_image,
            repository,
            tag,
        } => Some(format!("Fast-aliased {old_image} to {repository}:{tag}")),
    }
}

fn format_record(record: &Record) -> Option<String> {
    match record {
        Record::Stream { stream } => {
            let text = stream.trim_matches('\n');
            if text.trim().is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }
        Record::Status { status, id } => Some(format!(
            "[STATUS] {}: {status}",
            id.as_deref().unwrap_or_default()
        )),
        Record::Error { error_detail, .. } => Some(format!("[ERROR] {}", error_detail.message)),
        Record::Warning { error_detail, .. } => Some(format!("[WARN] {}", error_detail.message)),
    }
}

/// Prefixes image output with the image name, one rainbow colour per image.
#[derive(Debug, Default)]
pub struct Highlighter {
    colors: HashMap<String, Color>,
    enabled: bool,
}

impl Highlighter {
    /// Create a highlighter; with `enabled` false names are left uncoloured.
    pub fn new(enabled: bool) -> Self {
        Self {
            colors: HashMap::new(),
            enabled,
        }
    }

    /// Render an event, prefixing build, push and error output with its image.
    pub fn render(&mut self, event: &Event) -> Option<String> {
        let message = format_event(event)?;
        let prefixed = matches!(event, Event::BuildMsg { .. } | Event::Push { .. }) || event.is_error();
        if !prefixed {
            return Some(message);
        }
        Some(format!("{} | {message}", self.paint(event.image())))
    }

    fn paint(&mut self, name: &str) -> String {
        if !self.enabled {
            return name.to_string();
        }
        let next = self.colors.len() % RAINBOW.len();
        let color = *self
            .colors
            .entry(name.to_string())
            .or_insert(RAINBOW[next]);
        name.color(color).to_string()
    }
}
