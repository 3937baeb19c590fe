//! Plain-text rendering of a [`DiffResult`].
//!
//! Deletions are wrapped in `[-...-]` and insertions in `{+...+}`. The unified
//! view interleaves both sides; the split view prints the original and the
//! suggestion one after the other, each marked for its own side only.

use std::fmt::Write as _;

use reviewflow_core::diff::{DiffResult, SegmentKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub split: bool,
    pub line_numbers: bool,
}

/// One output line with the line numbers it starts at on each side.
#[derive(Debug, Default, PartialEq, Eq)]
struct NumberedLine {
    original: usize,
    suggested: usize,
    text: String,
}

fn markers(kind: SegmentKind) -> (&'static str, &'static str) {
    match kind {
        SegmentKind::Equal => ("", ""),
        SegmentKind::Delete => ("[-", "-]"),
        SegmentKind::Insert => ("{+", "+}"),
    }
}

pub fn render(result: &DiffResult, options: RenderOptions) -> String {
    if result.is_identical() {
        return "No changes.\n".to_owned();
    }

    let mut out = String::new();
    if options.split {
        write_side(&mut out, "original", &side_lines(result, SegmentKind::Delete), options);
        out.push('\n');
        write_side(&mut out, "suggested", &side_lines(result, SegmentKind::Insert), options);
    } else {
        for line in unified_lines(result) {
            if options.line_numbers {
                let _ = write!(out, "{:>4} {:>4} | ", line.original, line.suggested);
            }
            out.push_str(&line.text);
            out.push('\n');
        }
    }
    let _ = writeln!(
        out,
        "\n+{} chars, -{} chars",
        result.stats.chars_added, result.stats.chars_removed
    );
    out
}

fn write_side(out: &mut String, title: &str, lines: &[String], options: RenderOptions) {
    let _ = writeln!(out, "--- {title}");
    for (idx, line) in lines.iter().enumerate() {
        if options.line_numbers {
            let _ = write!(out, "{:>4} | ", idx + 1);
        }
        out.push_str(line);
        out.push('\n');
    }
}

/// Splits segment text at newlines, applying `mark` to every non-empty piece.
///
/// `on_newline` is called between pieces, once per `\n` in the text.
fn split_marked(
    text: &str,
    (open, close): (&str, &str),
    current: &mut String,
    mut on_newline: impl FnMut(&mut String),
) {
    let mut pieces = text.split('\n').peekable();
    while let Some(piece) = pieces.next() {
        if !piece.is_empty() {
            current.push_str(open);
            current.push_str(piece);
            current.push_str(close);
        }
        if pieces.peek().is_some() {
            on_newline(current);
        }
    }
}

fn unified_lines(result: &DiffResult) -> Vec<NumberedLine> {
    let mut done: Vec<NumberedLine> = Vec::new();
    let mut line = NumberedLine {
        original: 1,
        suggested: 1,
        text: String::new(),
    };
    for segment in &result.segments {
        let (advance_original, advance_suggested) = match segment.kind {
            SegmentKind::Equal => (1, 1),
            SegmentKind::Delete => (1, 0),
            SegmentKind::Insert => (0, 1),
        };
        let mut text = std::mem::take(&mut line.text);
        split_marked(&segment.text, markers(segment.kind), &mut text, |finished| {
            done.push(NumberedLine {
                original: line.original,
                suggested: line.suggested,
                text: std::mem::take(finished),
            });
            line.original += advance_original;
            line.suggested += advance_suggested;
        });
        line.text = text;
    }
    if !line.text.is_empty() {
        done.push(line);
    }
    done
}

fn side_lines(result: &DiffResult, side: SegmentKind) -> Vec<String> {
    let mut done = Vec::new();
    let mut current = String::new();
    for segment in &result.segments {
        if segment.kind != SegmentKind::Equal && segment.kind != side {
            continue;
        }
        split_marked(&segment.text, markers(segment.kind), &mut current, |finished| {
            done.push(std::mem::take(finished));
        });
    }
    if !current.is_empty() {
        done.push(current);
    }
    done
}
