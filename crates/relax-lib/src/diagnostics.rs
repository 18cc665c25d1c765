//! Builder-pattern printer for unit errors.

use std::fmt::Write;
use std::ops::Range;

use annotate_snippets::{AnnotationKind, Level, Renderer, Snippet};
use relax_core::SourcePos;

use crate::UnitError;

/// Renders unit errors, annotated against source text when available.
///
/// Errors without a known position, or whose position falls outside the
/// source, render as a single `error:` line.
pub struct DiagnosticsPrinter<'d, 's> {
    errors: &'d [UnitError],
    source: Option<&'s str>,
    path: Option<&'s str>,
    colored: bool,
}

impl<'d, 's> DiagnosticsPrinter<'d, 's> {
    pub fn new(errors: &'d [UnitError]) -> Self {
        Self {
            errors,
            source: None,
            path: None,
            colored: false,
        }
    }

    pub fn source(mut self, source: &'s str) -> Self {
        self.source = Some(source);
        self
    }

    pub fn path(mut self, path: &'s str) -> Self {
        self.path = Some(path);
        self
    }

    pub fn colored(mut self, value: bool) -> Self {
        self.colored = value;
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.format(&mut out).expect("String write never fails");
        out
    }

    pub fn format(&self, w: &mut impl Write) -> std::fmt::Result {
        let Some(source) = self.source else {
            return self.format_plain(w);
        };

        let renderer = if self.colored {
            Renderer::styled()
        } else {
            Renderer::plain()
        };

        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                w.write_char('\n')?;
            }
            let message = error.to_string();
            let Some(range) = error.error.pos().and_then(|pos| span(pos, source)) else {
                writeln!(w, "error: {message}")?;
                continue;
            };

            let mut snippet = Snippet::source(source)
                .line_start(1)
                .annotation(AnnotationKind::Primary.span(range));
            if let Some(p) = self.path {
                snippet = snippet.path(p);
            }

            let report = [Level::ERROR.primary_title(&message).element(snippet)];
            write!(w, "{}", renderer.render(&report))?;
        }

        Ok(())
    }

    fn format_plain(&self, w: &mut impl Write) -> std::fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                w.write_char('\n')?;
            }
            write!(w, "{}", error)?;
        }
        Ok(())
    }
}

/// Byte range to annotate: the explicit range, else the whole line.
fn span(pos: SourcePos, source: &str) -> Option<Range<usize>> {
    let (start, end) = (pos.start as usize, pos.end as usize);
    if start < end {
        return (end <= source.len()).then_some(start..end);
    }
    if pos.line == 0 {
        return None;
    }
    line_range(source, pos.line as usize)
}

fn line_range(source: &str, line: usize) -> Option<Range<usize>> {
    let mut offset = 0;
    for (i, text) in source.split('\n').enumerate() {
        if i + 1 == line {
            let text = text.strip_suffix('\r').unwrap_or(text);
            let end = (offset + text.len().max(1)).min(source.len());
            return Some(offset..end);
        }
        offset += text.len() + 1;
    }
    None
}
