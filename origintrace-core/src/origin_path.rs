//! Backward walk from a character to the literal or file that produced it.
//!
//! Each step is an (entry, offset) pair. The walk follows the entry's offset
//! map into one of its inputs until it reaches a root kind, an untracked
//! leaf, or an entry whose characters can't be attributed. Inputs are always
//! strictly older than the entry that consumes them, so the walk terminates.

use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::dom::NodeId;
use crate::error::{LogError, Result};
use crate::oplog::{OffsetMap, OperationKind, OperationLog, OperationLogEntry, TrackingRef};
use crate::page::Page;
use crate::resolver::resolve_character_origin;

/// One (entry, character offset) pair on an origin path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OriginStep {
    pub entry: TrackingRef,
    pub offset: usize,
}

/// Why a walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Reached a literal or page content.
    Root,
    /// Reached a value that was never tracked.
    Untracked,
    /// The last entry has no character mapping.
    Opaque,
    /// The offset map or input text did not cover the offset.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginPath {
    /// Nearest operation first, root last.
    pub steps: Vec<OriginStep>,
    pub termination: Termination,
    /// The first step came from a neighboring character.
    pub approximate: bool,
}

impl OriginPath {
    pub fn last(&self) -> Option<OriginStep> {
        self.steps.last().copied()
    }
}

/// The entry and offset that a rendered character resolves to directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RootOrigin {
    pub step: OriginStep,
    pub exact: bool,
}

pub fn origin_path(log: &OperationLog, start: OriginStep) -> Result<OriginPath> {
    walk(log, start, false)
}

fn walk(log: &OperationLog, start: OriginStep, approximate: bool) -> Result<OriginPath> {
    let mut steps = vec![start];
    let mut current = start;

    let termination = loop {
        let entry = log.get(current.entry)?;
        if entry.kind.is_root() {
            break Termination::Root;
        }
        if entry.kind == OperationKind::UnknownOperation {
            break Termination::Untracked;
        }
        let Some((position, offset)) = entry.offset_map.resolve(current.offset) else {
            break match entry.offset_map {
                OffsetMap::None => Termination::Opaque,
                _ => Termination::Unresolved,
            };
        };

        let input = entry.input(position)?;
        if input >= current.entry {
            return Err(LogError::ForwardReference {
                entry: current.entry,
                input,
            }
            .into());
        }
        if offset >= log.get(input)?.result.text().chars().count() {
            debug!(entry = %current.entry, %input, offset, "offset beyond input text");
            break Termination::Unresolved;
        }
        current = OriginStep {
            entry: input,
            offset,
        };
        steps.push(current);
    };

    Ok(OriginPath {
        steps,
        termination,
        approximate,
    })
}

/// The DOM entry and source offset behind `offset` in `node`'s rendering.
pub fn get_root_origin_at_char(page: &Page, node: NodeId, offset: usize) -> Result<RootOrigin> {
    let resolved = resolve_character_origin(page.document(), node, offset)?;
    Ok(RootOrigin {
        step: OriginStep {
            entry: resolved.origin.entry,
            offset: resolved.origin.offset,
        },
        exact: resolved.exact,
    })
}

/// Complete origin path starting at a resolved DOM origin.
pub fn where_does_char_come_from(log: &OperationLog, origin: RootOrigin) -> Result<OriginPath> {
    walk(log, origin.step, !origin.exact)
}

/// Display fields of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub index: TrackingRef,
    pub action: String,
    pub value: String,
    pub character_index: usize,
    pub stack: Vec<String>,
    pub input_values: Vec<InputView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputView {
    pub index: TrackingRef,
    pub action: String,
    pub value: String,
}

impl StepView {
    pub fn new(log: &OperationLog, step: OriginStep) -> Result<Self> {
        let entry = log.get(step.entry)?;
        let input_values = entry
            .inputs
            .iter()
            .map(|input| -> Result<InputView> {
                let input = log.get(*input)?;
                Ok(InputView {
                    index: input.index,
                    action: input.kind.action().to_string(),
                    value: input.result.text(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let location = html_file_location(entry, step.offset).or_else(|| {
            entry
                .extra
                .location
                .as_ref()
                .map(|loc| format!("{}:{}:{}", loc.file, loc.line, loc.column))
        });

        Ok(Self {
            index: entry.index,
            action: entry.kind.action().to_string(),
            value: entry.result.text(),
            character_index: step.offset,
            stack: entry.extra.stack.clone(),
            input_values,
            location,
        })
    }

    /// The character this step points at.
    pub fn character(&self) -> Option<char> {
        self.value.chars().nth(self.character_index)
    }
}

pub fn step_views(log: &OperationLog, path: &OriginPath) -> Result<Vec<StepView>> {
    path.steps.iter().map(|step| StepView::new(log, *step)).collect()
}

/// `filename:line:column` of a character of an HTML file. Lines count from
/// one, columns from zero.
pub fn html_file_location(entry: &OperationLogEntry, offset: usize) -> Option<String> {
    if entry.kind != OperationKind::HtmlFileContent {
        return None;
    }
    let file = entry.extra.detail("file")?;
    let before: String = entry.result.text().chars().take(offset).collect();
    let line = before.split('\n').count();
    let column = before
        .rsplit('\n')
        .next()
        .map_or(0, |last| last.chars().count());
    Some(format!("{file}:{line}:{column}"))
}

/// Show `text` around `index` with the character in brackets, keeping at
/// most `preview` characters on each side.
pub fn highlight(text: &str, index: usize, preview: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = index.saturating_sub(preview);
    let end = (index + 1 + preview).min(chars.len());
    let mut out = String::new();
    if start > 0 {
        out.push('…');
    }
    for (i, c) in chars.iter().enumerate().take(end).skip(start) {
        let shown: String = c.escape_debug().collect();
        if i == index {
            let _ = write!(out, "[{shown}]");
        } else {
            out.push_str(&shown);
        }
    }
    if end < chars.len() {
        out.push('…');
    }
    out
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

/// Render a path for a terminal.
pub fn format_origin_path(log: &OperationLog, path: &OriginPath, preview: usize) -> Result<String> {
    let mut out = String::new();
    if path.approximate {
        let _ = writeln!(out, "(unknown) character has no direct origin, showing nearest");
    }
    for view in step_views(log, path)? {
        let _ = writeln!(out, "{} {}", view.index, view.action);
        let _ = writeln!(
            out,
            "    {}",
            highlight(&view.value, view.character_index, preview)
        );
        if let Some(location) = &view.location {
            let _ = writeln!(out, "    at initialHtml ({location})");
        }
        if view.stack.is_empty() {
            let _ = writeln!(out, "    (Empty stack.)");
        } else {
            for frame in &view.stack {
                let _ = writeln!(out, "    at {frame}");
            }
        }
        for input in &view.input_values {
            let _ = writeln!(
                out,
                "    input {} {}: \"{}\"",
                input.index,
                input.action,
                truncate(&input.value, preview)
            );
        }
    }
    match path.termination {
        Termination::Root => {}
        Termination::Untracked => {
            let _ = writeln!(out, "(unknown) value was not tracked");
        }
        Termination::Opaque => {
            let _ = writeln!(out, "(unknown) operation has no character mapping");
        }
        Termination::Unresolved => {
            let _ = writeln!(out, "(unknown) character could not be mapped further");
        }
    }
    Ok(out)
}
