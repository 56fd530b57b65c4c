//! Append-only operation log.
//!
//! Every tracked operation appends one immutable [`OperationLogEntry`]. An
//! entry may only reference strictly older entries, so the log is a DAG
//! ordered by creation time and every backward walk terminates. Entries can
//! optionally be forwarded to an unbounded channel that a
//! [`LogBatcher`](crate::log_sink::LogBatcher) drains on a fixed interval.

use std::fmt;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{LogError, Result};
use crate::persistence::{self, LogFormat};
use crate::value::{ObjectId, ObjectKind, Value, number_to_string};

/// Index of one log entry. Dense, starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingRef(pub usize);

impl TrackingRef {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TrackingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The closed set of operations the engine knows how to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    StringLiteral,
    NumericLiteral,
    BooleanLiteral,
    NullLiteral,
    UndefinedLiteral,
    ObjectLiteral,
    ArrayLiteral,
    UnknownOperation,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Concatenate,
    LooseEquals,
    LooseNotEquals,
    StrictEquals,
    StrictNotEquals,
    Not,
    TypeOf,
    ToString,
    LogicalAnd,
    LogicalOr,
    MemberAccess,
    AssignProperty,
    ForInKey,
    CreateElement,
    CreateTextNode,
    AssignInnerHtml,
    AssignOuterHtml,
    InsertAdjacentHtml,
    AttributeAssignment,
    AssignTextContent,
    InitialPageHtml,
    HtmlFileContent,
}

impl OperationKind {
    /// Kinds with no further provenance. The walker stops here.
    pub fn is_root(self) -> bool {
        self.is_literal()
            || matches!(
                self,
                OperationKind::InitialPageHtml | OperationKind::HtmlFileContent
            )
    }

    /// Literal kinds consume their raw argument without promoting it.
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            OperationKind::StringLiteral
                | OperationKind::NumericLiteral
                | OperationKind::BooleanLiteral
                | OperationKind::NullLiteral
                | OperationKind::UndefinedLiteral
        )
    }

    /// Human-readable action name shown in origin paths.
    pub fn action(self) -> &'static str {
        match self {
            OperationKind::StringLiteral => "String Literal",
            OperationKind::NumericLiteral => "Numeric Literal",
            OperationKind::BooleanLiteral => "Boolean Literal",
            OperationKind::NullLiteral => "Null Literal",
            OperationKind::UndefinedLiteral => "Undefined Literal",
            OperationKind::ObjectLiteral => "Object Literal",
            OperationKind::ArrayLiteral => "Array Literal",
            OperationKind::UnknownOperation => "Unknown operation",
            OperationKind::Add => "Add",
            OperationKind::Subtract => "Subtract",
            OperationKind::Multiply => "Multiply",
            OperationKind::Divide => "Divide",
            OperationKind::Remainder => "Remainder",
            OperationKind::Concatenate => "Concatenate",
            OperationKind::LooseEquals => "==",
            OperationKind::LooseNotEquals => "!=",
            OperationKind::StrictEquals => "===",
            OperationKind::StrictNotEquals => "!==",
            OperationKind::Not => "Not",
            OperationKind::TypeOf => "typeof",
            OperationKind::ToString => "toString",
            OperationKind::LogicalAnd => "Logical AND",
            OperationKind::LogicalOr => "Logical OR",
            OperationKind::MemberAccess => "Member Access",
            OperationKind::AssignProperty => "Assign Property",
            OperationKind::ForInKey => "For...in Key",
            OperationKind::CreateElement => "createElement",
            OperationKind::CreateTextNode => "createTextNode",
            OperationKind::AssignInnerHtml => "Assign InnerHTML",
            OperationKind::AssignOuterHtml => "Assign OuterHTML",
            OperationKind::InsertAdjacentHtml => "insertAdjacentHTML",
            OperationKind::AttributeAssignment => "setAttribute",
            OperationKind::AssignTextContent => "Assign textContent",
            OperationKind::InitialPageHtml => "Initial Page HTML",
            OperationKind::HtmlFileContent => "HTML File Content",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// Translation from a result character offset to an input character offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OffsetMap {
    /// The result characters cannot be attributed to any input.
    None,
    /// Result offset `i` is offset `i` of input `input`.
    Identity { input: usize },
    /// Result offset `i` is offset `i + shift` of input `input`.
    Shifted { input: usize, shift: usize },
    /// The result is the inputs laid end to end; `lengths[k]` is the
    /// character length contributed by input `k`.
    Segments { lengths: Vec<usize> },
}

impl OffsetMap {
    /// Map a result offset to `(input position, input offset)`.
    pub fn resolve(&self, offset: usize) -> Option<(usize, usize)> {
        match self {
            OffsetMap::None => None,
            OffsetMap::Identity { input } => Some((*input, offset)),
            OffsetMap::Shifted { input, shift } => Some((*input, offset + shift)),
            OffsetMap::Segments { lengths } => {
                let mut start = 0;
                for (position, len) in lengths.iter().enumerate() {
                    if offset < start + len {
                        return Some((position, offset - start));
                    }
                    start += len;
                }
                None
            }
        }
    }
}

/// Serializable snapshot of a produced value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LoggedValue {
    Undefined,
    Null,
    Bool(bool),
    Number(#[serde(with = "js_number")] f64),
    String(String),
    Object {
        id: ObjectId,
        kind: ObjectKind,
        display: String,
    },
}

impl LoggedValue {
    /// The text that character offsets into this value refer to.
    pub fn text(&self) -> String {
        match self {
            LoggedValue::Undefined => "undefined".to_string(),
            LoggedValue::Null => "null".to_string(),
            LoggedValue::Bool(b) => b.to_string(),
            LoggedValue::Number(n) => number_to_string(*n),
            LoggedValue::String(s) => s.clone(),
            LoggedValue::Object { display, .. } => display.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LoggedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Value> for LoggedValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined => LoggedValue::Undefined,
            Value::Null => LoggedValue::Null,
            Value::Bool(b) => LoggedValue::Bool(*b),
            Value::Number(n) => LoggedValue::Number(*n),
            Value::String(s) => LoggedValue::String(s.clone()),
            Value::Object(obj) => LoggedValue::Object {
                id: obj.id(),
                kind: obj.kind(),
                display: value.to_display_string(),
            },
        }
    }
}

/// JSON has no spelling for `NaN` or the infinities; they travel as strings.
mod js_number {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::value::number_to_string;

    pub fn serialize<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if n.is_finite() {
            serializer.serialize_f64(*n)
        } else {
            serializer.serialize_str(&number_to_string(*n))
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "invalid number literal '{other}'"
                ))),
            },
        }
    }
}

/// Source position hint supplied by the instrumentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Operation-specific side metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraArgs {
    /// Captured call-stack frames, innermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Named details such as the accessed property or an insert position.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub details: std::collections::BTreeMap<String, String>,
}

impl ExtraArgs {
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

/// One immutable record of a tracked operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub index: TrackingRef,
    pub kind: OperationKind,
    pub inputs: Vec<TrackingRef>,
    pub result: LoggedValue,
    #[serde(default)]
    pub extra: ExtraArgs,
    pub offset_map: OffsetMap,
    pub recorded_at: DateTime<Utc>,
}

impl OperationLogEntry {
    /// Input reference at `position`.
    pub fn input(&self, position: usize) -> Result<TrackingRef> {
        self.inputs.get(position).copied().ok_or_else(|| {
            LogError::MissingInput {
                entry: self.index,
                position,
            }
            .into()
        })
    }
}

/// An entry before the log assigns its index.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: OperationKind,
    pub inputs: Vec<TrackingRef>,
    pub result: LoggedValue,
    pub extra: ExtraArgs,
    pub offset_map: OffsetMap,
}

impl NewEntry {
    pub fn new(kind: OperationKind, result: &Value) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            result: LoggedValue::from(result),
            extra: ExtraArgs::default(),
            offset_map: OffsetMap::None,
        }
    }

    pub fn inputs(mut self, inputs: Vec<TrackingRef>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn extra(mut self, extra: ExtraArgs) -> Self {
        self.extra = extra;
        self
    }

    pub fn offset_map(mut self, offset_map: OffsetMap) -> Self {
        self.offset_map = offset_map;
        self
    }
}

/// The append-only store.
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: Vec<OperationLogEntry>,
    sink: Option<mpsc::UnboundedSender<OperationLogEntry>>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that forwards every appended entry to `sink`.
    pub fn with_sink(sink: mpsc::UnboundedSender<OperationLogEntry>) -> Self {
        Self {
            entries: Vec::new(),
            sink: Some(sink),
        }
    }

    /// Append an entry and return its index.
    pub fn append(&mut self, entry: NewEntry) -> Result<TrackingRef> {
        let index = TrackingRef(self.entries.len());
        if let Some(input) = entry.inputs.iter().find(|input| **input >= index) {
            return Err(LogError::ForwardReference {
                entry: index,
                input: *input,
            }
            .into());
        }

        let entry = OperationLogEntry {
            index,
            kind: entry.kind,
            inputs: entry.inputs,
            result: entry.result,
            extra: entry.extra,
            offset_map: entry.offset_map,
            recorded_at: Utc::now(),
        };
        trace!(index = index.0, kind = %entry.kind, "appended log entry");

        if let Some(sink) = &self.sink {
            if sink.send(entry.clone()).is_err() {
                debug!("log sink closed, persistence disabled");
                self.sink = None;
            }
        }
        self.entries.push(entry);
        Ok(index)
    }

    pub fn get(&self, index: TrackingRef) -> Result<&OperationLogEntry> {
        self.entries
            .get(index.0)
            .ok_or_else(|| LogError::UnknownEntry { index }.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[OperationLogEntry] {
        &self.entries
    }

    /// Rebuild a log from persisted entries, checking density and ordering.
    pub fn from_entries(entries: Vec<OperationLogEntry>) -> Result<Self> {
        for (expected, entry) in entries.iter().enumerate() {
            if entry.index.0 != expected {
                return Err(LogError::NonDenseIndex {
                    expected,
                    found: entry.index.0,
                }
                .into());
            }
            if let Some(input) = entry.inputs.iter().find(|input| **input >= entry.index) {
                return Err(LogError::ForwardReference {
                    entry: entry.index,
                    input: *input,
                }
                .into());
            }
        }
        Ok(Self {
            entries,
            sink: None,
        })
    }

    /// Persist the whole log as a single JSON document.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        persistence::write_snapshot(path, &self.entries)?;
        Ok(())
    }

    /// Load a log saved with [`save_snapshot`](Self::save_snapshot).
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load_snapshot(path: &Path) -> Result<Option<Self>> {
        match persistence::read_snapshot::<Vec<OperationLogEntry>>(path)? {
            Some(entries) => Ok(Some(Self::from_entries(entries)?)),
            None => Ok(None),
        }
    }

    /// Load a log file in whichever format it was written.
    pub fn open(path: &Path) -> Result<Self> {
        match LogFormat::detect(path)? {
            LogFormat::Snapshot => Self::load_snapshot(path)?.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no log snapshot at {}", path.display()),
                )
                .into()
            }),
            LogFormat::JsonLines => Self::load_jsonl(path),
        }
    }

    /// Load a JSON-lines log written by a
    /// [`JsonLinesSink`](crate::log_sink::JsonLinesSink).
    pub fn load_jsonl(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for (line_no, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: OperationLogEntry =
                serde_json::from_str(line).map_err(|e| LogError::MalformedLine {
                    line: line_no + 1,
                    message: e.to_string(),
                })?;
            entries.push(entry);
        }
        Self::from_entries(entries)
    }
}
