//! # origintrace Core
//!
//! Character-level provenance engine.
//! Provides the append-only operation log, the operation dispatch layer,
//! the object property provenance table, DOM mutation interception with an
//! HTML origin resolver, and the origin path walker that connects a
//! rendered character to the literal or file it came from.

pub mod config;
pub mod dispatch;
pub mod dom;
pub mod error;
pub mod html;
pub mod inspector;
pub mod log_sink;
pub mod oplog;
pub mod origin_path;
pub mod page;
pub mod persistence;
pub mod property_table;
pub mod resolver;
pub mod value;

// Re-export commonly used types at the crate root.
pub use config::{TraceConfig, config_exists, load_config};
pub use dispatch::{MemberRead, Tracer, Tracked};
pub use dom::{Document, NodeId};
pub use error::{Result, TraceError};
pub use html::CharOrigin;
pub use inspector::{InspectorClient, InspectorQuery, InspectorResponse, PendingResponse, Selection};
pub use log_sink::{JsonLinesSink, LogBatcher, LogSink, MemorySink};
pub use oplog::{
    ExtraArgs, LoggedValue, NewEntry, OffsetMap, OperationKind, OperationLog, OperationLogEntry,
    TrackingRef,
};
pub use origin_path::{
    OriginPath, OriginStep, RootOrigin, StepView, Termination, format_origin_path,
    get_root_origin_at_char, origin_path, where_does_char_come_from,
};
pub use page::Page;
pub use property_table::PropertyTable;
pub use resolver::{ResolvedOrigin, resolve_character_origin};
pub use value::{ObjectKind, ObjectRef, Value};
