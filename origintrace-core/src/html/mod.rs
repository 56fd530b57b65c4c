//! Markup handling with character-level source maps.
//!
//! [`parser`] turns assigned markup into DOM nodes, recording for every
//! character it keeps which source character produced it. [`serialize`]
//! renders nodes back to `outerHTML`/`innerHTML` text and carries those
//! origins through every normalization it applies.

pub mod entities;
pub mod parser;
pub mod serialize;

use serde::{Deserialize, Serialize};

use crate::oplog::TrackingRef;

pub use parser::parse_fragment;
pub use serialize::{Rendered, inner_html, outer_html, render_node};

/// A character position inside the result of one log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharOrigin {
    pub entry: TrackingRef,
    pub offset: usize,
}

/// One optional origin per character.
pub type Origins = Vec<Option<CharOrigin>>;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "noscript",
];

const RCDATA_ELEMENTS: &[&str] = &["textarea", "title"];

/// Parents whose text children serialize without escaping.
const UNESCAPED_TEXT_PARENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

/// How the tokenizer treats the content of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentModel {
    Normal,
    /// No markup, no character references.
    RawText,
    /// No markup, character references decoded.
    Rcdata,
}

pub fn content_model(name: &str) -> ContentModel {
    if RAW_TEXT_ELEMENTS.contains(&name) {
        ContentModel::RawText
    } else if RCDATA_ELEMENTS.contains(&name) {
        ContentModel::Rcdata
    } else {
        ContentModel::Normal
    }
}

pub fn escapes_text(parent: &str) -> bool {
    !UNESCAPED_TEXT_PARENTS.contains(&parent)
}
