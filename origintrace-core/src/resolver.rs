//! Maps a character of rendered markup back to the log entry and source
//! offset that produced it.
//!
//! Offsets index what a node renders to: `outerHTML` for elements and
//! comments, the data for text nodes. Characters the serializer invented
//! fail closed to the nearest annotated character, then to the start tag
//! of the nearest annotated ancestor, and are reported as inexact.

use serde::Serialize;
use tracing::warn;

use crate::dom::{Document, NodeData, NodeId};
use crate::error::{ResolveError, Result};
use crate::html::{CharOrigin, render_node};

/// Where a rendered character came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedOrigin {
    pub origin: CharOrigin,
    /// False when the character itself has no origin and a neighbor's was
    /// used instead.
    pub exact: bool,
}

pub fn resolve_character_origin(
    doc: &Document,
    node: NodeId,
    offset: usize,
) -> Result<ResolvedOrigin> {
    let rendered = render_node(doc, node)?;
    if offset >= rendered.len() {
        return Err(ResolveError::OffsetOutOfRange {
            offset,
            len: rendered.len(),
        }
        .into());
    }

    if let Some(origin) = rendered.origins[offset] {
        return Ok(ResolvedOrigin {
            origin,
            exact: true,
        });
    }

    let nearest = rendered.origins[..offset]
        .iter()
        .rev()
        .chain(rendered.origins[offset + 1..].iter())
        .flatten()
        .next()
        .copied();
    if let Some(origin) = nearest {
        warn!(%node, offset, entry = origin.entry.0, "no origin for character, using nearest");
        return Ok(ResolvedOrigin {
            origin,
            exact: false,
        });
    }

    for ancestor in doc.ancestors(node)? {
        if let NodeData::Element(el) = doc.data(ancestor)? {
            if let Some(origin) = el.origin.first_known() {
                warn!(%node, %ancestor, offset, "no origin in node, using ancestor start tag");
                return Ok(ResolvedOrigin {
                    origin,
                    exact: false,
                });
            }
        }
    }

    Err(ResolveError::NoAnnotation { node }.into())
}
