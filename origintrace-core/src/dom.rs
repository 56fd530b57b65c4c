//! Owned DOM with node-scoped origin annotations.
//!
//! Nodes live in an arena addressed by [`NodeId`]. Removing a node only
//! detaches it; its data stays addressable so a stale id still resolves.
//! Every node carries the annotation written by the mutation that created
//! it, one optional [`CharOrigin`] per character it serializes to.

use std::fmt;

use serde::Serialize;

use crate::error::{DomError, Result};
use crate::html::{CharOrigin, Origins};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Origins of the markup that delimits an element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementOrigin {
    pub open_bracket: Option<CharOrigin>,
    /// One entry per character of the tag name.
    pub name: Origins,
    /// The `>` closing the start tag.
    pub open_end: Option<CharOrigin>,
    /// One entry per character of `</name>` when the end tag has a known
    /// origin, empty when it is synthesized.
    pub close: Origins,
}

impl ElementOrigin {
    /// Every tag character maps to `entry` at the same offset into `name`.
    pub fn from_tag_name(name: &str, entry: crate::oplog::TrackingRef) -> Self {
        let name_origins: Origins = (0..name.chars().count())
            .map(|offset| Some(CharOrigin { entry, offset }))
            .collect();
        let mut close = vec![None, None];
        close.extend(name_origins.iter().copied());
        close.push(None);
        Self {
            open_bracket: None,
            name: name_origins,
            open_end: None,
            close,
        }
    }

    /// The first known origin of the start tag.
    pub fn first_known(&self) -> Option<CharOrigin> {
        self.open_bracket
            .or_else(|| self.name.iter().flatten().next().copied())
            .or(self.open_end)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeOrigin {
    /// The whitespace character preceding the attribute name.
    pub leading_space: Option<CharOrigin>,
    pub name: Origins,
    pub equals: Option<CharOrigin>,
    pub open_quote: Option<CharOrigin>,
    /// One entry per decoded value character.
    pub value: Origins,
    pub close_quote: Option<CharOrigin>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub origin: AttributeOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementData {
    /// Lowercased tag name.
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub origin: ElementOrigin,
}

impl ElementData {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextData {
    pub data: String,
    pub origins: Origins,
}

/// Origins of a comment: the `<!--` marker, the text, and the `-->` marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentOrigin {
    pub start: Origins,
    pub data: Origins,
    pub end: Origins,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentData {
    pub data: String,
    pub origin: CommentOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Root,
    Element(ElementData),
    Text(TextData),
    Comment(CommentData),
}

#[derive(Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed document tree.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Id the next created node will get.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len())
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| DomError::UnknownNode { node: id }.into())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| DomError::UnknownNode { node: id }.into())
    }

    pub fn data(&self, id: NodeId) -> Result<&NodeData> {
        Ok(&self.node(id)?.data)
    }

    pub fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        Ok(&mut self.node_mut(id)?.data)
    }

    pub fn element(&self, id: NodeId) -> Result<&ElementData> {
        match self.data(id)? {
            NodeData::Element(el) => Ok(el),
            _ => Err(DomError::NotAnElement { node: id }.into()),
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData> {
        match self.data_mut(id)? {
            NodeData::Element(el) => Ok(el),
            _ => Err(DomError::NotAnElement { node: id }.into()),
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.data(id), Ok(NodeData::Element(_)))
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(&self.node(id)?.children)
    }

    /// Element children only, in document order.
    pub fn element_children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .children(id)?
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
            .collect())
    }

    /// Ancestors from the parent upward.
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(id)?;
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.parent(parent)?;
        }
        Ok(ancestors)
    }

    /// Create a detached node.
    pub fn create(&mut self, data: NodeData) -> NodeId {
        let id = self.next_id();
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference`, or at the end.
    /// A child that already has a parent is moved.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        self.node(parent)?;
        self.detach(child)?;
        let siblings = &self.node(parent)?.children;
        let position = match reference {
            Some(reference) => siblings
                .iter()
                .position(|id| *id == reference)
                .ok_or(DomError::UnknownNode { node: reference })?,
            None => siblings.len(),
        };
        self.node_mut(parent)?.children.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.parent(child)? != Some(parent) {
            return Err(DomError::UnknownNode { node: child }.into());
        }
        self.detach(child)
    }

    /// Remove a node from its parent, if it has one.
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        if let Some(parent) = self.node_mut(id)?.parent.take() {
            self.node_mut(parent)?.children.retain(|c| *c != id);
        }
        Ok(())
    }

    /// Detach every child of `parent` and append `children` in order.
    pub fn replace_children(&mut self, parent: NodeId, children: &[NodeId]) -> Result<()> {
        let old = self.node(parent)?.children.clone();
        for child in old {
            self.detach(child)?;
        }
        for child in children {
            self.append_child(parent, *child)?;
        }
        Ok(())
    }

    /// The sibling following `id` under its parent.
    pub fn next_sibling(&self, id: NodeId) -> Result<Option<NodeId>> {
        let Some(parent) = self.parent(id)? else {
            return Ok(None);
        };
        let siblings = self.children(parent)?;
        Ok(siblings
            .iter()
            .position(|c| *c == id)
            .and_then(|i| siblings.get(i + 1))
            .copied())
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> Result<String> {
        let mut out = String::new();
        self.collect_text(id, &mut out)?;
        Ok(out)
    }

    fn collect_text(&self, id: NodeId, out: &mut String) -> Result<()> {
        match self.data(id)? {
            NodeData::Text(text) => out.push_str(&text.data),
            NodeData::Comment(_) => {}
            NodeData::Root | NodeData::Element(_) => {
                for child in self.children(id)? {
                    self.collect_text(*child, out)?;
                }
            }
        }
        Ok(())
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
