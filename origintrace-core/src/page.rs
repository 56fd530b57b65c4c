//! DOM mutation interception.
//!
//! [`Page`] wraps the document with the tracer. Every content-producing
//! mutation records one log entry whose result is the assigned string and
//! annotates the nodes it creates with origins pointing into that entry.
//! Structural moves (`append_child`, `remove_child`) record nothing.

use tracing::{debug, info};

use crate::dispatch::{Tracer, Tracked};
use crate::dom::{
    Attribute, AttributeOrigin, Document, ElementData, ElementOrigin, NodeData, NodeId, TextData,
};
use crate::error::{DomError, Result};
use crate::html::{self, CharOrigin, Origins};
use crate::oplog::{ExtraArgs, NewEntry, OffsetMap, OperationKind, OperationLog, TrackingRef};
use crate::value::Value;

/// Where `insertAdjacentHTML` puts the parsed nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacentPosition {
    BeforeBegin,
    AfterBegin,
    BeforeEnd,
    AfterEnd,
}

impl AdjacentPosition {
    /// Positions match case-insensitively, as in the DOM.
    pub fn parse(position: &str) -> Result<Self> {
        match position.to_ascii_lowercase().as_str() {
            "beforebegin" => Ok(Self::BeforeBegin),
            "afterbegin" => Ok(Self::AfterBegin),
            "beforeend" => Ok(Self::BeforeEnd),
            "afterend" => Ok(Self::AfterEnd),
            _ => Err(DomError::InvalidPosition {
                position: position.to_string(),
            }
            .into()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeBegin => "beforebegin",
            Self::AfterBegin => "afterbegin",
            Self::BeforeEnd => "beforeend",
            Self::AfterEnd => "afterend",
        }
    }
}

/// Document plus tracer.
pub struct Page {
    tracer: Tracer,
    document: Document,
}

impl Page {
    pub fn new() -> Self {
        Self::with_tracer(Tracer::new())
    }

    pub fn with_tracer(tracer: Tracer) -> Self {
        Self {
            tracer,
            document: Document::new(),
        }
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    pub fn log(&self) -> &OperationLog {
        self.tracer.log()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn root(&self) -> NodeId {
        self.document.root()
    }

    /// Record `kind` with the single string input `arg` and an identity map.
    fn record_assignment(
        &mut self,
        kind: OperationKind,
        arg: &Tracked,
        extra: ExtraArgs,
    ) -> Result<(TrackingRef, String)> {
        let input = self.tracer.ensure_tracked(arg)?;
        let text = arg.value.to_display_string();
        let entry = self.tracer.record(
            NewEntry::new(kind, &Value::String(text.clone()))
                .inputs(vec![input])
                .extra(extra)
                .offset_map(OffsetMap::Identity { input: 0 }),
        )?;
        Ok((entry, text))
    }

    pub fn create_element(&mut self, tag: Tracked) -> Result<NodeId> {
        let (entry, name) =
            self.record_assignment(OperationKind::CreateElement, &tag, ExtraArgs::default())?;
        let name = name.to_ascii_lowercase();
        let origin = ElementOrigin::from_tag_name(&name, entry);
        Ok(self.document.create(NodeData::Element(ElementData {
            name,
            attributes: Vec::new(),
            origin,
        })))
    }

    pub fn create_text_node(&mut self, text: Tracked) -> Result<NodeId> {
        let (entry, data) =
            self.record_assignment(OperationKind::CreateTextNode, &text, ExtraArgs::default())?;
        Ok(self.text_node(data, entry))
    }

    fn text_node(&mut self, data: String, entry: TrackingRef) -> NodeId {
        let origins = entry_origins(entry, data.chars().count());
        self.document
            .create(NodeData::Text(TextData { data, origins }))
    }

    pub fn set_inner_html(&mut self, element: NodeId, html: Tracked) -> Result<()> {
        let context = self.document.element(element)?.name.clone();
        let (entry, source) =
            self.record_assignment(OperationKind::AssignInnerHtml, &html, ExtraArgs::default())?;
        let nodes = html::parse_fragment(&mut self.document, &source, entry, &context)?;
        self.document.replace_children(element, &nodes)
    }

    pub fn set_outer_html(&mut self, element: NodeId, html: Tracked) -> Result<()> {
        self.document.element(element)?;
        let parent = self
            .document
            .parent(element)?
            .ok_or(DomError::NoParent { node: element })?;
        let context = self.context_name(parent)?;
        let (entry, source) =
            self.record_assignment(OperationKind::AssignOuterHtml, &html, ExtraArgs::default())?;
        let nodes = html::parse_fragment(&mut self.document, &source, entry, &context)?;
        for node in nodes {
            self.document.insert_before(parent, node, Some(element))?;
        }
        self.document.detach(element)
    }

    pub fn insert_adjacent_html(
        &mut self,
        element: NodeId,
        position: &str,
        html: Tracked,
    ) -> Result<()> {
        let position = AdjacentPosition::parse(position)?;
        let own_name = self.document.element(element)?.name.clone();
        let parent = self.document.parent(element)?;
        let (target, reference, context) = match position {
            AdjacentPosition::AfterBegin => (
                element,
                self.document.children(element)?.first().copied(),
                own_name,
            ),
            AdjacentPosition::BeforeEnd => (element, None, own_name),
            AdjacentPosition::BeforeBegin | AdjacentPosition::AfterEnd => {
                let parent = parent.ok_or(DomError::NoParent { node: element })?;
                let reference = if position == AdjacentPosition::BeforeBegin {
                    Some(element)
                } else {
                    self.document.next_sibling(element)?
                };
                (parent, reference, self.context_name(parent)?)
            }
        };

        let (entry, source) = self.record_assignment(
            OperationKind::InsertAdjacentHtml,
            &html,
            ExtraArgs::default().with_detail("position", position.as_str()),
        )?;
        let nodes = html::parse_fragment(&mut self.document, &source, entry, &context)?;
        for node in nodes {
            self.document.insert_before(target, node, reference)?;
        }
        Ok(())
    }

    pub fn set_attribute(&mut self, element: NodeId, name: Tracked, value: Tracked) -> Result<()> {
        self.document.element(element)?;
        let name_ref = self.tracer.ensure_tracked(&name)?;
        let value_ref = self.tracer.ensure_tracked(&value)?;
        let attr_name = name.value.to_display_string().to_ascii_lowercase();
        let attr_value = value.value.to_display_string();

        let entry = self.tracer.record(
            NewEntry::new(
                OperationKind::AttributeAssignment,
                &Value::String(attr_value.clone()),
            )
            .inputs(vec![value_ref, name_ref])
            .extra(ExtraArgs::default().with_detail("attribute", attr_name.clone()))
            .offset_map(OffsetMap::Identity { input: 0 }),
        )?;

        let attribute = Attribute {
            origin: AttributeOrigin {
                name: entry_origins(name_ref, attr_name.chars().count()),
                value: entry_origins(entry, attr_value.chars().count()),
                ..AttributeOrigin::default()
            },
            name: attr_name,
            value: attr_value,
        };
        let el = self.document.element_mut(element)?;
        match el.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => el.attributes.push(attribute),
        }
        Ok(())
    }

    pub fn set_text_content(&mut self, node: NodeId, text: Tracked) -> Result<()> {
        let (entry, data) =
            self.record_assignment(OperationKind::AssignTextContent, &text, ExtraArgs::default())?;
        let origins = entry_origins(entry, data.chars().count());
        match self.document.data_mut(node)? {
            NodeData::Text(existing) => {
                existing.data = data;
                existing.origins = origins;
                Ok(())
            }
            NodeData::Comment(comment) => {
                comment.data = data;
                comment.origin.data = origins;
                Ok(())
            }
            NodeData::Element(_) | NodeData::Root => {
                let children = if data.is_empty() {
                    Vec::new()
                } else {
                    vec![self.text_node(data, entry)]
                };
                self.document.replace_children(node, &children)
            }
        }
    }

    /// Parse the page's initial markup into the document root. With a file
    /// name the root entry is `HtmlFileContent` and carries the name.
    pub fn load_initial_html(&mut self, source: &str, file_name: Option<&str>) -> Result<TrackingRef> {
        let value = Value::string(source);
        let entry = match file_name {
            Some(file) => NewEntry::new(OperationKind::HtmlFileContent, &value)
                .extra(ExtraArgs::default().with_detail("file", file)),
            None => NewEntry::new(OperationKind::InitialPageHtml, &value),
        };
        let entry = self.tracer.record(entry)?;
        let root = self.document.root();
        let nodes = html::parse_fragment(&mut self.document, source, entry, "body")?;
        self.document.replace_children(root, &nodes)?;
        info!(
            entry = entry.0,
            nodes = nodes.len(),
            file = file_name.unwrap_or("(inline)"),
            "loaded initial page html"
        );
        Ok(entry)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        debug!(%parent, %child, "append_child");
        self.document.append_child(parent, child)
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.document.remove_child(parent, child)
    }

    pub fn outer_html(&self, node: NodeId) -> Result<String> {
        Ok(html::outer_html(&self.document, node)?.text)
    }

    pub fn inner_html(&self, node: NodeId) -> Result<String> {
        Ok(html::inner_html(&self.document, node)?.text)
    }

    pub fn children(&self, node: NodeId) -> Result<&[NodeId]> {
        self.document.children(node)
    }

    pub fn element_children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        self.document.element_children(node)
    }

    fn context_name(&self, node: NodeId) -> Result<String> {
        Ok(match self.document.data(node)? {
            NodeData::Element(el) => el.name.clone(),
            _ => "body".to_string(),
        })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_origins(entry: TrackingRef, len: usize) -> Origins {
    (0..len)
        .map(|offset| Some(CharOrigin { entry, offset }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraceError;

    fn div(page: &mut Page) -> NodeId {
        let tag = page.tracer_mut().string_literal("div").unwrap();
        page.create_element(tag).unwrap()
    }

    fn literal(page: &mut Page, s: &str) -> Tracked {
        page.tracer_mut().string_literal(s).unwrap()
    }

    #[test]
    fn test_inner_html_replaces_children() {
        let mut page = Page::new();
        let el = div(&mut page);
        let first = literal(&mut page, "<b>one</b>");
        page.set_inner_html(el, first).unwrap();
        let second = literal(&mut page, "two");
        page.set_inner_html(el, second).unwrap();
        assert_eq!(page.inner_html(el).unwrap(), "two");
        assert_eq!(page.outer_html(el).unwrap(), "<div>two</div>");
    }

    #[test]
    fn test_insert_adjacent_positions() {
        let mut page = Page::new();
        let root = page.root();
        let el = div(&mut page);
        page.append_child(root, el).unwrap();
        let middle = literal(&mut page, "b");
        page.set_inner_html(el, middle).unwrap();

        for (position, html) in [
            ("afterBegin", "a"),
            ("BEFOREEND", "c"),
            ("beforebegin", "<i></i>"),
            ("afterend", "<u></u>"),
        ] {
            let html = literal(&mut page, html);
            page.insert_adjacent_html(el, position, html).unwrap();
        }
        assert_eq!(page.inner_html(root).unwrap(), "<i></i><div>abc</div><u></u>");
    }

    #[test]
    fn test_insert_adjacent_invalid_position() {
        let mut page = Page::new();
        let el = div(&mut page);
        let before = page.log().len();
        let html = Tracked::untracked("x");
        let err = page.insert_adjacent_html(el, "inside", html).unwrap_err();
        assert!(matches!(
            err,
            TraceError::Dom(DomError::InvalidPosition { .. })
        ));
        assert_eq!(page.log().len(), before);
    }

    #[test]
    fn test_outer_html_requires_parent() {
        let mut page = Page::new();
        let el = div(&mut page);
        let html = literal(&mut page, "<p>x</p>");
        assert!(matches!(
            page.set_outer_html(el, html),
            Err(TraceError::Dom(DomError::NoParent { .. }))
        ));
    }

    #[test]
    fn test_outer_html_replaces_element() {
        let mut page = Page::new();
        let root = page.root();
        let el = div(&mut page);
        page.append_child(root, el).unwrap();
        let html = literal(&mut page, "<p>x</p>y");
        page.set_outer_html(el, html).unwrap();
        assert_eq!(page.inner_html(root).unwrap(), "<p>x</p>y");
    }

    #[test]
    fn test_set_attribute_records_entry() {
        let mut page = Page::new();
        let el = div(&mut page);
        let name = literal(&mut page, "Title");
        let value = literal(&mut page, "a&b");
        page.set_attribute(el, name, value).unwrap();
        assert_eq!(page.outer_html(el).unwrap(), r#"<div title="a&amp;b"></div>"#);

        let last = page.log().entries().last().unwrap();
        assert_eq!(last.kind, OperationKind::AttributeAssignment);
        assert_eq!(last.extra.detail("attribute"), Some("title"));
        assert_eq!(last.inputs.len(), 2);
    }

    #[test]
    fn test_text_content_and_text_nodes() {
        let mut page = Page::new();
        let el = div(&mut page);
        let text = literal(&mut page, "<not markup>");
        page.set_text_content(el, text).unwrap();
        assert_eq!(page.inner_html(el).unwrap(), "&lt;not markup&gt;");

        let t = literal(&mut page, " more");
        let node = page.create_text_node(t).unwrap();
        page.append_child(el, node).unwrap();
        assert_eq!(page.document().text_content(el).unwrap(), "<not markup> more");
    }

    #[test]
    fn test_initial_html_kinds() {
        let mut page = Page::new();
        let entry = page.load_initial_html("<p>hi</p>", None).unwrap();
        assert_eq!(page.log().get(entry).unwrap().kind, OperationKind::InitialPageHtml);

        let entry = page
            .load_initial_html("<p>hi</p>", Some("index.html"))
            .unwrap();
        let logged = page.log().get(entry).unwrap();
        assert_eq!(logged.kind, OperationKind::HtmlFileContent);
        assert_eq!(logged.extra.detail("file"), Some("index.html"));
        assert_eq!(page.inner_html(page.root()).unwrap(), "<p>hi</p>");
    }
}
