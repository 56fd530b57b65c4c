//! Fragment parser that records a source origin for every kept character.
//!
//! The tokenizer follows the browser rules that change how markup reads
//! back after a round trip: CRLF normalization, lowercased names, quoted and
//! unquoted attribute values, character references, void elements, comments
//! and raw text content. The tree builder is deliberately small: end tags pop
//! to the nearest matching open element and unmatched end tags are dropped.

use tracing::trace;

use crate::dom::{
    Attribute, AttributeOrigin, CommentData, CommentOrigin, Document, ElementData, ElementOrigin,
    NodeData, NodeId, TextData,
};
use crate::error::Result;
use crate::html::entities::decode_reference;
use crate::html::{CharOrigin, ContentModel, Origins, content_model, is_void};
use crate::oplog::TrackingRef;

/// Parse `source` as the content of a `context` element.
///
/// Nodes are created detached in `doc`; the returned ids are the top-level
/// nodes in document order. Every character origin points into `entry` at
/// the character's offset in `source`.
pub fn parse_fragment(
    doc: &mut Document,
    source: &str,
    entry: TrackingRef,
    context: &str,
) -> Result<Vec<NodeId>> {
    let mut parser = Parser::new(doc, source, entry, context);
    parser.run()?;
    trace!(
        entry = entry.0,
        nodes = parser.top_level.len(),
        context,
        "parsed fragment"
    );
    Ok(parser.top_level)
}

struct Parser<'a> {
    doc: &'a mut Document,
    /// Source characters after newline normalization.
    chars: Vec<char>,
    /// Offset in the original source of each entry in `chars`.
    positions: Vec<usize>,
    pos: usize,
    entry: TrackingRef,
    context: String,
    first_node: NodeId,
    open: Vec<NodeId>,
    top_level: Vec<NodeId>,
}

impl<'a> Parser<'a> {
    fn new(doc: &'a mut Document, source: &str, entry: TrackingRef, context: &str) -> Self {
        let mut chars = Vec::with_capacity(source.len());
        let mut positions = Vec::with_capacity(source.len());
        let mut iter = source.chars().enumerate().peekable();
        while let Some((i, c)) = iter.next() {
            if c == '\r' {
                // CR and CRLF both become one LF at the CR's position.
                if iter.peek().is_some_and(|(_, next)| *next == '\n') {
                    iter.next();
                }
                chars.push('\n');
            } else {
                chars.push(c);
            }
            positions.push(i);
        }

        let first_node = doc.next_id();
        Self {
            doc,
            chars,
            positions,
            pos: 0,
            entry,
            context: context.to_ascii_lowercase(),
            first_node,
            open: Vec::new(),
            top_level: Vec::new(),
        }
    }

    fn origin(&self, i: usize) -> Option<CharOrigin> {
        self.positions.get(i).map(|offset| CharOrigin {
            entry: self.entry,
            offset: *offset,
        })
    }

    fn origins(&self, range: std::ops::Range<usize>) -> Origins {
        range.map(|i| self.origin(i)).collect()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with_ignore_case(&self, at: usize, needle: &str) -> bool {
        let mut i = at;
        for expected in needle.chars() {
            match self.chars.get(i) {
                Some(c) if c.eq_ignore_ascii_case(&expected) => i += 1,
                _ => return false,
            }
        }
        true
    }

    fn current_name(&self) -> Result<String> {
        match self.open.last() {
            Some(id) => Ok(self.doc.element(*id)?.name.clone()),
            None => Ok(self.context.clone()),
        }
    }

    fn run(&mut self) -> Result<()> {
        while self.pos < self.chars.len() {
            let name = self.current_name()?;
            match content_model(&name) {
                ContentModel::RawText => self.raw_text(&name, false)?,
                ContentModel::Rcdata => self.raw_text(&name, true)?,
                ContentModel::Normal => {
                    if !self.markup()? {
                        self.text()?;
                    }
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, node: NodeId) -> Result<()> {
        match self.open.last() {
            Some(parent) => self.doc.append_child(*parent, node),
            None => {
                self.top_level.push(node);
                Ok(())
            }
        }
    }

    /// Add text at the insertion point, extending a text node this parse
    /// created immediately before it.
    fn insert_text(&mut self, data: String, origins: Origins) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let last = match self.open.last() {
            Some(parent) => self.doc.children(*parent)?.last().copied(),
            None => self.top_level.last().copied(),
        };
        if let Some(last) = last.filter(|id| *id >= self.first_node) {
            if let NodeData::Text(text) = self.doc.data_mut(last)? {
                text.data.push_str(&data);
                text.origins.extend(origins);
                return Ok(());
            }
        }
        let node = self.doc.create(NodeData::Text(TextData { data, origins }));
        self.insert(node)
    }

    /// Character data up to the next tag-like `<`.
    fn text(&mut self) -> Result<()> {
        let mut data = String::new();
        let mut origins = Vec::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c == '<' && self.opens_markup(self.pos) {
                break;
            }
            if c == '&' {
                if let Some((decoded, consumed)) = decode_reference(&self.chars, self.pos, false) {
                    data.push(decoded);
                    origins.push(self.origin(self.pos));
                    self.pos += consumed;
                    continue;
                }
            }
            data.push(c);
            origins.push(self.origin(self.pos));
            self.pos += 1;
        }
        self.insert_text(data, origins)
    }

    fn opens_markup(&self, at: usize) -> bool {
        match self.chars.get(at + 1) {
            Some(c) if c.is_ascii_alphabetic() => true,
            Some('/') | Some('!') | Some('?') => true,
            _ => false,
        }
    }

    /// Consume one piece of markup at the cursor. Returns false when the
    /// cursor is not at markup.
    fn markup(&mut self) -> Result<bool> {
        if self.peek(0) != Some('<') || !self.opens_markup(self.pos) {
            return Ok(false);
        }
        match self.peek(1) {
            Some('!') if self.starts_with_ignore_case(self.pos, "<!--") => self.comment()?,
            Some('!') if self.starts_with_ignore_case(self.pos, "<!doctype") => {
                self.skip_past('>');
            }
            Some('!') => self.bogus_comment(2)?,
            Some('?') => self.bogus_comment(1)?,
            Some('/') => match self.peek(2) {
                Some(c) if c.is_ascii_alphabetic() => self.end_tag()?,
                Some('>') => self.pos += 3,
                None => {
                    // `</` at end of input is text.
                    let origins = self.origins(self.pos..self.pos + 2);
                    self.pos += 2;
                    self.insert_text("</".into(), origins)?;
                }
                Some(_) => self.bogus_comment(2)?,
            },
            _ => self.start_tag()?,
        }
        Ok(true)
    }

    fn skip_past(&mut self, stop: char) {
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            if c == stop {
                break;
            }
        }
    }

    fn skip_whitespace(&mut self) -> Option<usize> {
        let start = self.pos;
        while self.peek(0).is_some_and(is_space) {
            self.pos += 1;
        }
        (self.pos > start).then_some(start)
    }

    fn start_tag(&mut self) -> Result<()> {
        let tag_start = self.pos;
        self.pos += 1;

        let mut name = String::new();
        let mut name_origins = Vec::new();
        while let Some(c) = self.peek(0) {
            if is_space(c) || c == '/' || c == '>' {
                break;
            }
            name.push(c.to_ascii_lowercase());
            name_origins.push(self.origin(self.pos));
            self.pos += 1;
        }

        let mut attributes: Vec<Attribute> = Vec::new();
        let open_end = loop {
            let leading_space = self.skip_whitespace();
            match self.peek(0) {
                // A tag cut off by the end of input is dropped.
                None => return Ok(()),
                Some('>') => {
                    let origin = self.origin(self.pos);
                    self.pos += 1;
                    break origin;
                }
                Some('/') => {
                    self.pos += 1;
                }
                Some(_) => {
                    let leading = leading_space.and_then(|i| self.origin(i));
                    let Some(attribute) = self.attribute(leading) else {
                        return Ok(());
                    };
                    if attributes.iter().all(|a| a.name != attribute.name) {
                        attributes.push(attribute);
                    }
                }
            }
        };

        let void = is_void(&name);
        let element = self.doc.create(NodeData::Element(ElementData {
            name,
            attributes,
            origin: ElementOrigin {
                open_bracket: self.origin(tag_start),
                name: name_origins,
                open_end,
                close: Vec::new(),
            },
        }));
        self.insert(element)?;
        if !void {
            self.open.push(element);
        }
        Ok(())
    }

    /// Returns `None` when the input ends inside the attribute.
    fn attribute(&mut self, leading_space: Option<CharOrigin>) -> Option<Attribute> {
        let mut name = String::new();
        let mut name_origins = Vec::new();
        while let Some(c) = self.peek(0) {
            let first = name.is_empty();
            if is_space(c) || c == '/' || c == '>' || (c == '=' && !first) {
                break;
            }
            name.push(c.to_ascii_lowercase());
            name_origins.push(self.origin(self.pos));
            self.pos += 1;
        }

        let mut origin = AttributeOrigin {
            leading_space,
            name: name_origins,
            ..AttributeOrigin::default()
        };

        let before_equals = self.pos;
        self.skip_whitespace();
        if self.peek(0) != Some('=') {
            // Valueless; whitespace belongs to the next attribute.
            self.pos = before_equals;
            return Some(Attribute {
                name,
                value: String::new(),
                origin,
            });
        }
        origin.equals = self.origin(self.pos);
        self.pos += 1;
        self.skip_whitespace();

        let mut value = String::new();
        let mut value_origins = Vec::new();
        match self.peek(0)? {
            quote @ ('"' | '\'') => {
                origin.open_quote = self.origin(self.pos);
                self.pos += 1;
                loop {
                    let c = self.peek(0)?;
                    if c == quote {
                        origin.close_quote = self.origin(self.pos);
                        self.pos += 1;
                        break;
                    }
                    self.attribute_char(&mut value, &mut value_origins);
                }
            }
            '>' => {}
            _ => {
                while let Some(c) = self.peek(0) {
                    if is_space(c) || c == '>' {
                        break;
                    }
                    self.attribute_char(&mut value, &mut value_origins);
                }
            }
        }
        origin.value = value_origins;
        Some(Attribute {
            name,
            value,
            origin,
        })
    }

    fn attribute_char(&mut self, value: &mut String, origins: &mut Origins) {
        let origin = self.origin(self.pos);
        match decode_reference(&self.chars, self.pos, true) {
            Some((decoded, consumed)) => {
                value.push(decoded);
                self.pos += consumed;
            }
            None => {
                value.push(self.chars[self.pos]);
                self.pos += 1;
            }
        }
        origins.push(origin);
    }

    fn end_tag(&mut self) -> Result<()> {
        let tag_start = self.pos;
        self.pos += 2;
        let mut name = String::new();
        while let Some(c) = self.peek(0) {
            if is_space(c) || c == '/' || c == '>' {
                break;
            }
            name.push(c.to_ascii_lowercase());
            self.pos += 1;
        }
        let name_end = self.pos;
        // Anything between the name and `>` is ignored.
        while let Some(c) = self.peek(0) {
            if c == '>' {
                break;
            }
            self.pos += 1;
        }
        if self.peek(0).is_none() {
            return Ok(());
        }
        let close_end = self.pos;
        self.pos += 1;

        let Some(depth) = self.open_position(&name)? else {
            trace!(tag = %name, "ignoring unmatched end tag");
            return Ok(());
        };
        let element = self.open[depth];
        self.open.truncate(depth);

        let mut close = self.origins(tag_start..name_end);
        close.push(self.origin(close_end));
        self.doc.element_mut(element)?.origin.close = close;
        Ok(())
    }

    fn open_position(&self, name: &str) -> Result<Option<usize>> {
        for (depth, id) in self.open.iter().enumerate().rev() {
            if self.doc.element(*id)?.name == name {
                return Ok(Some(depth));
            }
        }
        Ok(None)
    }

    fn comment(&mut self) -> Result<()> {
        let start = self.origins(self.pos..self.pos + 4);
        let data_start = self.pos + 4;

        // `<!-->` and `<!--->` close immediately.
        let abrupt = match (self.chars.get(data_start), self.chars.get(data_start + 1)) {
            (Some('>'), _) => Some(1),
            (Some('-'), Some('>')) => Some(2),
            _ => None,
        };
        let (data_end, end) = if let Some(len) = abrupt {
            let mut end = vec![None; 3 - len];
            end.extend(self.origins(data_start..data_start + len));
            self.pos = data_start + len;
            (data_start, end)
        } else {
            let close = (data_start..self.chars.len())
                .find(|i| self.chars[*i..].starts_with(&['-', '-', '>']));
            match close {
                Some(close) => {
                    self.pos = close + 3;
                    (close, self.origins(close..close + 3))
                }
                None => {
                    self.pos = self.chars.len();
                    (self.chars.len(), vec![None; 3])
                }
            }
        };

        let data: String = self.chars[data_start..data_end].iter().collect();
        let origin = CommentOrigin {
            start,
            data: self.origins(data_start..data_end),
            end,
        };
        let node = self.doc.create(NodeData::Comment(CommentData { data, origin }));
        self.insert(node)
    }

    /// `<?…>`, `<!…>` and `</…>` constructs that become comments. `skip` is
    /// the number of characters after `<` excluded from the comment text.
    fn bogus_comment(&mut self, skip: usize) -> Result<()> {
        let open = self.pos;
        let data_start = self.pos + skip;
        let close = (data_start..self.chars.len()).find(|i| self.chars[*i] == '>');
        let data_end = close.unwrap_or(self.chars.len());
        self.pos = close.map_or(self.chars.len(), |c| c + 1);

        let data: String = self.chars[data_start..data_end].iter().collect();
        let origin = CommentOrigin {
            start: vec![self.origin(open), None, None, None],
            data: self.origins(data_start..data_end),
            end: vec![None, None, close.and_then(|c| self.origin(c))],
        };
        let node = self.doc.create(NodeData::Comment(CommentData { data, origin }));
        self.insert(node)
    }

    /// Content of a raw text or RCDATA element, up to its end tag.
    fn raw_text(&mut self, name: &str, decode: bool) -> Result<()> {
        let start = self.pos;
        let mut end = start;
        while end < self.chars.len() {
            if self.chars[end] == '<'
                && self.chars.get(end + 1) == Some(&'/')
                && self.starts_with_ignore_case(end + 2, name)
                && self
                    .chars
                    .get(end + 2 + name.len())
                    .is_none_or(|c| is_space(*c) || *c == '/' || *c == '>')
            {
                break;
            }
            end += 1;
        }

        let mut data = String::new();
        let mut origins = Vec::new();
        let mut i = start;
        while i < end {
            if decode && self.chars[i] == '&' {
                if let Some((decoded, consumed)) = decode_reference(&self.chars[..end], i, false) {
                    data.push(decoded);
                    origins.push(self.origin(i));
                    i += consumed;
                    continue;
                }
            }
            data.push(self.chars[i]);
            origins.push(self.origin(i));
            i += 1;
        }
        self.pos = end;
        self.insert_text(data, origins)?;

        if self.pos < self.chars.len() {
            self.end_tag()?;
        }
        Ok(())
    }
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\u{0C}')
}
