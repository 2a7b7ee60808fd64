//! Streaming path-driven XML decoder.
//!
//! The Push Port schema mixes heterogeneous record lists, repeated
//! homogeneous children, scalar-valued leaf elements and embedded HTML
//! fragments. Rather than mapping the schema type-by-type, the decoder is
//! configured with sets of dotted element paths that select a decoding
//! strategy per subtree, and emits a generic [`Node`] tree.

use std::collections::{HashMap, HashSet};

use quick_xml::events::{BytesEnd, BytesStart};
use quick_xml::{events::Event, Reader};

use crate::error::DecodeError;
use crate::node::{Node, Value};

/// Coercion applied to a collapsed scalar path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Float,
    /// Exactly "true" or "false"; anything else fails the document.
    Bool,
}

/// Which dotted paths decode under which strategy.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    list_paths: HashSet<String>,
    folded_lists: HashSet<String>,
    detokenise: HashSet<String>,
    collapse_data: HashSet<String>,
    collapse_types: HashMap<String, ScalarKind>,
    exclude_data: HashSet<String>,
    exclude_keys: HashSet<String>,
    strip_whitespace: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderConfig {
    pub fn new() -> Self {
        Self {
            list_paths: HashSet::new(),
            folded_lists: HashSet::new(),
            detokenise: HashSet::new(),
            collapse_data: HashSet::new(),
            collapse_types: HashMap::new(),
            exclude_data: HashSet::new(),
            exclude_keys: HashSet::new(),
            strip_whitespace: true,
        }
    }

    /// Paths whose children accumulate as one ordered heterogeneous list.
    pub fn list_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Paths where repeated same-named children collapse into one
    /// homogeneous list attached under the child name.
    pub fn folded_lists<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.folded_lists.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Paths below which inner tags are re-serialized into the containing
    /// element's text (embedded HTML in station messages).
    pub fn detokenise<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detokenise.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Scalar-valued paths: the element becomes a string (or typed value)
    /// attached to its parent; attributes are discarded.
    pub fn collapse_data<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collapse_data.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn collapse_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = (S, ScalarKind)>,
        S: Into<String>,
    {
        self.collapse_types
            .extend(types.into_iter().map(|(path, kind)| (path.into(), kind)));
        self
    }

    /// Paths whose text content is dropped.
    pub fn exclude_data<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_data.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Paths whose entire subtree is dropped.
    pub fn exclude_keys<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_keys.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn strip_whitespace(mut self, strip: bool) -> Self {
        self.strip_whitespace = strip;
        self
    }
}

/// A configured decoder. Cheap to share; each [`PathDecoder::parse`] call
/// runs over one document with fresh state.
#[derive(Debug, Clone)]
pub struct PathDecoder {
    config: DecoderConfig,
}

impl PathDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn parse(&self, xml: &str) -> Result<Node, DecodeError> {
        let mut reader = Reader::from_str(xml);
        reader.expand_empty_elements(true);

        let mut state = DecodeState::new(&self.config);
        loop {
            match reader.read_event()? {
                Event::Start(element) => state.start(&element)?,
                Event::End(element) => state.end(&element)?,
                Event::Text(text) => state.characters(&text.unescape()?),
                Event::CData(cdata) => {
                    let raw = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                    state.characters(&raw);
                }
                Event::Eof => break,
                _ => {}
            }
        }
        state.finish()
    }
}

/// Namespace prefixes are dropped; only the local name is kept.
fn strip_namespace(raw: &str) -> &str {
    raw.rsplit(':').next().unwrap_or(raw)
}

enum Frame {
    Node { node: Node, placement: Placement },
    Collapsed { name: String, buf: String, folded: bool },
    Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Normal,
    ListItem,
    Folded,
}

struct DecodeState<'c> {
    config: &'c DecoderConfig,
    path: Vec<String>,
    stack: Vec<Frame>,
}

impl<'c> DecodeState<'c> {
    fn new(config: &'c DecoderConfig) -> Self {
        Self {
            config,
            path: Vec::new(),
            stack: vec![Frame::Node {
                node: Node::new(String::new()),
                placement: Placement::Normal,
            }],
        }
    }

    /// The nearest enclosing element node; the synthetic root is always at
    /// the bottom of the stack.
    fn enclosing_node(&mut self) -> &mut Node {
        for frame in self.stack.iter_mut().rev() {
            if let Frame::Node { node, .. } = frame {
                return node;
            }
        }
        unreachable!("decode stack always holds the root node");
    }

    fn inside_excluded(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Excluded))
    }

    fn start(&mut self, element: &BytesStart) -> Result<(), DecodeError> {
        let raw_name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        let name = strip_namespace(&raw_name).to_owned();

        // Inside a detokenised subtree the tag is rewritten back into the
        // containing element's text and the path does not advance.
        if self.config.detokenise.contains(&self.path.join(".")) {
            let mut literal = format!("<{}", name);
            for attribute in element.attributes() {
                let attribute = attribute.map_err(quick_xml::Error::from)?;
                let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
                let value = attribute.unescape_value()?;
                literal.push_str(&format!(" {}=\"{}\"", key, value));
            }
            literal.push('>');
            self.characters(&literal);
            return Ok(());
        }

        self.path.push(name.clone());
        let path = self.path.join(".");

        if self.inside_excluded() || self.config.exclude_keys.contains(&path) {
            self.stack.push(Frame::Excluded);
            return Ok(());
        }

        if self.config.collapse_data.contains(&path) {
            let folded = self.config.folded_lists.contains(&path);
            self.stack.push(Frame::Collapsed {
                name,
                buf: String::new(),
                folded,
            });
            return Ok(());
        }

        let mut node = Node::new(name);
        for attribute in element.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            if key.starts_with("xmlns") {
                continue;
            }
            let value = attribute.unescape_value()?.into_owned();
            node.insert(key, Value::Str(value));
        }
        if self.config.list_paths.contains(&path) {
            node.mark_list();
        }

        let placement = if self.enclosing_node().is_list() {
            Placement::ListItem
        } else if self.config.folded_lists.contains(&path) {
            Placement::Folded
        } else {
            Placement::Normal
        };
        self.stack.push(Frame::Node { node, placement });
        Ok(())
    }

    fn end(&mut self, element: &BytesEnd) -> Result<(), DecodeError> {
        let raw_name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        let name = strip_namespace(&raw_name).to_owned();
        let path = self.path.join(".");

        // Closing an inner tag of a detokenised subtree.
        if self.config.detokenise.contains(&path)
            && self.path.last().map(String::as_str) != Some(name.as_str())
        {
            self.characters(&format!("</{}>", name));
            return Ok(());
        }

        match self.stack.pop().ok_or(DecodeError::UnbalancedDocument)? {
            Frame::Excluded => {}
            Frame::Collapsed { name, buf, folded } => {
                let value = self.coerce(&path, buf)?;
                let parent = self.enclosing_node();
                if folded {
                    parent.push_folded(&name, value);
                } else {
                    parent.insert(name, value);
                }
            }
            Frame::Node { node, placement } => {
                let tag = node.tag().to_owned();
                let parent = self.enclosing_node();
                match placement {
                    Placement::ListItem => parent.push_item(node),
                    Placement::Folded => parent.push_folded(&tag, Value::Node(node)),
                    Placement::Normal => parent.insert(tag, Value::Node(node)),
                }
            }
        }
        self.path.pop().ok_or(DecodeError::UnbalancedDocument)?;
        Ok(())
    }

    fn characters(&mut self, data: &str) {
        if self.inside_excluded() {
            return;
        }
        let path = self.path.join(".");
        if self.config.exclude_data.contains(&path) {
            return;
        }
        if let Some(Frame::Collapsed { buf, .. }) = self.stack.last_mut() {
            buf.push_str(data);
            return;
        }
        let strip = self.config.strip_whitespace;
        let node = self.enclosing_node();
        // A pure-whitespace run is suppressed while the accumulated text is
        // still (only) whitespace.
        if strip && data.trim().is_empty() && node.text().trim().is_empty() {
            return;
        }
        node.append_text(data);
    }

    fn coerce(&self, path: &str, buf: String) -> Result<Value, DecodeError> {
        let Some(kind) = self.config.collapse_types.get(path) else {
            return Ok(Value::Str(buf));
        };
        let value = match kind {
            ScalarKind::Int => buf.trim().parse::<i64>().ok().map(Value::Int),
            ScalarKind::Float => buf.trim().parse::<f64>().ok().map(Value::Float),
            ScalarKind::Bool => match buf.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
        };
        value.ok_or_else(|| DecodeError::BadScalar {
            path: path.to_owned(),
            value: buf,
        })
    }

    fn finish(mut self) -> Result<Node, DecodeError> {
        if !self.path.is_empty() || self.stack.len() != 1 {
            return Err(DecodeError::UnbalancedDocument);
        }
        match self.stack.pop() {
            Some(Frame::Node { node, .. }) => Ok(node),
            _ => Err(DecodeError::UnbalancedDocument),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(config: DecoderConfig) -> PathDecoder {
        PathDecoder::new(config)
    }

    #[test]
    fn decodes_nested_elements_with_attributes() {
        let parsed = decoder(DecoderConfig::new())
            .parse(r#"<a x="1"><b y="2">hello</b></a>"#)
            .unwrap();
        let a = parsed.child("a").unwrap();
        assert_eq!(a.attr("x"), Some("1"));
        let b = a.child("b").unwrap();
        assert_eq!(b.attr("y"), Some("2"));
        assert_eq!(b.text(), "hello");
    }

    #[test]
    fn strips_namespace_prefixes_and_xmlns_attributes() {
        let parsed = decoder(DecoderConfig::new())
            .parse(r#"<ns:a xmlns:ns="urn:x" xmlns="urn:y" z="3"><ns:b/></ns:a>"#)
            .unwrap();
        let a = parsed.child("a").unwrap();
        assert_eq!(a.attr("z"), Some("3"));
        assert!(a.attr("xmlns:ns").is_none());
        assert!(a.attr("xmlns").is_none());
        assert!(a.child("b").is_some());
    }

    #[test]
    fn list_path_collects_heterogeneous_children_in_order() {
        let config = DecoderConfig::new().list_paths(["root.uR"]);
        let parsed = decoder(config)
            .parse(r#"<root><uR><TS rid="1"/><schedule rid="2"/><TS rid="3"/></uR></root>"#)
            .unwrap();
        let list = parsed.child("root").unwrap().child("uR").unwrap();
        let tags: Vec<&str> = list.items().iter().map(|item| item.tag()).collect();
        assert_eq!(tags, ["TS", "schedule", "TS"]);
        assert_eq!(list.items()[1].attr("rid"), Some("2"));
    }

    #[test]
    fn folded_list_groups_same_named_children() {
        let config = DecoderConfig::new().folded_lists(["root.coach"]);
        let parsed = decoder(config)
            .parse(r#"<root><coach n="A"/><coach n="B"/></root>"#)
            .unwrap();
        let root = parsed.child("root").unwrap();
        let coaches = root.get("coach").unwrap().as_list().unwrap();
        assert_eq!(coaches.len(), 2);
        assert_eq!(coaches[1].as_node().unwrap().attr("n"), Some("B"));
    }

    #[test]
    fn collapsed_paths_become_scalars() {
        let config = DecoderConfig::new()
            .collapse_data(["root.name", "root.count", "root.ratio", "root.flag"])
            .collapse_types([
                ("root.count", ScalarKind::Int),
                ("root.ratio", ScalarKind::Float),
                ("root.flag", ScalarKind::Bool),
            ]);
        let parsed = decoder(config)
            .parse(
                "<root><name>alpha</name><count>42</count>\
                 <ratio>2.5</ratio><flag>true</flag></root>",
            )
            .unwrap();
        let root = parsed.child("root").unwrap();
        assert_eq!(root.get("name"), Some(&Value::Str("alpha".to_owned())));
        assert_eq!(root.get("count"), Some(&Value::Int(42)));
        assert_eq!(root.get("ratio"), Some(&Value::Float(2.5)));
        assert_eq!(root.get("flag"), Some(&Value::Bool(true)));
    }

    #[test]
    fn collapsed_bool_requires_exact_literals() {
        let config = DecoderConfig::new()
            .collapse_data(["root.flag"])
            .collapse_types([("root.flag", ScalarKind::Bool)]);
        let why = decoder(config)
            .parse("<root><flag>yes</flag></root>")
            .unwrap_err();
        assert!(matches!(why, DecodeError::BadScalar { .. }));
    }

    #[test]
    fn excluded_subtrees_are_dropped() {
        let config = DecoderConfig::new().exclude_keys(["root.noise"]);
        let parsed = decoder(config)
            .parse(r#"<root><noise><deep a="1">x</deep></noise><keep>y</keep></root>"#)
            .unwrap();
        let root = parsed.child("root").unwrap();
        assert!(root.get("noise").is_none());
        assert_eq!(root.child("keep").unwrap().text(), "y");
    }

    #[test]
    fn excluded_data_drops_text_but_keeps_structure() {
        let config = DecoderConfig::new().exclude_data(["root.quiet"]);
        let parsed = decoder(config)
            .parse(r#"<root><quiet a="1">secret</quiet></root>"#)
            .unwrap();
        let quiet = parsed.child("root").unwrap().child("quiet").unwrap();
        assert_eq!(quiet.attr("a"), Some("1"));
        assert_eq!(quiet.text(), "");
    }

    #[test]
    fn detokenise_rewrites_inner_tags_as_text() {
        let config = DecoderConfig::new().detokenise(["root.Msg"]);
        let parsed = decoder(config)
            .parse(
                r#"<root><Msg>Buses replace trains. <a href="http://nr.example">Details</a> here.</Msg></root>"#,
            )
            .unwrap();
        let msg = parsed.child("root").unwrap().child("Msg").unwrap();
        assert_eq!(
            msg.text(),
            r#"Buses replace trains. <a href="http://nr.example">Details</a> here."#
        );
        assert!(msg.child("a").is_none());
    }

    #[test]
    fn detokenise_handles_self_closing_tags() {
        let config = DecoderConfig::new().detokenise(["root.Msg"]);
        let parsed = decoder(config)
            .parse("<root><Msg>line one<br/>line two</Msg></root>")
            .unwrap();
        let msg = parsed.child("root").unwrap().child("Msg").unwrap();
        // Empty elements expand to an open/close pair.
        assert_eq!(msg.text(), "line one<br></br>line two");
    }

    #[test]
    fn leading_whitespace_runs_are_suppressed() {
        let parsed = decoder(DecoderConfig::new())
            .parse("<root>\n  <a>  \n  </a><b>text</b></root>")
            .unwrap();
        let root = parsed.child("root").unwrap();
        assert_eq!(root.child("a").unwrap().text(), "");
        assert_eq!(root.child("b").unwrap().text(), "text");
    }

    #[test]
    fn decoder_is_restartable() {
        let decoder = decoder(DecoderConfig::new().list_paths(["r"]));
        let first = decoder.parse("<r><x/></r>").unwrap();
        let second = decoder.parse("<r><y/></r>").unwrap();
        assert_eq!(first.child("r").unwrap().items()[0].tag(), "x");
        assert_eq!(second.child("r").unwrap().items()[0].tag(), "y");
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(decoder(DecoderConfig::new()).parse("<a><b></a>").is_err());
        assert!(decoder(DecoderConfig::new()).parse("<a>").is_err());
    }
}
