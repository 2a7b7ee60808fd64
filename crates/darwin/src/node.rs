use indexmap::IndexMap;

/// A decoded value: an attribute or collapsed scalar, a nested element, or
/// a folded list of same-named children.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Node(Node),
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// One decoded element. Attributes and child elements share a single
/// insertion-ordered map; accumulated character data lives in `text`, and
/// elements sitting on a configured list path keep their heterogeneous
/// children in document order in `items`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    tag: String,
    entries: IndexMap<String, Value>,
    text: String,
    items: Option<Vec<Node>>,
}

impl Node {
    pub(crate) fn new(tag: String) -> Self {
        Self {
            tag,
            entries: IndexMap::new(),
            text: String::new(),
            items: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Accumulated character data of this element.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// String attribute (or collapsed string scalar) by name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Nested child element by name.
    pub fn child(&self, key: &str) -> Option<&Node> {
        self.get(key).and_then(Value::as_node)
    }

    /// Boolean XML attribute: absent means false, otherwise "true"/"false".
    pub fn flag(&self, key: &str) -> bool {
        self.attr(key).map(|raw| raw == "true").unwrap_or(false)
    }

    /// Like `flag`, but with a default for absent attributes.
    pub fn flag_or(&self, key: &str, default: bool) -> bool {
        self.attr(key).map(|raw| raw == "true").unwrap_or(default)
    }

    /// The ordered heterogeneous children of a list-path element.
    pub fn items(&self) -> &[Node] {
        self.items.as_deref().unwrap_or(&[])
    }

    pub fn is_list(&self) -> bool {
        self.items.is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub(crate) fn mark_list(&mut self) {
        self.items = Some(Vec::new());
    }

    pub(crate) fn push_item(&mut self, child: Node) {
        self.items.get_or_insert_with(Vec::new).push(child);
    }

    pub(crate) fn insert(&mut self, key: String, value: Value) {
        self.entries.insert(key, value);
    }

    pub(crate) fn push_folded(&mut self, key: &str, value: Value) {
        match self.entries.get_mut(key) {
            Some(Value::List(items)) => items.push(value),
            _ => {
                self.entries
                    .insert(key.to_owned(), Value::List(vec![value]));
            }
        }
    }

    pub(crate) fn append_text(&mut self, data: &str) {
        self.text.push_str(data);
    }
}
