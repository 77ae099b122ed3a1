/// Inclusive Canonical XML 1.0
pub mod c14n;

use std::collections::{BTreeMap, HashMap};

use quick_xml::{events::Event, Reader};

use crate::error::{xml_error, DecodeError};

/// Namespace bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
/// Namespace of `xmlns` declarations.
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// A parsed XML document: the root element plus any comments and processing
/// instructions around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Comments and processing instructions before the root element
    pub prolog: Vec<Node>,
    /// The document element
    pub root: Element,
    /// Comments and processing instructions after the root element
    pub epilog: Vec<Node>,
}

/// A node in the element tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

/// An element with its qualified name, resolved namespace, attributes (in
/// document order, `xmlns` declarations included) and children.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Qualified name as written, e.g. `smd:signedMark`
    pub name: String,
    /// Namespace URI the name resolves to
    pub namespace: Option<String>,
    /// Attributes in document order
    pub attributes: Vec<Attribute>,
    /// Child nodes in document order
    pub children: Vec<Node>,
}

/// A single attribute. Namespace declarations are kept as attributes so a
/// re-serialized tree declares exactly what the input declared.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Qualified name as written
    pub name: String,
    /// Namespace URI for prefixed attributes
    pub namespace: Option<String>,
    /// Normalized, unescaped value
    pub value: String,
}

impl Attribute {
    /// Returns the namespace prefix this attribute declares, if it is an
    /// `xmlns` or `xmlns:*` declaration. The default namespace maps to `""`.
    pub fn declared_prefix(&self) -> Option<&str> {
        if self.name == "xmlns" {
            Some("")
        } else {
            self.name.strip_prefix("xmlns:")
        }
    }

    /// Local part of the qualified name.
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }
}

impl Element {
    /// Creates an element without attributes or children.
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Element {
            name: name.into(),
            namespace: namespace.map(ToOwned::to_owned),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Adds an unqualified attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            namespace: None,
            value: value.into(),
        });
        self
    }

    /// Adds a namespace declaration; an empty prefix declares the default namespace.
    pub fn with_namespace_declaration(mut self, prefix: &str, uri: &str) -> Self {
        let name = if prefix.is_empty() {
            "xmlns".to_owned()
        } else {
            format!("xmlns:{prefix}")
        };
        self.attributes.push(Attribute {
            name,
            namespace: Some(XMLNS_NAMESPACE.to_owned()),
            value: uri.to_owned(),
        });
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Namespace prefix of the element name, `""` when unprefixed.
    pub fn prefix(&self) -> &str {
        split_qname(&self.name).0
    }

    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    /// True when the element has the given namespace and local name.
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name() == local_name
    }

    /// Value of an unqualified attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Namespace declarations made on this element, as `(prefix, uri)`.
    pub fn namespace_declarations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .filter_map(|a| a.declared_prefix().map(|p| (p, a.value.as_str())))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First child element with the given namespace and local name.
    pub fn find_child(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is(namespace, local_name))
    }

    /// Concatenated text content of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replaces all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    /// Every element in this subtree, this one included, in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = vec![self];
        for child in self.child_elements() {
            out.extend(child.descendants());
        }
        out
    }

    /// Prefixes used by names in this subtree that are not declared within
    /// it. The default namespace is reported as `""`.
    pub fn free_prefixes(&self) -> Vec<String> {
        let mut free = Vec::new();
        self.collect_free_prefixes(&mut Vec::new(), &mut free);
        free
    }

    fn collect_free_prefixes(&self, declared: &mut Vec<String>, free: &mut Vec<String>) {
        let mark = declared.len();
        declared.extend(self.namespace_declarations().map(|(p, _)| p.to_owned()));

        let mut used = vec![self.prefix().to_owned()];
        used.extend(
            self.attributes
                .iter()
                .filter(|a| a.declared_prefix().is_none())
                .map(|a| split_qname(&a.name).0.to_owned())
                .filter(|p| !p.is_empty()),
        );
        for prefix in used {
            if prefix != "xml" && !declared.contains(&prefix) && !free.contains(&prefix) {
                free.push(prefix);
            }
        }
        for child in self.child_elements() {
            child.collect_free_prefixes(declared, free);
        }
        declared.truncate(mark);
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name);
            out.push_str("=\"");
            escape_attribute(&attr.value, out);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_to(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl Node {
    fn write_to(&self, out: &mut String) {
        match self {
            Node::Element(e) => e.write_to(out),
            Node::Text(t) => escape_text(t, out),
            Node::Comment(c) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
            Node::ProcessingInstruction { target, data } => {
                out.push_str("<?");
                out.push_str(target);
                if !data.is_empty() {
                    out.push(' ');
                    out.push_str(data);
                }
                out.push_str("?>");
            }
        }
    }
}

/// Deepest element nesting [`Document::parse`] accepts.
pub const MAX_DEPTH: usize = 256;

impl Document {
    /// Parses a UTF-8 XML document.
    ///
    /// Line endings are normalized, entity and character references expanded,
    /// CDATA sections merged into text and namespace prefixes resolved.
    /// Documents with a DOCTYPE or nested deeper than [`MAX_DEPTH`] are
    /// rejected.
    pub fn parse(bytes: &[u8]) -> Result<Document, DecodeError> {
        let text = std::str::from_utf8(bytes)?;
        let text = normalize_line_endings(text);
        let mut reader = Reader::from_str(&text);

        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<Element> = None;
        let mut stack: Vec<Element> = Vec::new();
        let mut scopes: Vec<HashMap<String, String>> = vec![HashMap::new()];

        loop {
            let event = reader.read_event().map_err(|e| {
                DecodeError::Xml(format!("{e} at byte {}", reader.buffer_position()))
            })?;
            match event {
                Event::Start(e) | Event::Empty(e) if root.is_some() => {
                    return Err(DecodeError::Xml(format!(
                        "content after document element: <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                Event::Start(e) | Event::Empty(e) if stack.len() >= MAX_DEPTH => {
                    return Err(DecodeError::Xml(format!(
                        "nesting exceeds {MAX_DEPTH} levels at <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                Event::Start(e) => {
                    let element = open_element(&e, &mut scopes)?;
                    stack.push(element);
                }
                Event::Empty(e) => {
                    let element = open_element(&e, &mut scopes)?;
                    scopes.pop();
                    close_element(element, &mut stack, &mut root);
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DecodeError::Xml("unbalanced end tag".to_owned()))?;
                    scopes.pop();
                    close_element(element, &mut stack, &mut root);
                }
                Event::Text(e) => {
                    let text = e.unescape().map_err(xml_error)?;
                    push_text(&text, &mut stack)?;
                }
                Event::CData(e) => {
                    let text = std::str::from_utf8(&e)?;
                    push_text(text, &mut stack)?;
                }
                Event::Comment(e) => {
                    let node = Node::Comment(std::str::from_utf8(&e)?.to_owned());
                    push_misc(node, &mut stack, &root, &mut prolog, &mut epilog);
                }
                Event::PI(e) => {
                    let content = std::str::from_utf8(&e)?;
                    let (target, data) = match content.find(|c: char| c.is_ascii_whitespace()) {
                        Some(i) => (&content[..i], content[i..].trim_start()),
                        None => (content, ""),
                    };
                    let node = Node::ProcessingInstruction {
                        target: target.to_owned(),
                        data: data.to_owned(),
                    };
                    push_misc(node, &mut stack, &root, &mut prolog, &mut epilog);
                }
                Event::Decl(_) => {}
                Event::DocType(_) => return Err(DecodeError::DocType),
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(DecodeError::Xml(format!(
                "unclosed element <{}>",
                stack[stack.len() - 1].name
            )));
        }
        let root = root.ok_or_else(|| DecodeError::Xml("no document element".to_owned()))?;

        Ok(Document {
            prolog,
            root,
            epilog,
        })
    }

    /// Serializes the document as UTF-8 with an XML declaration.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>");
        for node in &self.prolog {
            node.write_to(&mut out);
        }
        self.root.write_to(&mut out);
        for node in &self.epilog {
            node.write_to(&mut out);
        }
        out.into_bytes()
    }

    /// Chain of elements from the document root down to `target`, both
    /// included. `target` must be a reference into this document.
    pub fn path_to<'a>(&'a self, target: &Element) -> Option<Vec<&'a Element>> {
        fn walk<'a>(current: &'a Element, target: &Element, path: &mut Vec<&'a Element>) -> bool {
            path.push(current);
            if std::ptr::eq(current, target) {
                return true;
            }
            for child in current.child_elements() {
                if walk(child, target, path) {
                    return true;
                }
            }
            path.pop();
            false
        }

        let mut path = Vec::new();
        walk(&self.root, target, &mut path).then_some(path)
    }

    /// Namespace bindings in scope at `target`, declarations on `target`
    /// itself included.
    pub fn in_scope_namespaces(&self, target: &Element) -> BTreeMap<String, String> {
        let mut scope = BTreeMap::new();
        for element in self.path_to(target).unwrap_or_default() {
            for (prefix, uri) in element.namespace_declarations() {
                scope.insert(prefix.to_owned(), uri.to_owned());
            }
        }
        scope
    }

    /// All elements carrying an `id` attribute with the given value.
    pub fn elements_with_id(&self, id: &str) -> Vec<&Element> {
        self.root
            .descendants()
            .into_iter()
            .filter(|e| {
                e.attributes.iter().any(|a| {
                    a.namespace.is_none() && a.name.eq_ignore_ascii_case("id") && a.value == id
                })
            })
            .collect()
    }
}

fn open_element(
    start: &quick_xml::events::BytesStart<'_>,
    scopes: &mut Vec<HashMap<String, String>>,
) -> Result<Element, DecodeError> {
    let name = std::str::from_utf8(start.name().as_ref())?.to_owned();

    let mut raw_attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_owned();
        let raw = std::str::from_utf8(&attr.value)?;
        // attribute-value normalization happens before reference expansion
        let normalized = raw.replace(['\t', '\n', '\r'], " ");
        let value = quick_xml::escape::unescape(&normalized)
            .map_err(xml_error)?
            .into_owned();
        raw_attributes.push((key, value));
    }

    let mut scope = scopes.last().cloned().unwrap_or_default();
    for (key, value) in &raw_attributes {
        if key == "xmlns" {
            scope.insert(String::new(), value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_owned(), value.clone());
        }
    }

    let resolve = |prefix: &str| -> Result<Option<String>, DecodeError> {
        match prefix {
            "xml" => Ok(Some(XML_NAMESPACE.to_owned())),
            "" => Ok(scope.get("").filter(|uri| !uri.is_empty()).cloned()),
            p => scope
                .get(p)
                .filter(|uri| !uri.is_empty())
                .cloned()
                .map(Some)
                .ok_or_else(|| DecodeError::Xml(format!("unbound namespace prefix '{p}'"))),
        }
    };

    let namespace = resolve(split_qname(&name).0)?;
    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let namespace = if key == "xmlns" || key.starts_with("xmlns:") {
            Some(XMLNS_NAMESPACE.to_owned())
        } else {
            match split_qname(&key).0 {
                "" => None,
                prefix => resolve(prefix)?,
            }
        };
        attributes.push(Attribute {
            name: key,
            namespace,
            value,
        });
    }

    scopes.push(scope);

    Ok(Element {
        name,
        namespace,
        attributes,
        children: Vec::new(),
    })
}

fn close_element(element: Element, stack: &mut [Element], root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None => *root = Some(element),
    }
}

fn push_text(text: &str, stack: &mut [Element]) -> Result<(), DecodeError> {
    match stack.last_mut() {
        Some(parent) => {
            if let Some(Node::Text(existing)) = parent.children.last_mut() {
                existing.push_str(text);
            } else if !text.is_empty() {
                parent.children.push(Node::Text(text.to_owned()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(DecodeError::Xml(
            "character data outside the document element".to_owned(),
        )),
    }
}

fn push_misc(
    node: Node,
    stack: &mut [Element],
    root: &Option<Element>,
    prolog: &mut Vec<Node>,
    epilog: &mut Vec<Node>,
) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => prolog.push(node),
        None => epilog.push(node),
    }
}

/// Splits `prefix:local` into its parts; unprefixed names get `""`.
pub fn split_qname(name: &str) -> (&str, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (prefix, local),
        None => ("", name),
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Escapes character data so that it parses back to the same text.
pub(crate) fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

/// Escapes an attribute value so that attribute-value normalization on
/// re-parse leaves it unchanged.
pub(crate) fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}
