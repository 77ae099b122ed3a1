//! Inclusive Canonical XML 1.0 (<https://www.w3.org/TR/2001/REC-xml-c14n-20010315>)
//! over a document subset rooted at one element.

use std::collections::BTreeMap;

use super::{
    escape_attribute, escape_text, split_qname, Document, Element, Node, XML_NAMESPACE,
};

/// Canonicalizes the subtree rooted at `apex`.
///
/// `apex` must be a reference into `doc`: namespace declarations and `xml:*`
/// attributes inherited from its ancestors are rendered on it. Elements in
/// `excluded` (compared by identity) are dropped together with their
/// subtrees, which is how the enveloped-signature transform is applied.
pub fn canonicalize(
    doc: &Document,
    apex: &Element,
    excluded: &[&Element],
    with_comments: bool,
) -> Vec<u8> {
    let ancestors = doc.path_to(apex).unwrap_or_default();
    let ancestors = &ancestors[..ancestors.len().saturating_sub(1)];

    let mut in_scope = BTreeMap::new();
    let mut inherited_xml_attributes: BTreeMap<String, String> = BTreeMap::new();
    for ancestor in ancestors {
        for (prefix, uri) in ancestor.namespace_declarations() {
            in_scope.insert(prefix.to_owned(), uri.to_owned());
        }
        for attr in &ancestor.attributes {
            if attr.namespace.as_deref() == Some(XML_NAMESPACE) {
                inherited_xml_attributes.insert(attr.name.clone(), attr.value.clone());
            }
        }
    }

    let mut canonicalizer = Canonicalizer {
        excluded,
        with_comments,
        out: String::new(),
    };
    canonicalizer.element(apex, &in_scope, &BTreeMap::new(), &inherited_xml_attributes);
    canonicalizer.out.into_bytes()
}

struct Canonicalizer<'a> {
    excluded: &'a [&'a Element],
    with_comments: bool,
    out: String,
}

impl Canonicalizer<'_> {
    fn element(
        &mut self,
        element: &Element,
        parent_scope: &BTreeMap<String, String>,
        rendered: &BTreeMap<String, String>,
        inherited_xml_attributes: &BTreeMap<String, String>,
    ) {
        if self.excluded.iter().any(|e| std::ptr::eq(*e, element)) {
            return;
        }

        let mut scope = parent_scope.clone();
        for (prefix, uri) in element.namespace_declarations() {
            scope.insert(prefix.to_owned(), uri.to_owned());
        }

        // namespace axis: anything whose value differs from what the nearest
        // output ancestor already rendered
        let mut namespaces = Vec::new();
        let mut now_rendered = rendered.clone();
        for (prefix, uri) in &scope {
            let previous = rendered.get(prefix);
            let emit = if uri.is_empty() {
                prefix.is_empty() && previous.is_some_and(|p| !p.is_empty())
            } else {
                previous != Some(uri)
            };
            if emit {
                namespaces.push((prefix.as_str(), uri.as_str()));
                now_rendered.insert(prefix.clone(), uri.clone());
            }
        }

        let mut attributes: Vec<(&str, &str, &str, &str)> = element
            .attributes
            .iter()
            .filter(|a| a.declared_prefix().is_none())
            .map(|a| {
                (
                    a.namespace.as_deref().unwrap_or(""),
                    a.local_name(),
                    a.name.as_str(),
                    a.value.as_str(),
                )
            })
            .collect();
        for (name, value) in inherited_xml_attributes {
            if !attributes.iter().any(|a| a.2 == name.as_str()) {
                attributes.push((
                    XML_NAMESPACE,
                    split_qname(name).1,
                    name.as_str(),
                    value.as_str(),
                ));
            }
        }
        attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        self.out.push('<');
        self.out.push_str(&element.name);
        for (prefix, uri) in namespaces {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            escape_attribute(uri, &mut self.out);
            self.out.push('"');
        }
        for (_, _, name, value) in attributes {
            self.out.push(' ');
            self.out.push_str(name);
            self.out.push_str("=\"");
            escape_attribute(value, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        let no_inherited = BTreeMap::new();
        for child in &element.children {
            match child {
                Node::Element(e) => self.element(e, &scope, &now_rendered, &no_inherited),
                Node::Text(t) => escape_text(t, &mut self.out),
                Node::Comment(c) => {
                    if self.with_comments {
                        self.out.push_str("<!--");
                        self.out.push_str(c);
                        self.out.push_str("-->");
                    }
                }
                Node::ProcessingInstruction { target, data } => {
                    self.out.push_str("<?");
                    self.out.push_str(target);
                    if !data.is_empty() {
                        self.out.push(' ');
                        self.out.push_str(data);
                    }
                    self.out.push_str("?>");
                }
            }
        }

        self.out.push_str("</");
        self.out.push_str(&element.name);
        self.out.push('>');
    }
}
