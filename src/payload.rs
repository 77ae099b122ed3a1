use std::collections::BTreeMap;

use crate::{
    error::DecodeError,
    xml::{Document, Element},
};

/// The claim a signed mark vouches for, usually a `mark:mark` element
/// holding trademark, treaty or court records.
///
/// The content is carried as an opaque element subtree. It is compared
/// structurally and copied into signed documents unchanged; nothing here
/// looks at individual fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimPayload {
    element: Element,
}

impl ClaimPayload {
    /// Wraps an element subtree.
    ///
    /// Prefixes used in the subtree but not declared in it are declared on
    /// the returned root, using the namespaces the subtree resolved them to,
    /// so the payload serializes on its own.
    pub fn from_element(element: Element) -> Self {
        let mut bindings = BTreeMap::new();
        for e in element.descendants() {
            if let Some(ns) = &e.namespace {
                bindings
                    .entry(e.prefix().to_owned())
                    .or_insert_with(|| ns.clone());
            }
            for attr in e.attributes.iter().filter(|a| a.declared_prefix().is_none()) {
                if let (Some(ns), (prefix, _)) =
                    (&attr.namespace, crate::xml::split_qname(&attr.name))
                {
                    if !prefix.is_empty() {
                        bindings.entry(prefix.to_owned()).or_insert_with(|| ns.clone());
                    }
                }
            }
        }
        ClaimPayload {
            element: declare_free_prefixes(element, &bindings),
        }
    }

    /// Parses a standalone payload document.
    pub fn from_xml(bytes: &[u8]) -> Result<Self, DecodeError> {
        let doc = Document::parse(bytes)?;
        Ok(ClaimPayload { element: doc.root })
    }

    /// Copies `element` out of `doc`, declaring whatever namespaces it
    /// inherits from its ancestors.
    pub(crate) fn detach(doc: &Document, element: &Element) -> Self {
        let scope = doc.in_scope_namespaces(element);
        ClaimPayload {
            element: declare_free_prefixes(element.clone(), &scope),
        }
    }

    /// Root element of the payload.
    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }

    /// Namespace of the payload root, e.g. `urn:ietf:params:xml:ns:mark-1.0`.
    pub fn namespace(&self) -> Option<&str> {
        self.element.namespace.as_deref()
    }

    /// Serializes the payload as a standalone document.
    pub fn to_xml(&self) -> Vec<u8> {
        Document {
            prolog: Vec::new(),
            root: self.element.clone(),
            epilog: Vec::new(),
        }
        .to_bytes()
    }
}

fn declare_free_prefixes(mut element: Element, bindings: &BTreeMap<String, String>) -> Element {
    for prefix in element.free_prefixes() {
        match bindings.get(&prefix) {
            // an empty default namespace needs no declaration once detached
            Some(uri) if !uri.is_empty() => {
                element = element.with_namespace_declaration(&prefix, uri);
            }
            _ => {}
        }
    }
    element
}
