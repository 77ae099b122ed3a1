//! Base64 transport forms of a signed mark: the `smd:encodedSignedMark`
//! element carried in domain create commands, and the `.smd` file issued to
//! mark holders.

use base64::engine::{general_purpose::STANDARD as BASE64, Engine};

use crate::{
    error::{DecodeError, EncodeError},
    namespace,
    signed_mark::SignedMark,
    xml::{Document, Element},
};

/// First line of the base64 block in an SMD file.
pub const SMD_BEGIN: &str = "-----BEGIN ENCODED SMD-----";
/// Last line of the base64 block in an SMD file.
pub const SMD_END: &str = "-----END ENCODED SMD-----";

const LINE_WIDTH: usize = 76;

/// A signed mark in its `smd:encodedSignedMark` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSignedMark {
    signed_mark: SignedMark,
}

impl EncodedSignedMark {
    pub fn new(signed_mark: SignedMark) -> Self {
        EncodedSignedMark { signed_mark }
    }

    pub fn signed_mark(&self) -> &SignedMark {
        &self.signed_mark
    }

    pub fn into_signed_mark(self) -> SignedMark {
        self.signed_mark
    }

    /// Decodes an `smd:encodedSignedMark` element.
    ///
    /// The `encoding` attribute defaults to `base64`, the only encoding
    /// defined. The content is base64 of a complete signed mark document.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let doc = Document::parse(bytes)?;
        Self::from_element(&doc.root)
    }

    pub(crate) fn from_element(element: &Element) -> Result<Self, DecodeError> {
        if !element.is(namespace::SIGNED_MARK, "encodedSignedMark") {
            return Err(DecodeError::UnexpectedElement {
                expected: "smd:encodedSignedMark",
                found: element.name.clone(),
            });
        }
        match element.attribute("encoding") {
            None | Some("base64") => {}
            Some(other) => {
                return Err(DecodeError::InvalidValue {
                    element: "encodedSignedMark",
                    value: other.to_owned(),
                })
            }
        }
        let signed_mark = SignedMark::decode(&decode_base64(&element.text())?)?;
        Ok(EncodedSignedMark { signed_mark })
    }

    /// Writes the `smd:encodedSignedMark` element as a standalone document.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let doc = Document {
            prolog: Vec::new(),
            root: self.to_element()?,
            epilog: Vec::new(),
        };
        Ok(doc.to_bytes())
    }

    pub(crate) fn to_element(&self) -> Result<Element, EncodeError> {
        let content = wrapped_base64(self.signed_mark.encode()?);
        Ok(
            Element::new("smd:encodedSignedMark", Some(namespace::SIGNED_MARK))
                .with_namespace_declaration("smd", namespace::SIGNED_MARK)
                .with_attribute("encoding", "base64")
                .with_text(format!("\n{content}")),
        )
    }

    /// Decodes an SMD file.
    ///
    /// Header lines before [`SMD_BEGIN`] (`Marks:`, `smdID:` and so on) are
    /// informational and skipped.
    pub fn from_smd_file(text: &str) -> Result<Self, DecodeError> {
        let mut lines = text.lines().map(str::trim);
        if !lines.any(|line| line == SMD_BEGIN) {
            return Err(DecodeError::MissingSmdMarker(SMD_BEGIN));
        }
        let mut content = String::new();
        let mut closed = false;
        for line in lines {
            if line == SMD_END {
                closed = true;
                break;
            }
            content.push_str(line);
        }
        if !closed {
            return Err(DecodeError::MissingSmdMarker(SMD_END));
        }
        log::debug!("Read {} base64 characters from SMD file", content.len());
        let signed_mark = SignedMark::decode(&decode_base64(&content)?)?;
        Ok(EncodedSignedMark { signed_mark })
    }

    /// Writes an SMD file with `smdID`, `notBefore` and `notAfter` header
    /// lines.
    pub fn to_smd_file(&self) -> Result<String, EncodeError> {
        let mark = &self.signed_mark;
        let content = wrapped_base64(mark.encode()?);
        Ok(format!(
            "smdID: {}\nnotBefore: {}\nnotAfter: {}\n{SMD_BEGIN}\n{content}{SMD_END}\n",
            mark.id(),
            mark.not_before().format("%Y-%m-%d %H:%M"),
            mark.not_after().format("%Y-%m-%d %H:%M"),
        ))
    }
}

impl From<SignedMark> for EncodedSignedMark {
    fn from(signed_mark: SignedMark) -> Self {
        EncodedSignedMark::new(signed_mark)
    }
}

impl TryFrom<&[u8]> for EncodedSignedMark {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::decode(bytes)
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(BASE64.decode(compact)?)
}

/// Base64 split into newline-terminated lines of [`LINE_WIDTH`] characters.
fn wrapped_base64(bytes: &[u8]) -> String {
    let encoded = BASE64.encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 1);
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        // base64 output is ASCII, any index is a char boundary
        let (line, tail) = rest.split_at(rest.len().min(LINE_WIDTH));
        out.push_str(line);
        out.push('\n');
        rest = tail;
    }
    out
}
