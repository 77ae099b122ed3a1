use thiserror::Error;

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any structural failure surfaced by this crate.
///
/// Validation never produces one of these: trust decisions are plain `bool`
/// verdicts so that a failed verification has exactly one outcome.
#[derive(Error, Debug)]
pub enum Error {
    /// Input bytes could not be turned into a signed mark or revocation list.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A value could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// A signature could not be produced.
    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Malformed or incomplete input.
///
/// Every variant names the field or line responsible so the caller can log
/// and reject the request.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("XML is not well-formed: {0}")]
    Xml(String),
    #[error("document type declarations are not accepted")]
    DocType,
    #[error("missing required element '{0}'")]
    MissingElement(&'static str),
    #[error("missing required attribute '{attribute}' on '{element}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("unexpected element '{found}', expected {expected}")]
    UnexpectedElement {
        expected: &'static str,
        found: String,
    },
    #[error("invalid value '{value}' in '{element}'")]
    InvalidValue { element: &'static str, value: String },
    #[error("invalid date-time '{value}' in '{element}': {source}")]
    InvalidDateTime {
        element: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("input is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("no '{0}' marker found in SMD file")]
    MissingSmdMarker(&'static str),
    #[error("revocation list is empty, expected '<version>,<created-at>' on line 1")]
    MissingVersionLine,
    #[error("malformed version line '{line}': {reason}")]
    MalformedVersionLine { line: String, reason: String },
    #[error("revocation list is missing the 'smd-id,insertion-datetime' header on line 2")]
    MissingHeader,
    #[error("unexpected header line '{line}', expected 'smd-id,insertion-datetime'")]
    UnexpectedHeader { line: String },
    #[error("malformed revocation on line {line_number} '{line}': {reason}")]
    MalformedEntry {
        line_number: usize,
        line: String,
        reason: String,
    },
}

/// A value was not in a state that can be serialized.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("missing required attribute '{0}'")]
    MissingAttribute(&'static str),
    #[error("signed mark has no frozen serialized form; sign it or decode it first")]
    NotFrozen,
    #[error("value '{value}' cannot be written as '{field}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("XML serialization: {0}")]
    Xml(String),
}

/// Failure while producing a signature. Partial signatures are never exposed.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("missing required attribute '{0}'")]
    MissingAttribute(&'static str),
    #[error("signing key rejected: {0}")]
    Key(String),
    #[error("signature structure: {0}")]
    Structure(String),
    #[error("cryptographic failure: {0}")]
    Crypto(#[from] anyhow::Error),
}

impl From<EncodeError> for SigningError {
    fn from(err: EncodeError) -> SigningError {
        match err {
            EncodeError::MissingAttribute(name) => SigningError::MissingAttribute(name),
            other => SigningError::Structure(other.to_string()),
        }
    }
}

pub(crate) fn xml_error(err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Xml(err.to_string())
}
