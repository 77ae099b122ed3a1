//! Enveloped XML signatures, limited to the one profile signed marks use.
//!
//! | Step             | Algorithm                                 |
//! |------------------|-------------------------------------------|
//! | SignedInfo c14n  | inclusive C14N 1.0 with comments          |
//! | Reference        | `#<root id>`, enveloped-signature         |
//! | Digest           | SHA-256                                   |
//! | Signature        | RSA-SHA1 (PKCS#1 v1.5)                    |
//!
//! The SHA-256 digest paired with an RSA-SHA1 signature is a legacy
//! combination kept for compatibility with already issued signed marks.

pub(crate) mod sign;
pub(crate) mod verify;

use anyhow::{anyhow, bail, Result};
use base64::engine::{general_purpose::STANDARD as BASE64, Engine};

use crate::{
    namespace,
    pkix::EncodedCertificate,
    xml::{Document, Element},
};

/// Algorithm identifiers of the signature profile.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, strum::EnumString, strum::Display, strum::IntoStaticStr,
)]
pub enum Algorithm {
    /// Canonicalization of `SignedInfo`
    #[strum(serialize = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments")]
    C14nWithComments,
    /// Reference transform excluding the signature from its own digest
    #[strum(serialize = "http://www.w3.org/2000/09/xmldsig#enveloped-signature")]
    EnvelopedSignature,
    /// Reference digest
    #[strum(serialize = "http://www.w3.org/2001/04/xmlenc#sha256")]
    Sha256,
    /// Signature method
    #[strum(serialize = "http://www.w3.org/2000/09/xmldsig#rsa-sha1")]
    RsaSha1,
}

impl Algorithm {
    /// The algorithm URI used in `Algorithm` attributes.
    pub fn uri(self) -> &'static str {
        self.into()
    }
}

/// Returns the `Signature` element enveloped in the document root.
///
/// Exactly one signature may appear anywhere in the document, and it must
/// be a direct child of the root.
pub(crate) fn locate_signature(doc: &Document) -> Result<&Element> {
    let count = doc
        .root
        .descendants()
        .into_iter()
        .filter(|e| e.is(namespace::XMLDSIG, "Signature"))
        .count();
    if count != 1 {
        bail!("expected exactly one Signature element, found {count}");
    }
    doc.root
        .find_child(namespace::XMLDSIG, "Signature")
        .ok_or_else(|| anyhow!("Signature is not a child of the document element"))
}

/// Decodes the certificates of `KeyInfo/X509Data`, in document order.
pub(crate) fn embedded_certificates(doc: &Document) -> Result<Vec<EncodedCertificate>> {
    let signature = locate_signature(doc)?;
    let Some(key_info) = signature.find_child(namespace::XMLDSIG, "KeyInfo") else {
        return Ok(Vec::new());
    };

    let mut certificates = Vec::new();
    for data in key_info
        .child_elements()
        .filter(|e| e.is(namespace::XMLDSIG, "X509Data"))
    {
        for cert in data
            .child_elements()
            .filter(|e| e.is(namespace::XMLDSIG, "X509Certificate"))
        {
            let der = decode_base64(&cert.text())?;
            certificates.push(
                EncodedCertificate::from_der(&der)
                    .map_err(|e| anyhow!("Invalid X509Certificate: {e}"))?,
            );
        }
    }
    log::trace!("Found {} embedded certificate(s)", certificates.len());
    Ok(certificates)
}

/// Decodes base64 element content, which may be wrapped over several lines.
pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| anyhow!("Invalid base64 content: {e}"))
}
