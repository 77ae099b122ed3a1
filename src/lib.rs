//! Signed Mark Data (SMD) for domain registries.
//!
//! This crate decodes signed marks issued by a trademark clearinghouse,
//! validates their XML signature and certificate chain, signs new ones and
//! reads the SMD revocation list. A decoded or signed mark keeps the exact
//! bytes its signature covers; encoding returns those bytes unchanged.

/// Enveloped XML signature profile
pub mod dsig;

/// Base64 envelope and SMD file forms
#[cfg(feature = "encoded")]
pub mod encoded;

/// Error types
pub mod error;

/// Issuer (clearinghouse) details
pub mod issuer;

/// Opaque mark claim carried by a signed mark
pub mod payload;

/// Certification path validation against trust anchors
pub mod pkix;

/// SMD revocation list
pub mod revocation;

/// The signed mark itself
pub mod signed_mark;

/// Signing keys
pub mod signer;

/// Combined accept/reject decision
#[cfg(feature = "verifier")]
pub mod verifier;

/// Minimal XML document model and canonicalization
pub mod xml;

#[cfg(test)]
mod testing;

pub use error::{DecodeError, EncodeError, Error, Result, SigningError};
pub use issuer::IssuerInfo;
pub use payload::ClaimPayload;
pub use pkix::{
    EncodedCertificate, EncodedCrl, PkixParameters, TrustAnchorSource, ValidationOptions,
};
pub use revocation::{RevocationList, RevokedEntry};
pub use signed_mark::{SignedMark, SignedMarkBuilder};
pub use signer::{RsaSigner, Signer};

/// XML namespaces of the signed mark schema
pub mod namespace {
    /// `smd:` elements (RFC 7848)
    pub const SIGNED_MARK: &str = "urn:ietf:params:xml:ns:signedMark-1.0";
    /// `mark:` elements of the claim payload
    pub const MARK: &str = "urn:ietf:params:xml:ns:mark-1.0";
    /// XML signature elements
    pub const XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
}
