//! Certification path validation (RFC 5280, section 6) for the certificates
//! embedded in a signed mark.
//!
//! Only RSA certificates are supported. Policy processing and name
//! constraints are not implemented; certificates carrying them as critical
//! extensions are rejected.

/// Certificate revocation list checks
pub mod crl;
/// Path building and per-certificate checks
pub mod path;

use std::{
    ops::Deref,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_cert::{
    crl::CertificateList,
    der::{asn1::AnyRef, Decode, Encode, Reader, SliceReader},
    Certificate,
};

pub use path::CertificationPath;

/// Path validation policy.
///
/// Deserializes from JSON with every field optional:
///
/// ```
/// use signed_mark::ValidationOptions;
///
/// let options = ValidationOptions::from_json(r#"{ "revocation_enabled": true }"#).unwrap();
/// assert_eq!(options.max_path_length, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Maximum number of intermediate CA certificates between the leaf and
    /// the trust anchor
    pub max_path_length: usize,
    /// Require a current CRL for every certificate in the path
    pub revocation_enabled: bool,
    /// Instant at which the path is validated; `None` means now
    pub validation_time: Option<DateTime<Utc>>,
    /// Accept certificates and CRLs signed with SHA-1
    pub allow_sha1_certificates: bool,
}

impl ValidationOptions {
    /// Parses options from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| anyhow!("Invalid validation options: {e}"))
    }
}

impl Default for ValidationOptions {
    fn default() -> Self {
        ValidationOptions {
            max_path_length: 5,
            revocation_enabled: false,
            validation_time: None,
            allow_sha1_certificates: false,
        }
    }
}

/// A signed X.509 structure (certificate or CRL) kept together with the DER
/// it was decoded from.
///
/// Signatures are checked over the to-be-signed bytes exactly as they
/// appear in that DER, never over a re-encoding of the parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded<T> {
    value: T,
    der: Vec<u8>,
}

/// Certificate with its original DER
pub type EncodedCertificate = Encoded<Certificate>;
/// CRL with its original DER
pub type EncodedCrl = Encoded<CertificateList>;

impl<T: for<'a> Decode<'a>> Encoded<T> {
    /// Decodes `der`, keeping a copy of the input bytes.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let value = T::from_der(der).map_err(|e| anyhow!("Invalid DER: {e}"))?;
        Ok(Encoded {
            value,
            der: der.to_vec(),
        })
    }
}

impl<T> Encoded<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The to-be-signed TLV: first element of the outer SEQUENCE, as
    /// encoded in [`der`](Self::der).
    pub(crate) fn signed_der(&self) -> Result<&[u8]> {
        let outer = AnyRef::from_der(&self.der).map_err(|e| anyhow!("Invalid DER: {e}"))?;
        let mut reader =
            SliceReader::new(outer.value()).map_err(|e| anyhow!("Invalid DER: {e}"))?;
        reader
            .tlv_bytes()
            .map_err(|e| anyhow!("Invalid to-be-signed structure: {e}"))
    }
}

impl<T> Deref for Encoded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Encode> Encoded<T> {
    /// Encodes an in-memory value; its DER encoding is the only one it has.
    pub fn from_value(value: T) -> Result<Self> {
        let der = value.to_der().map_err(|e| anyhow!("DER encoding failed: {e}"))?;
        Ok(Encoded { value, der })
    }
}

/// Trust anchors, CRLs and policy used to validate a certification path.
#[derive(Debug, Clone, Default)]
pub struct PkixParameters {
    /// Trusted root certificates
    pub anchors: Vec<Certificate>,
    /// CRLs consulted when revocation checking is enabled
    pub crls: Vec<EncodedCrl>,
    /// Validation policy
    pub options: ValidationOptions,
}

impl PkixParameters {
    /// Creates parameters trusting `anchors` with the default policy.
    pub fn new(anchors: Vec<Certificate>) -> Self {
        PkixParameters {
            anchors,
            crls: Vec::new(),
            options: ValidationOptions::default(),
        }
    }

    /// Loads trust anchors from concatenated PEM certificates.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let anchors = Certificate::load_pem_chain(pem)
            .map_err(|e| anyhow!("Failed to load trust anchors: {e}"))?;
        log::debug!("Loaded {} trust anchor(s)", anchors.len());
        Ok(Self::new(anchors))
    }

    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn add_anchor(&mut self, anchor: Certificate) {
        self.anchors.push(anchor);
    }

    /// Adds a CRL built in memory.
    pub fn add_crl(&mut self, crl: CertificateList) -> Result<()> {
        self.crls.push(Encoded::from_value(crl)?);
        Ok(())
    }

    /// Adds a DER-encoded CRL.
    pub fn add_crl_der(&mut self, der: &[u8]) -> Result<()> {
        let crl = EncodedCrl::from_der(der).map_err(|e| anyhow!("Invalid CRL: {e}"))?;
        self.crls.push(crl);
        Ok(())
    }

    /// Builds and validates a path from `chain` (leaf first) to one of the
    /// trust anchors.
    ///
    /// Prefer [`validate_encoded`](Self::validate_encoded) for certificates
    /// received as DER.
    pub fn validate(&self, chain: &[Certificate]) -> Result<CertificationPath> {
        let chain = chain
            .iter()
            .cloned()
            .map(EncodedCertificate::from_value)
            .collect::<Result<Vec<_>>>()?;
        self.validate_encoded(&chain)
    }

    /// Like [`validate`](Self::validate), checking signatures over the
    /// certificates' original DER.
    pub fn validate_encoded(&self, chain: &[EncodedCertificate]) -> Result<CertificationPath> {
        path::validate(chain, self)
    }
}

/// Shared access to [`PkixParameters`].
///
/// Path building runs inside [`with_parameters`](Self::with_parameters); a
/// locking implementation holds its lock for that call only, so the other
/// validation steps of concurrent callers proceed in parallel.
pub trait TrustAnchorSource {
    fn with_parameters<R>(&self, f: impl FnOnce(&PkixParameters) -> R) -> R;
}

impl TrustAnchorSource for PkixParameters {
    fn with_parameters<R>(&self, f: impl FnOnce(&PkixParameters) -> R) -> R {
        f(self)
    }
}

impl TrustAnchorSource for Mutex<PkixParameters> {
    fn with_parameters<R>(&self, f: impl FnOnce(&PkixParameters) -> R) -> R {
        let params = self.lock().unwrap_or_else(PoisonError::into_inner);
        f(&params)
    }
}

impl TrustAnchorSource for RwLock<PkixParameters> {
    fn with_parameters<R>(&self, f: impl FnOnce(&PkixParameters) -> R) -> R {
        let params = self.read().unwrap_or_else(PoisonError::into_inner);
        f(&params)
    }
}

impl<T: TrustAnchorSource + ?Sized> TrustAnchorSource for Arc<T> {
    fn with_parameters<R>(&self, f: impl FnOnce(&PkixParameters) -> R) -> R {
        (**self).with_parameters(f)
    }
}

impl<T: TrustAnchorSource + ?Sized> TrustAnchorSource for &T {
    fn with_parameters<R>(&self, f: impl FnOnce(&PkixParameters) -> R) -> R {
        (**self).with_parameters(f)
    }
}

#[cfg(test)]
mod tests {
    use x509_cert::der::{Encode, EncodePem};

    use super::*;
    use crate::testing;

    #[test]
    fn options_default_and_deserialize() {
        let options: ValidationOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ValidationOptions::default());

        let options = ValidationOptions::from_json(
            r#"{"max_path_length": 1, "validation_time": "2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(options.max_path_length, 1);
        assert_eq!(
            options.validation_time.unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
        assert!(!options.revocation_enabled);
        assert!(ValidationOptions::from_json(r#"{"max_path_length": -1}"#).is_err());
    }

    #[test]
    fn anchors_load_from_pem() {
        let mut pem = testing::root()
            .to_pem(x509_cert::der::pem::LineEnding::LF)
            .unwrap();
        pem.push_str(
            &testing::intermediate()
                .to_pem(x509_cert::der::pem::LineEnding::LF)
                .unwrap(),
        );
        let params = PkixParameters::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(params.anchors.len(), 2);
        assert!(PkixParameters::from_pem(b"garbage").is_err());
    }

    #[test]
    fn signed_der_is_a_slice_of_the_input() {
        let der = testing::leaf().to_der().unwrap();
        let encoded = EncodedCertificate::from_der(&der).unwrap();
        assert_eq!(encoded.der(), der.as_slice());
        assert_eq!(encoded.value(), testing::leaf());

        let tbs = encoded.signed_der().unwrap();
        // outer SEQUENCE header of a 1024-bit-key certificate is 4 bytes
        assert_eq!(tbs, &der[4..4 + tbs.len()]);
        assert_eq!(tbs, testing::leaf().tbs_certificate.to_der().unwrap().as_slice());
        assert!(EncodedCertificate::from_der(b"\x30\x00").is_err());
    }

    #[test]
    fn locked_sources_hand_out_parameters() {
        let params = PkixParameters::new(vec![testing::root().clone()]);
        let mutex = Arc::new(Mutex::new(params.clone()));
        let rwlock = RwLock::new(params);
        assert_eq!(mutex.with_parameters(|p| p.anchors.len()), 1);
        assert_eq!(rwlock.with_parameters(|p| p.anchors.len()), 1);
    }
}
