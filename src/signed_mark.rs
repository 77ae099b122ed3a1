use chrono::{DateTime, SecondsFormat, Utc};
use rsa::RsaPublicKey;
use x509_cert::Certificate;

use crate::{
    dsig,
    error::{DecodeError, EncodeError, SigningError},
    issuer::IssuerInfo,
    namespace,
    payload::ClaimPayload,
    pkix::{self, TrustAnchorSource},
    signer::Signer,
    xml::{Document, Element},
};

/// Value of the root `id` attribute when none is given.
pub const DEFAULT_REFERENCE_ID: &str = "signedMark";

/// A Signed Mark Data document: a mark claim with its issuer and validity
/// window, signed by the issuing clearinghouse.
///
/// A signed mark holds both the parsed fields and the exact bytes they came
/// from. Once those bytes exist, because the mark was decoded or signed,
/// [`encode`](Self::encode) returns them unchanged and the validation
/// methods operate on them; the fields are never serialized again.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedMark {
    id: String,
    issuer: IssuerInfo,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    payload: ClaimPayload,
    reference_id: String,
    original: Option<Vec<u8>>,
    signature_present: bool,
}

impl SignedMark {
    /// Composes an unsigned signed mark. Call [`sign`](Self::sign) to
    /// produce its serialized form.
    pub fn new(
        id: impl Into<String>,
        issuer: IssuerInfo,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        payload: ClaimPayload,
    ) -> Self {
        SignedMark {
            id: id.into(),
            issuer,
            not_before,
            not_after,
            payload,
            reference_id: DEFAULT_REFERENCE_ID.to_owned(),
            original: None,
            signature_present: false,
        }
    }

    pub fn builder() -> SignedMarkBuilder {
        SignedMarkBuilder::default()
    }

    /// Decodes an XML signed mark.
    ///
    /// The input is parsed and serialized again, and that serialization is
    /// parsed a second time; the fields come from the second parse and the
    /// serialization becomes the frozen form. Canonicalization of both
    /// parses is identical, so an intact signature stays valid.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        log::debug!("Decoding signed mark ({} bytes)", bytes.len());
        let serialized = Document::parse(bytes)?.to_bytes();
        let doc = Document::parse(&serialized)?;
        let mut mark = Self::from_document(&doc)?;
        mark.original = Some(serialized);
        log::debug!(
            "Decoded signed mark '{}' (signed: {})",
            mark.id,
            mark.signature_present
        );
        Ok(mark)
    }

    fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let root = &doc.root;
        if !root.is(namespace::SIGNED_MARK, "signedMark") {
            return Err(DecodeError::UnexpectedElement {
                expected: "smd:signedMark",
                found: root.name.clone(),
            });
        }
        let reference_id = root
            .attribute("id")
            .ok_or(DecodeError::MissingAttribute {
                element: "signedMark",
                attribute: "id",
            })?
            .to_owned();

        let mut children = root.child_elements();
        let id = next_smd_child(&mut children, "id")?.text().trim().to_owned();
        if id.is_empty() {
            return Err(DecodeError::InvalidValue {
                element: "id",
                value: id,
            });
        }
        let issuer = IssuerInfo::from_element(next_smd_child(&mut children, "issuerInfo")?)?;
        let not_before = parse_date_time(next_smd_child(&mut children, "notBefore")?, "notBefore")?;
        let not_after = parse_date_time(next_smd_child(&mut children, "notAfter")?, "notAfter")?;

        let payload = match children.next() {
            Some(e) if e.is(namespace::XMLDSIG, "Signature") => {
                return Err(DecodeError::MissingElement("mark"))
            }
            Some(e) if e.namespace.as_deref() == Some(namespace::SIGNED_MARK) => {
                return Err(DecodeError::UnexpectedElement {
                    expected: "mark",
                    found: e.name.clone(),
                })
            }
            Some(e) => ClaimPayload::detach(doc, e),
            None => return Err(DecodeError::MissingElement("mark")),
        };

        let signature_present = match children.next() {
            Some(e) if e.is(namespace::XMLDSIG, "Signature") => true,
            Some(e) => {
                return Err(DecodeError::UnexpectedElement {
                    expected: "Signature",
                    found: e.name.clone(),
                })
            }
            None => false,
        };
        if let Some(extra) = children.next() {
            return Err(DecodeError::UnexpectedElement {
                expected: "end of signedMark",
                found: extra.name.clone(),
            });
        }

        Ok(SignedMark {
            id,
            issuer,
            not_before,
            not_after,
            payload,
            reference_id,
            original: None,
            signature_present,
        })
    }

    /// Returns the frozen serialized form.
    ///
    /// Fails with [`EncodeError::NotFrozen`] for a mark that was composed but
    /// never signed.
    pub fn encode(&self) -> Result<&[u8], EncodeError> {
        self.original.as_deref().ok_or(EncodeError::NotFrozen)
    }

    /// Signs the mark with an enveloped signature and freezes the result.
    ///
    /// # Arguments
    ///
    /// * `signer` - Produces the RSA-SHA1 `SignatureValue`.
    /// * `chain` - Certificates to embed in `KeyInfo`, leaf first.
    ///
    /// The signed document is built from the fields, so signing a decoded
    /// mark replaces its previous serialization. On error the mark is left
    /// unchanged.
    pub fn sign(
        &mut self,
        signer: &impl Signer,
        chain: Option<&[Certificate]>,
    ) -> Result<(), SigningError> {
        log::debug!("Signing signed mark '{}'", self.id);
        let mut doc = self.to_unsigned_document()?;
        dsig::sign::sign_enveloped(&mut doc, signer, chain.unwrap_or_default())?;
        self.original = Some(doc.to_bytes());
        self.signature_present = true;
        Ok(())
    }

    fn to_unsigned_document(&self) -> Result<Document, EncodeError> {
        if self.id.is_empty() {
            return Err(EncodeError::MissingAttribute("id"));
        }
        if self.issuer.id.is_empty() {
            return Err(EncodeError::MissingAttribute("issuerID"));
        }
        if self.reference_id.is_empty() {
            return Err(EncodeError::MissingAttribute("signedMark id"));
        }

        let ns = Some(namespace::SIGNED_MARK);
        let root = Element::new("smd:signedMark", ns)
            .with_namespace_declaration("smd", namespace::SIGNED_MARK)
            .with_attribute("id", &self.reference_id)
            .with_child(Element::new("smd:id", ns).with_text(&self.id))
            .with_child(self.issuer.to_element())
            .with_child(Element::new("smd:notBefore", ns).with_text(format_date_time(self.not_before)))
            .with_child(Element::new("smd:notAfter", ns).with_text(format_date_time(self.not_after)))
            .with_child(self.payload.element().clone());

        Ok(Document {
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        })
    }

    /// Checks the signature against `key`.
    ///
    /// This is a purely cryptographic check: it says nothing about who owns
    /// the key or whether the mark is within its validity window. Any
    /// failure, a missing or malformed signature included, yields `false`.
    pub fn validate(&self, key: &RsaPublicKey) -> bool {
        let Some(doc) = self.frozen_document() else {
            return false;
        };
        match dsig::verify::verify_enveloped(&doc, key) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Signed mark '{}' rejected: {e}", self.id);
                false
            }
        }
    }

    /// Validates the embedded certificate chain against trust anchors, then
    /// the signature against the leaf certificate's key.
    ///
    /// Every embedded certificate must be valid now. Only path building
    /// runs inside [`TrustAnchorSource::with_parameters`], so a locked source
    /// is held only for that step. Any failure yields `false`.
    pub fn validate_chain(&self, anchors: &impl TrustAnchorSource) -> bool {
        let Some(doc) = self.frozen_document() else {
            return false;
        };

        let certificates = match dsig::embedded_certificates(&doc) {
            Ok(certificates) if !certificates.is_empty() => certificates,
            Ok(_) => {
                log::debug!("Signed mark '{}' rejected: no embedded certificates", self.id);
                return false;
            }
            Err(e) => {
                log::debug!("Signed mark '{}' rejected: {e}", self.id);
                return false;
            }
        };

        let now = Utc::now();
        for cert in &certificates {
            if let Err(e) = pkix::path::check_validity(cert.value(), now) {
                log::debug!(
                    "Signed mark '{}' rejected: certificate '{}' {e}",
                    self.id,
                    cert.tbs_certificate.subject
                );
                return false;
            }
        }

        let path = match anchors.with_parameters(|params| params.validate_encoded(&certificates)) {
            Ok(path) => path,
            Err(e) => {
                log::debug!("Signed mark '{}' rejected: {e}", self.id);
                return false;
            }
        };
        let key = match path.leaf_public_key() {
            Ok(key) => key,
            Err(e) => {
                log::debug!("Signed mark '{}' rejected: {e}", self.id);
                return false;
            }
        };

        match dsig::verify::verify_enveloped(&doc, &key) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Signed mark '{}' rejected: {e}", self.id);
                false
            }
        }
    }

    fn frozen_document(&self) -> Option<Document> {
        let Some(bytes) = &self.original else {
            log::debug!("Signed mark '{}' has no serialized form", self.id);
            return None;
        };
        match Document::parse(bytes) {
            Ok(doc) => Some(doc),
            Err(e) => {
                log::debug!("Signed mark '{}' does not parse: {e}", self.id);
                None
            }
        }
    }

    /// True when `instant` lies within `[not_before, not_after]`.
    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        self.not_before <= instant && instant <= self.not_after
    }

    pub fn is_valid_now(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Serial identifier of the signed mark
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn issuer(&self) -> &IssuerInfo {
        &self.issuer
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn payload(&self) -> &ClaimPayload {
        &self.payload
    }

    /// Value of the root `id` attribute the signature references.
    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    /// Frozen serialized form, if any.
    pub fn original_bytes(&self) -> Option<&[u8]> {
        self.original.as_deref()
    }

    /// True when the frozen form carries a signature.
    pub fn has_signature(&self) -> bool {
        self.signature_present
    }
}

/// Builds a [`SignedMark`] field by field, reporting whichever required
/// field is left out.
#[derive(Debug, Default, Clone)]
pub struct SignedMarkBuilder {
    id: Option<String>,
    issuer: Option<IssuerInfo>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    payload: Option<ClaimPayload>,
    reference_id: Option<String>,
}

impl SignedMarkBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn issuer(mut self, issuer: IssuerInfo) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub fn not_after(mut self, not_after: DateTime<Utc>) -> Self {
        self.not_after = Some(not_after);
        self
    }

    pub fn payload(mut self, payload: ClaimPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Overrides the root `id` attribute, `signedMark` by default.
    pub fn reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn build(self) -> Result<SignedMark, EncodeError> {
        let mut mark = SignedMark::new(
            self.id.ok_or(EncodeError::MissingAttribute("id"))?,
            self.issuer.ok_or(EncodeError::MissingAttribute("issuerInfo"))?,
            self.not_before
                .ok_or(EncodeError::MissingAttribute("notBefore"))?,
            self.not_after
                .ok_or(EncodeError::MissingAttribute("notAfter"))?,
            self.payload.ok_or(EncodeError::MissingAttribute("mark"))?,
        );
        if let Some(reference_id) = self.reference_id {
            mark.reference_id = reference_id;
        }
        Ok(mark)
    }

    /// Builds and signs in one step.
    pub fn sign(
        self,
        signer: &impl Signer,
        chain: Option<&[Certificate]>,
    ) -> Result<SignedMark, SigningError> {
        let mut mark = self.build()?;
        mark.sign(signer, chain)?;
        Ok(mark)
    }
}

fn next_smd_child<'a>(
    children: &mut impl Iterator<Item = &'a Element>,
    local_name: &'static str,
) -> Result<&'a Element, DecodeError> {
    match children.next() {
        Some(e) if e.is(namespace::SIGNED_MARK, local_name) => Ok(e),
        Some(e) => Err(DecodeError::UnexpectedElement {
            expected: local_name,
            found: e.name.clone(),
        }),
        None => Err(DecodeError::MissingElement(local_name)),
    }
}

fn parse_date_time(element: &Element, name: &'static str) -> Result<DateTime<Utc>, DecodeError> {
    let text = element.text();
    let value = text.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| DecodeError::InvalidDateTime {
            element: name,
            value: value.to_owned(),
            source,
        })
}

fn format_date_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
