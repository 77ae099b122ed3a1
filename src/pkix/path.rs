use anyhow::{anyhow, bail, ensure, Result};
use chrono::{DateTime, TimeZone, Utc};
use rsa::{
    pkcs1v15::{Signature, VerifyingKey},
    pkcs8::DecodePublicKey,
    signature::Verifier,
    RsaPublicKey,
};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use x509_cert::{
    der::{asn1::BitString, oid::ObjectIdentifier, Decode, Encode},
    ext::pkix::{BasicConstraints, KeyUsage, KeyUsages},
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
    time::Time,
    Certificate,
};

use super::{crl, EncodedCertificate, PkixParameters};

const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

pub(crate) const KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");
const BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

/// Extensions this validator understands well enough to accept when marked
/// critical.
const KNOWN_EXTENSIONS: [ObjectIdentifier; 8] = [
    KEY_USAGE,
    BASIC_CONSTRAINTS,
    // subjectKeyIdentifier
    ObjectIdentifier::new_unwrap("2.5.29.14"),
    // subjectAltName
    ObjectIdentifier::new_unwrap("2.5.29.17"),
    // cRLDistributionPoints
    ObjectIdentifier::new_unwrap("2.5.29.31"),
    // certificatePolicies
    ObjectIdentifier::new_unwrap("2.5.29.32"),
    // authorityKeyIdentifier
    ObjectIdentifier::new_unwrap("2.5.29.35"),
    // extKeyUsage
    ObjectIdentifier::new_unwrap("2.5.29.37"),
];

/// A validated chain from a leaf certificate up to a trust anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificationPath {
    certificates: Vec<Certificate>,
    anchor: Certificate,
}

impl CertificationPath {
    /// Path certificates, leaf first, trust anchor excluded.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The trust anchor that terminates the path.
    pub fn anchor(&self) -> &Certificate {
        &self.anchor
    }

    pub fn leaf(&self) -> &Certificate {
        // a path always holds at least the leaf
        &self.certificates[0]
    }

    /// RSA public key of the leaf certificate.
    pub fn leaf_public_key(&self) -> Result<RsaPublicKey> {
        rsa_public_key(&self.leaf().tbs_certificate.subject_public_key_info)
    }
}

pub(crate) fn validate(
    chain: &[EncodedCertificate],
    params: &PkixParameters,
) -> Result<CertificationPath> {
    let time = params.options.validation_time.unwrap_or_else(Utc::now);
    let path = build(chain, params)?;
    log::debug!(
        "Built path of {} certificate(s) to anchor '{}'",
        path.certificates.len(),
        path.anchor.tbs_certificate.subject
    );

    let intermediates = path.certificates.len() - 1;
    ensure!(
        intermediates <= params.options.max_path_length,
        "path has {intermediates} intermediate(s), maximum is {}",
        params.options.max_path_length
    );

    for (depth, cert) in path.certificates.iter().enumerate() {
        let subject = &cert.tbs_certificate.subject;
        check_validity(cert, time).map_err(|e| anyhow!("'{subject}': {e}"))?;
        check_critical_extensions(cert).map_err(|e| anyhow!("'{subject}': {e}"))?;
        if depth == 0 {
            check_leaf_usage(cert).map_err(|e| anyhow!("'{subject}': {e}"))?;
        } else {
            // certificates below this one that are not themselves the leaf
            check_ca(cert, depth - 1).map_err(|e| anyhow!("'{subject}': {e}"))?;
        }
    }

    if params.options.revocation_enabled {
        for (i, cert) in path.certificates.iter().enumerate() {
            let issuer = path.certificates.get(i + 1).unwrap_or(&path.anchor);
            crl::check_not_revoked(
                cert,
                issuer,
                &params.crls,
                time,
                params.options.allow_sha1_certificates,
            )?;
        }
    }

    Ok(path)
}

/// Orders certificates from `chain[0]` up to a trust anchor by matching
/// issuer names and verifying each signature.
fn build(chain: &[EncodedCertificate], params: &PkixParameters) -> Result<CertificationPath> {
    let allow_sha1 = params.options.allow_sha1_certificates;
    let leaf = chain.first().ok_or_else(|| anyhow!("no certificates to validate"))?;
    ensure!(
        !params.anchors.contains(leaf.value()),
        "leaf certificate is itself a trust anchor"
    );

    let mut remaining: Vec<&EncodedCertificate> = chain[1..]
        .iter()
        .filter(|c| !params.anchors.contains(c.value()))
        .collect();
    let mut certificates = vec![leaf.value().clone()];
    let mut current = leaf;

    loop {
        if let Some(anchor) = params
            .anchors
            .iter()
            .find(|anchor| issued_by(current, anchor, allow_sha1))
        {
            return Ok(CertificationPath {
                certificates,
                anchor: anchor.clone(),
            });
        }

        let Some(position) = remaining
            .iter()
            .position(|candidate| issued_by(current, candidate.value(), allow_sha1))
        else {
            bail!(
                "no trusted issuer found for '{}'",
                current.tbs_certificate.subject
            );
        };
        current = remaining.remove(position);
        certificates.push(current.value().clone());
    }
}

fn issued_by(cert: &EncodedCertificate, issuer: &Certificate, allow_sha1: bool) -> bool {
    if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return false;
    }
    let Ok(tbs) = cert.signed_der() else {
        return false;
    };
    match verify_signed(tbs, &cert.signature_algorithm, &cert.signature, issuer, allow_sha1) {
        Ok(()) => true,
        Err(e) => {
            log::trace!(
                "'{}' is not issued by '{}': {e}",
                cert.tbs_certificate.subject,
                issuer.tbs_certificate.subject
            );
            false
        }
    }
}

/// Checks that `time` falls within the certificate's validity period.
pub(crate) fn check_validity(cert: &Certificate, time: DateTime<Utc>) -> Result<()> {
    let validity = &cert.tbs_certificate.validity;
    let not_before = to_utc(&validity.not_before)?;
    let not_after = to_utc(&validity.not_after)?;
    ensure!(time >= not_before, "not valid before {not_before}");
    ensure!(time <= not_after, "expired at {not_after}");
    Ok(())
}

fn check_critical_extensions(cert: &Certificate) -> Result<()> {
    for ext in cert.tbs_certificate.extensions.iter().flatten() {
        if ext.critical && !KNOWN_EXTENSIONS.contains(&ext.extn_id) {
            bail!("unsupported critical extension {}", ext.extn_id);
        }
    }
    Ok(())
}

fn check_ca(cert: &Certificate, certificates_below: usize) -> Result<()> {
    let constraints: BasicConstraints =
        extension(cert, BASIC_CONSTRAINTS)?.ok_or_else(|| anyhow!("not a CA certificate"))?;
    ensure!(constraints.ca, "not a CA certificate");
    if let Some(limit) = constraints.path_len_constraint {
        ensure!(
            certificates_below <= usize::from(limit),
            "path length constraint {limit} exceeded"
        );
    }
    if let Some(usage) = extension::<KeyUsage>(cert, KEY_USAGE)? {
        ensure!(
            usage.0.contains(KeyUsages::KeyCertSign),
            "key usage does not permit certificate signing"
        );
    }
    Ok(())
}

fn check_leaf_usage(cert: &Certificate) -> Result<()> {
    if let Some(usage) = extension::<KeyUsage>(cert, KEY_USAGE)? {
        ensure!(
            usage.0.contains(KeyUsages::DigitalSignature)
                || usage.0.contains(KeyUsages::NonRepudiation),
            "key usage does not permit signing"
        );
    }
    Ok(())
}

/// Decodes the extension with the given id, if the certificate has it.
pub(crate) fn extension<'a, T: Decode<'a>>(
    cert: &'a Certificate,
    id: ObjectIdentifier,
) -> Result<Option<T>> {
    let Some(ext) = cert
        .tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|ext| ext.extn_id == id)
    else {
        return Ok(None);
    };
    let value = T::from_der(ext.extn_value.as_bytes())
        .map_err(|e| anyhow!("malformed extension {id}: {e}"))?;
    Ok(Some(value))
}

/// Verifies an RSA signature made by `issuer` over `tbs`.
pub(crate) fn verify_signed(
    tbs: &[u8],
    algorithm: &AlgorithmIdentifierOwned,
    signature: &BitString,
    issuer: &Certificate,
    allow_sha1: bool,
) -> Result<()> {
    let key = rsa_public_key(&issuer.tbs_certificate.subject_public_key_info)?;
    let bytes = signature
        .as_bytes()
        .ok_or_else(|| anyhow!("signature is not octet aligned"))?;
    let signature = Signature::try_from(bytes).map_err(|e| anyhow!("bad signature: {e}"))?;

    let verified = match algorithm.oid {
        SHA256_WITH_RSA => VerifyingKey::<Sha256>::new(key).verify(tbs, &signature),
        SHA384_WITH_RSA => VerifyingKey::<Sha384>::new(key).verify(tbs, &signature),
        SHA512_WITH_RSA => VerifyingKey::<Sha512>::new(key).verify(tbs, &signature),
        SHA1_WITH_RSA if allow_sha1 => VerifyingKey::<Sha1>::new(key).verify(tbs, &signature),
        other => bail!("unsupported signature algorithm {other}"),
    };
    verified.map_err(|_| anyhow!("signature does not verify"))
}

pub(crate) fn rsa_public_key(spki: &SubjectPublicKeyInfoOwned) -> Result<RsaPublicKey> {
    let der = spki.to_der().map_err(|e| anyhow!("bad public key: {e}"))?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| anyhow!("not an RSA public key: {e}"))
}

pub(crate) fn to_utc(time: &Time) -> Result<DateTime<Utc>> {
    let secs = i64::try_from(time.to_unix_duration().as_secs())?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| anyhow!("time out of range"))
}
