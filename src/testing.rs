//! Keys, certificates and CRLs shared by the unit tests.

use std::{str::FromStr, time::Duration};

use once_cell::sync::Lazy;
use rsa::{
    pkcs1v15::SigningKey,
    signature::{SignatureEncoding, Signer as _},
    RsaPrivateKey,
};
use sha2::Sha256;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    crl::{CertificateList, RevokedCert, TbsCertList},
    der::{asn1::BitString, asn1::UtcTime, Encode},
    name::Name,
    serial_number::SerialNumber,
    spki::{DynSignatureAlgorithmIdentifier, SubjectPublicKeyInfoOwned},
    time::{Time, Validity},
    Certificate, Version,
};

use crate::{issuer::IssuerInfo, payload::ClaimPayload, signed_mark::SignedMark};

// 2020-01-01T00:00:00Z
pub(crate) const EPOCH_2020: u64 = 1_577_836_800;
// 2040-01-01T00:00:00Z
pub(crate) const EPOCH_2040: u64 = 2_208_988_800;

static ROOT_KEY: Lazy<RsaPrivateKey> = Lazy::new(generate_key);
static INTERMEDIATE_KEY: Lazy<RsaPrivateKey> = Lazy::new(generate_key);
static LEAF_KEY: Lazy<RsaPrivateKey> = Lazy::new(generate_key);

static ROOT: Lazy<Certificate> = Lazy::new(|| {
    build_certificate(
        Profile::Root,
        1,
        "CN=Test Clearinghouse Root",
        &ROOT_KEY,
        &ROOT_KEY,
        (EPOCH_2020, EPOCH_2040),
    )
});

static INTERMEDIATE: Lazy<Certificate> = Lazy::new(|| {
    build_certificate(
        Profile::SubCA {
            issuer: ROOT.tbs_certificate.subject.clone(),
            path_len_constraint: Some(0),
        },
        2,
        "CN=Test Clearinghouse Issuing CA",
        &INTERMEDIATE_KEY,
        &ROOT_KEY,
        (EPOCH_2020, EPOCH_2040),
    )
});

static LEAF: Lazy<Certificate> = Lazy::new(|| leaf_with_validity(3, (EPOCH_2020, EPOCH_2040)));

fn generate_key() -> RsaPrivateKey {
    let mut rng = rand::thread_rng();
    RsaPrivateKey::new(&mut rng, 1024).unwrap()
}

fn utc(secs: u64) -> Time {
    Time::UtcTime(UtcTime::from_unix_duration(Duration::from_secs(secs)).unwrap())
}

fn build_certificate(
    profile: Profile,
    serial: u8,
    subject: &str,
    subject_key: &RsaPrivateKey,
    issuer_key: &RsaPrivateKey,
    (not_before, not_after): (u64, u64),
) -> Certificate {
    let spki = SubjectPublicKeyInfoOwned::from_key(subject_key.to_public_key()).unwrap();
    let signer = SigningKey::<Sha256>::new(issuer_key.clone());
    let builder = CertificateBuilder::new(
        profile,
        SerialNumber::new(&[serial]).unwrap(),
        Validity {
            not_before: utc(not_before),
            not_after: utc(not_after),
        },
        Name::from_str(subject).unwrap(),
        spki,
        &signer,
    )
    .unwrap();
    builder.build::<rsa::pkcs1v15::Signature>().unwrap()
}

/// A leaf certificate for the leaf key, issued by the intermediate CA.
pub(crate) fn leaf_with_validity(serial: u8, validity: (u64, u64)) -> Certificate {
    build_certificate(
        Profile::Leaf {
            issuer: INTERMEDIATE.tbs_certificate.subject.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: false,
        },
        serial,
        "CN=Test Signed Mark Signer",
        &LEAF_KEY,
        &INTERMEDIATE_KEY,
        validity,
    )
}

pub(crate) fn root_key() -> &'static RsaPrivateKey {
    &ROOT_KEY
}

pub(crate) fn intermediate_key() -> &'static RsaPrivateKey {
    &INTERMEDIATE_KEY
}

pub(crate) fn leaf_key() -> &'static RsaPrivateKey {
    &LEAF_KEY
}

pub(crate) fn root() -> &'static Certificate {
    &ROOT
}

pub(crate) fn intermediate() -> &'static Certificate {
    &INTERMEDIATE
}

pub(crate) fn leaf() -> &'static Certificate {
    &LEAF
}

/// Leaf and intermediate, the order in which they are embedded.
pub(crate) fn chain() -> Vec<Certificate> {
    vec![leaf().clone(), intermediate().clone()]
}

/// A CRL issued by `issuer_key` under `issuer_name` revoking `serials`.
pub(crate) fn crl(
    issuer_name: &Name,
    issuer_key: &RsaPrivateKey,
    serials: &[u8],
    (this_update, next_update): (u64, u64),
) -> CertificateList {
    let signer = SigningKey::<Sha256>::new(issuer_key.clone());
    let algorithm = signer.signature_algorithm_identifier().unwrap();
    let revoked: Vec<RevokedCert> = serials
        .iter()
        .map(|serial| RevokedCert {
            serial_number: SerialNumber::new(&[*serial]).unwrap(),
            revocation_date: utc(this_update),
            crl_entry_extensions: None,
        })
        .collect();
    let tbs = TbsCertList {
        version: Version::V2,
        signature: algorithm.clone(),
        issuer: issuer_name.clone(),
        this_update: utc(this_update),
        next_update: Some(utc(next_update)),
        revoked_certificates: (!revoked.is_empty()).then_some(revoked),
        crl_extensions: None,
    };
    let signature = signer.sign(&tbs.to_der().unwrap());
    CertificateList {
        tbs_cert_list: tbs,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&signature.to_vec()).unwrap(),
    }
}

pub(crate) fn mark_payload() -> ClaimPayload {
    ClaimPayload::from_xml(
        br#"<mark:mark xmlns:mark="urn:ietf:params:xml:ns:mark-1.0"><mark:trademark><mark:id>00052013734689731373468973-65535</mark:id><mark:markName>Example One</mark:markName><mark:holder entitlement="owner"><mark:org>Example Inc.</mark:org><mark:addr><mark:street>123 Example Dr.</mark:street><mark:city>Reston</mark:city><mark:cc>US</mark:cc></mark:addr></mark:holder><mark:jurisdiction>US</mark:jurisdiction><mark:class>35</mark:class><mark:goodsAndServices>Dirigendas et eiusmodi featuring infringo in airfare et cartam servicia.</mark:goodsAndServices><mark:regNum>234235</mark:regNum><mark:regDate>2009-08-16T09:00:00.0Z</mark:regDate></mark:trademark></mark:mark>"#,
    )
    .unwrap()
}

pub(crate) fn issuer() -> IssuerInfo {
    IssuerInfo::new("2", "Example Inc.", "support@example.tld")
        .with_url("http://www.example.tld")
        .with_voice("+1.7035555555", Some("1234"))
}

/// An unsigned signed mark valid from 2020 to 2040.
pub(crate) fn unsigned_mark(id: &str) -> SignedMark {
    SignedMark::new(
        id,
        issuer(),
        chrono::DateTime::from_timestamp(EPOCH_2020 as i64, 0).unwrap(),
        chrono::DateTime::from_timestamp(EPOCH_2040 as i64, 0).unwrap(),
        mark_payload(),
    )
}

/// A signed mark signed by the leaf key with the leaf and intermediate
/// certificates embedded.
pub(crate) fn signed_mark(id: &str) -> SignedMark {
    let mut mark = unsigned_mark(id);
    mark.sign(leaf_key(), Some(chain().as_slice())).unwrap();
    mark
}
