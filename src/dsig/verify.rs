use std::str::FromStr;

use anyhow::{anyhow, bail, ensure, Result};
use rsa::{
    pkcs1v15::{Signature, VerifyingKey},
    signature::Verifier,
    RsaPublicKey,
};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::{decode_base64, locate_signature, Algorithm};
use crate::{
    namespace,
    xml::{c14n::canonicalize, Document, Element},
};

/// Checks the enveloped signature of `doc` against `key`.
///
/// Every deviation from the signature profile is an error, as is a digest
/// or signature mismatch. The error describes the first problem found.
pub(crate) fn verify_enveloped(doc: &Document, key: &RsaPublicKey) -> Result<()> {
    let signature = locate_signature(doc)?;
    let mut parts = signature.child_elements();

    let signed_info = parts
        .next()
        .filter(|e| e.is(namespace::XMLDSIG, "SignedInfo"))
        .ok_or_else(|| anyhow!("SignedInfo must be the first child of Signature"))?;
    let signature_value = parts
        .next()
        .filter(|e| e.is(namespace::XMLDSIG, "SignatureValue"))
        .ok_or_else(|| anyhow!("SignatureValue must follow SignedInfo"))?;

    let mut info = signed_info.child_elements();
    expect_algorithm(info.next(), "CanonicalizationMethod", Algorithm::C14nWithComments)?;
    expect_algorithm(info.next(), "SignatureMethod", Algorithm::RsaSha1)?;
    let reference = info
        .next()
        .filter(|e| e.is(namespace::XMLDSIG, "Reference"))
        .ok_or_else(|| anyhow!("SignedInfo has no Reference"))?;
    ensure!(info.next().is_none(), "SignedInfo must hold exactly one Reference");

    let expected_digest = check_reference(doc, reference)?;
    let actual_digest = Sha256::digest(canonicalize(doc, &doc.root, &[signature], false));
    log::trace!(
        "Reference digest: expected {}, computed {}",
        hex::encode(&expected_digest),
        hex::encode(actual_digest)
    );
    ensure!(
        actual_digest.as_slice() == expected_digest.as_slice(),
        "reference digest mismatch"
    );

    let signature_bytes = decode_base64(&signature_value.text())?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|e| anyhow!("SignatureValue: {e}"))?;
    let canonical = canonicalize(doc, signed_info, &[], true);
    VerifyingKey::<Sha1>::new(key.clone())
        .verify(&canonical, &signature)
        .map_err(|_| anyhow!("SignatureValue does not verify under the given key"))?;

    log::debug!("Enveloped signature verified");
    Ok(())
}

/// Validates the shape of the single `Reference` and returns its digest.
fn check_reference(doc: &Document, reference: &Element) -> Result<Vec<u8>> {
    let uri = reference
        .attribute("URI")
        .ok_or_else(|| anyhow!("Reference has no URI"))?;
    let root_id = doc
        .root
        .attribute("id")
        .ok_or_else(|| anyhow!("document element has no id attribute"))?;
    ensure!(
        uri.strip_prefix('#') == Some(root_id),
        "Reference URI '{uri}' does not point at the document element"
    );
    let holders = doc.elements_with_id(root_id);
    ensure!(
        holders.len() == 1 && std::ptr::eq(holders[0], &doc.root),
        "id '{root_id}' is ambiguous"
    );

    let mut parts = reference.child_elements();
    let transforms = parts
        .next()
        .filter(|e| e.is(namespace::XMLDSIG, "Transforms"))
        .ok_or_else(|| anyhow!("Reference has no Transforms"))?;
    let mut transform_list = transforms.child_elements();
    expect_algorithm(transform_list.next(), "Transform", Algorithm::EnvelopedSignature)?;
    ensure!(
        transform_list.next().is_none(),
        "only the enveloped-signature transform is accepted"
    );

    expect_algorithm(parts.next(), "DigestMethod", Algorithm::Sha256)?;
    let digest_value = parts
        .next()
        .filter(|e| e.is(namespace::XMLDSIG, "DigestValue"))
        .ok_or_else(|| anyhow!("Reference has no DigestValue"))?;
    ensure!(parts.next().is_none(), "unexpected content after DigestValue");

    decode_base64(&digest_value.text())
}

fn expect_algorithm(element: Option<&Element>, name: &str, expected: Algorithm) -> Result<()> {
    let Some(element) = element.filter(|e| e.is(namespace::XMLDSIG, name)) else {
        bail!("expected {name} element");
    };
    let uri = element
        .attribute("Algorithm")
        .ok_or_else(|| anyhow!("{name} has no Algorithm"))?;
    match Algorithm::from_str(uri) {
        Ok(found) if found == expected => Ok(()),
        _ => bail!("unsupported {name} algorithm '{uri}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dsig::sign::sign_enveloped, testing};

    fn signed_bytes() -> Vec<u8> {
        let mut doc =
            Document::parse(br#"<doc id="d1"><item>value</item><!-- note --></doc>"#).unwrap();
        sign_enveloped(&mut doc, testing::leaf_key(), &[]).unwrap();
        doc.to_bytes()
    }

    fn verify(bytes: &[u8]) -> Result<()> {
        let doc = Document::parse(bytes)?;
        verify_enveloped(&doc, &testing::leaf_key().to_public_key())
    }

    fn replace(bytes: &[u8], from: &str, to: &str) -> Vec<u8> {
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(from), "{from} not found");
        text.replacen(from, to, 1).into_bytes()
    }

    #[test]
    fn accepts_untouched_document() {
        let _ = env_logger::builder().is_test(true).try_init();
        verify(&signed_bytes()).unwrap();
    }

    // The `#id` reference digests the comment-free canonical form, so
    // comment text anywhere under the root, payload included, may change
    // without breaking the signature. Every other byte is covered.
    #[test]
    fn comments_outside_signed_info_are_not_digested() {
        let tampered = replace(&signed_bytes(), "<!-- note -->", "<!-- other -->");
        verify(&tampered).unwrap();
    }

    #[test]
    fn rejects_modified_content() {
        let tampered = replace(&signed_bytes(), ">value<", ">valuf<");
        assert!(verify(&tampered)
            .unwrap_err()
            .to_string()
            .contains("digest mismatch"));
    }

    #[test]
    fn rejects_wrong_key() {
        let doc = Document::parse(&signed_bytes()).unwrap();
        let other = testing::intermediate_key().to_public_key();
        assert!(verify_enveloped(&doc, &other).is_err());
    }

    #[test]
    fn rejects_foreign_algorithms() {
        let bytes = signed_bytes();
        let tampered = replace(
            &bytes,
            Algorithm::RsaSha1.uri(),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        );
        assert!(verify(&tampered).is_err());

        let tampered = replace(
            &bytes,
            Algorithm::C14nWithComments.uri(),
            "http://www.w3.org/TR/2001/REC-xml-c14n-20010315",
        );
        assert!(verify(&tampered).is_err());
    }

    #[test]
    fn rejects_reference_to_other_element() {
        let tampered = replace(&signed_bytes(), "URI=\"#d1\"", "URI=\"#d2\"");
        assert!(verify(&tampered).is_err());
    }

    #[test]
    fn rejects_missing_signature() {
        assert!(verify(br#"<doc id="d1"><item>value</item></doc>"#).is_err());
    }
}
