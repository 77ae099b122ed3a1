use base64::engine::{general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use x509_cert::{der::Encode, Certificate};

use super::Algorithm;
use crate::{
    error::SigningError,
    namespace,
    signer::Signer,
    xml::{c14n::canonicalize, Document, Element, Node},
};

/// Signs `doc` in place, appending an enveloped `Signature` to its root.
///
/// The root must carry a unique `id` attribute, which the single
/// `Reference` points at. `certificates` (leaf first) are embedded in
/// `KeyInfo` when not empty. On error `doc` is left untouched.
pub(crate) fn sign_enveloped(
    doc: &mut Document,
    signer: &impl Signer,
    certificates: &[Certificate],
) -> Result<(), SigningError> {
    let reference_id = doc
        .root
        .attribute("id")
        .ok_or(SigningError::MissingAttribute("id"))?
        .to_owned();
    let holders = doc.elements_with_id(&reference_id).len();
    if holders != 1 {
        return Err(SigningError::Structure(format!(
            "id '{reference_id}' is carried by {holders} elements"
        )));
    }

    let digest = Sha256::digest(canonicalize(doc, &doc.root, &[], false));
    log::trace!("Reference digest: {}", hex::encode(digest));

    let mut encoded_certificates = Vec::with_capacity(certificates.len());
    for cert in certificates {
        let der = cert
            .to_der()
            .map_err(|e| SigningError::Structure(format!("certificate encoding: {e}")))?;
        encoded_certificates.push(BASE64.encode(der));
    }

    let mut signed = doc.clone();
    signed.root.children.push(Node::Element(signature_template(
        &reference_id,
        &BASE64.encode(digest),
        &encoded_certificates,
    )));

    let signature_value = {
        let signature = signed
            .root
            .child_elements()
            .last()
            .ok_or_else(|| SigningError::Structure("signature was not attached".to_owned()))?;
        let signed_info = signature
            .find_child(namespace::XMLDSIG, "SignedInfo")
            .ok_or_else(|| SigningError::Structure("SignedInfo missing".to_owned()))?;
        let canonical = canonicalize(&signed, signed_info, &[], true);
        log::trace!("Canonical SignedInfo: {}", String::from_utf8_lossy(&canonical));
        signer.sign(&canonical)?
    };

    let signature = signed
        .root
        .child_elements_mut()
        .last()
        .ok_or_else(|| SigningError::Structure("signature was not attached".to_owned()))?;
    let value = signature
        .child_elements_mut()
        .find(|e| e.is(namespace::XMLDSIG, "SignatureValue"))
        .ok_or_else(|| SigningError::Structure("SignatureValue missing".to_owned()))?;
    value.set_text(BASE64.encode(signature_value));

    *doc = signed;
    Ok(())
}

fn signature_template(reference_id: &str, digest: &str, certificates: &[String]) -> Element {
    let ds = Some(namespace::XMLDSIG);
    let algorithm = |name: &str, alg: Algorithm| {
        Element::new(name, ds).with_attribute("Algorithm", alg.uri())
    };

    let reference = Element::new("Reference", ds)
        .with_attribute("URI", format!("#{reference_id}"))
        .with_child(
            Element::new("Transforms", ds)
                .with_child(algorithm("Transform", Algorithm::EnvelopedSignature)),
        )
        .with_child(algorithm("DigestMethod", Algorithm::Sha256))
        .with_child(Element::new("DigestValue", ds).with_text(digest));

    let signed_info = Element::new("SignedInfo", ds)
        .with_child(algorithm("CanonicalizationMethod", Algorithm::C14nWithComments))
        .with_child(algorithm("SignatureMethod", Algorithm::RsaSha1))
        .with_child(reference);

    let mut signature = Element::new("Signature", ds)
        .with_namespace_declaration("", namespace::XMLDSIG)
        .with_child(signed_info)
        .with_child(Element::new("SignatureValue", ds));

    if !certificates.is_empty() {
        let x509_data = certificates.iter().fold(Element::new("X509Data", ds), |data, cert| {
            data.with_child(Element::new("X509Certificate", ds).with_text(cert))
        });
        signature = signature.with_child(Element::new("KeyInfo", ds).with_child(x509_data));
    }
    signature
}
