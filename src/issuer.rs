use serde::{Deserialize, Serialize};

use crate::{error::DecodeError, namespace, xml::Element};

/// Who issued a signed mark: the clearinghouse identifier plus its contact
/// details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerInfo {
    /// Issuer identifier, rendered as the `issuerID` attribute
    pub id: String,
    /// Issuing organization name
    pub organization: String,
    /// Contact email address
    pub email: String,
    /// Issuer website
    pub url: Option<String>,
    /// Contact phone number
    pub voice: Option<String>,
    /// Phone extension for `voice`
    pub voice_ext: Option<String>,
}

impl IssuerInfo {
    /// Creates an issuer with the required fields only.
    pub fn new(
        id: impl Into<String>,
        organization: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        IssuerInfo {
            id: id.into(),
            organization: organization.into(),
            email: email.into(),
            url: None,
            voice: None,
            voice_ext: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the phone number and optional extension.
    pub fn with_voice(mut self, voice: impl Into<String>, ext: Option<&str>) -> Self {
        self.voice = Some(voice.into());
        self.voice_ext = ext.map(ToOwned::to_owned);
        self
    }

    pub(crate) fn to_element(&self) -> Element {
        let ns = Some(namespace::SIGNED_MARK);
        let mut element = Element::new("smd:issuerInfo", ns)
            .with_attribute("issuerID", &self.id)
            .with_child(Element::new("smd:org", ns).with_text(&self.organization))
            .with_child(Element::new("smd:email", ns).with_text(&self.email));
        if let Some(url) = &self.url {
            element = element.with_child(Element::new("smd:url", ns).with_text(url));
        }
        if let Some(voice) = &self.voice {
            let mut voice_element = Element::new("smd:voice", ns);
            if let Some(ext) = &self.voice_ext {
                voice_element = voice_element.with_attribute("x", ext);
            }
            element = element.with_child(voice_element.with_text(voice));
        }
        element
    }

    pub(crate) fn from_element(element: &Element) -> Result<Self, DecodeError> {
        let id = element
            .attribute("issuerID")
            .ok_or(DecodeError::MissingAttribute {
                element: "issuerInfo",
                attribute: "issuerID",
            })?
            .to_owned();

        let mut organization = None;
        let mut email = None;
        let mut url = None;
        let mut voice = None;
        let mut voice_ext = None;

        for child in element.child_elements() {
            if child.namespace.as_deref() != Some(namespace::SIGNED_MARK) {
                return Err(DecodeError::UnexpectedElement {
                    expected: "issuerInfo content",
                    found: child.name.clone(),
                });
            }
            match child.local_name() {
                "org" => organization = Some(child.text()),
                "email" => email = Some(child.text()),
                "url" => url = Some(child.text()),
                "voice" => {
                    voice = Some(child.text());
                    voice_ext = child.attribute("x").map(ToOwned::to_owned);
                }
                _ => {
                    return Err(DecodeError::UnexpectedElement {
                        expected: "org, email, url or voice",
                        found: child.name.clone(),
                    })
                }
            }
        }

        Ok(IssuerInfo {
            id,
            organization: organization.ok_or(DecodeError::MissingElement("org"))?,
            email: email.ok_or(DecodeError::MissingElement("email"))?,
            url,
            voice,
            voice_ext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_round_trip_keeps_optional_fields() {
        let issuer = IssuerInfo::new("2", "Example Inc.", "support@example.tld")
            .with_url("http://www.example.tld")
            .with_voice("+1.7035555555", Some("1234"));
        let parsed = IssuerInfo::from_element(&issuer.to_element()).unwrap();
        assert_eq!(parsed, issuer);
    }

    #[test]
    fn missing_email_is_reported() {
        let ns = Some(namespace::SIGNED_MARK);
        let element = Element::new("smd:issuerInfo", ns)
            .with_attribute("issuerID", "2")
            .with_child(Element::new("smd:org", ns).with_text("Example Inc."));
        assert!(matches!(
            IssuerInfo::from_element(&element),
            Err(DecodeError::MissingElement("email"))
        ));
    }

    #[test]
    fn missing_issuer_id_is_reported() {
        let element = Element::new("smd:issuerInfo", Some(namespace::SIGNED_MARK));
        assert!(matches!(
            IssuerInfo::from_element(&element),
            Err(DecodeError::MissingAttribute {
                attribute: "issuerID",
                ..
            })
        ));
    }
}
