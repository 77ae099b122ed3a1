use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    pkix::TrustAnchorSource, revocation::RevocationList, signed_mark::SignedMark,
};

/// Outcome of [`SmdVerifier::verify`].
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Trusted, not revoked and within its validity window
    Accepted,
    /// The bytes are not a signed mark
    Malformed,
    /// Signature or certificate chain did not validate
    InvalidSignature,
    /// Listed in the revocation list
    Revoked,
    /// Outside `notBefore`..`notAfter`
    OutsideValidityPeriod,
}

impl Verdict {
    pub fn is_accepted(self) -> bool {
        self == Verdict::Accepted
    }
}

/// Combines decoding, trust-chain validation, the revocation list and the
/// validity window into a single accept or reject decision.
#[derive(Debug)]
pub struct SmdVerifier<A> {
    anchors: A,
    revocations: Option<RevocationList>,
}

impl<A: TrustAnchorSource> SmdVerifier<A> {
    pub fn new(anchors: A) -> Self {
        SmdVerifier {
            anchors,
            revocations: None,
        }
    }

    pub fn with_revocations(mut self, revocations: RevocationList) -> Self {
        self.revocations = Some(revocations);
        self
    }

    /// Replaces the revocation list, e.g. after downloading a newer one.
    pub fn set_revocations(&mut self, revocations: RevocationList) {
        self.revocations = Some(revocations);
    }

    pub fn revocations(&self) -> Option<&RevocationList> {
        self.revocations.as_ref()
    }

    /// Verifies raw signed mark bytes at the current time.
    pub fn verify(&self, bytes: &[u8]) -> Verdict {
        self.verify_at(bytes, Utc::now())
    }

    /// Verifies raw signed mark bytes, checking the validity window at
    /// `instant`.
    pub fn verify_at(&self, bytes: &[u8], instant: DateTime<Utc>) -> Verdict {
        match SignedMark::decode(bytes) {
            Ok(mark) => self.verify_mark_at(&mark, instant),
            Err(e) => {
                log::debug!("Signed mark rejected as malformed: {e}");
                Verdict::Malformed
            }
        }
    }

    /// Verifies an already decoded signed mark.
    pub fn verify_mark_at(&self, mark: &SignedMark, instant: DateTime<Utc>) -> Verdict {
        let verdict = if !mark.validate_chain(&self.anchors) {
            Verdict::InvalidSignature
        } else if self
            .revocations
            .as_ref()
            .is_some_and(|list| list.is_revoked(mark))
        {
            Verdict::Revoked
        } else if !mark.is_valid_at(instant) {
            Verdict::OutsideValidityPeriod
        } else {
            Verdict::Accepted
        };
        log::debug!("Signed mark '{}': {verdict}", mark.id());
        verdict
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        pkix::PkixParameters,
        testing::{self, EPOCH_2040},
    };

    fn verifier() -> SmdVerifier<PkixParameters> {
        SmdVerifier::new(PkixParameters::new(vec![testing::root().clone()]))
    }

    #[test]
    fn accepts_trusted_mark() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mark = testing::signed_mark("1-2");
        let verdict = verifier().verify(mark.encode().unwrap());
        assert_eq!(verdict, Verdict::Accepted);
        assert!(verdict.is_accepted());
    }

    #[test]
    fn revoked_mark_is_rejected_despite_valid_signature() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mark = testing::signed_mark("1-2");
        let mut list = RevocationList::new(Utc::now());
        list.revoke("1-2", Utc::now());
        let verifier = verifier().with_revocations(list);
        assert!(mark.validate_chain(&PkixParameters::new(vec![testing::root().clone()])));
        assert_eq!(verifier.verify(mark.encode().unwrap()), Verdict::Revoked);
        assert_eq!(
            verifier.verify(testing::signed_mark("1-3").encode().unwrap()),
            Verdict::Accepted
        );
    }

    #[test]
    fn outcomes_are_ordered() {
        let _ = env_logger::builder().is_test(true).try_init();
        let verifier = verifier();
        assert_eq!(verifier.verify(b"<not-xml"), Verdict::Malformed);

        let mut without_chain = testing::unsigned_mark("1-2");
        without_chain.sign(testing::leaf_key(), None).unwrap();
        assert_eq!(
            verifier.verify(without_chain.encode().unwrap()),
            Verdict::InvalidSignature
        );

        let signed = testing::signed_mark("1-2");
        let later = Utc.timestamp_opt(EPOCH_2040 as i64 + 1, 0).unwrap();
        assert_eq!(
            verifier.verify_at(signed.encode().unwrap(), later),
            Verdict::OutsideValidityPeriod
        );
    }

    #[test]
    fn verdict_names() {
        assert_eq!(Verdict::OutsideValidityPeriod.to_string(), "outside_validity_period");
        assert_eq!(Verdict::from_str("revoked").unwrap(), Verdict::Revoked);
        assert_eq!(
            serde_json::to_string(&Verdict::InvalidSignature).unwrap(),
            "\"invalid_signature\""
        );
    }
}
