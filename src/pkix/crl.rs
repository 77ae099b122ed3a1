use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use x509_cert::{
    ext::pkix::{KeyUsage, KeyUsages},
    Certificate,
};

use super::{
    path::{extension, to_utc, verify_signed, KEY_USAGE},
    EncodedCrl,
};

/// Fails unless a current CRL signed by `issuer` covers `cert` and does not
/// list its serial number.
///
/// A CRL is current when its `thisUpdate` is not after `time` and its
/// `nextUpdate`, if any, is not before it. CRLs with a bad signature are
/// skipped.
pub(crate) fn check_not_revoked(
    cert: &Certificate,
    issuer: &Certificate,
    crls: &[EncodedCrl],
    time: DateTime<Utc>,
    allow_sha1: bool,
) -> Result<()> {
    let subject = &cert.tbs_certificate.subject;
    let serial = &cert.tbs_certificate.serial_number;

    if let Some(usage) = extension::<KeyUsage>(issuer, KEY_USAGE)? {
        if !usage.0.contains(KeyUsages::CRLSign) {
            bail!("issuer of '{subject}' may not sign CRLs");
        }
    }

    let mut covered = false;
    for crl in crls
        .iter()
        .filter(|crl| crl.tbs_cert_list.issuer == cert.tbs_certificate.issuer)
    {
        let tbs = &crl.tbs_cert_list;
        let Ok(tbs_der) = crl.signed_der() else {
            continue;
        };
        if let Err(e) = verify_signed(
            tbs_der,
            &crl.signature_algorithm,
            &crl.signature,
            issuer,
            allow_sha1,
        ) {
            log::debug!("Skipping CRL from '{}': {e}", tbs.issuer);
            continue;
        }
        if to_utc(&tbs.this_update)? > time {
            log::debug!("Skipping CRL from '{}': not yet issued", tbs.issuer);
            continue;
        }
        if let Some(next_update) = &tbs.next_update {
            if to_utc(next_update)? < time {
                log::debug!("Skipping CRL from '{}': stale", tbs.issuer);
                continue;
            }
        }
        covered = true;

        for revoked in tbs.revoked_certificates.iter().flatten() {
            if &revoked.serial_number == serial && to_utc(&revoked.revocation_date)? <= time {
                bail!("'{subject}' (serial {serial}) is revoked");
            }
        }
    }

    if !covered {
        bail!("no current CRL covers '{subject}'");
    }
    log::trace!("'{subject}' is not revoked");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use x509_cert::{crl::CertificateList, der::Encode};

    use super::*;
    use crate::{
        pkix::{PkixParameters, ValidationOptions},
        testing::{self, EPOCH_2020, EPOCH_2040},
    };

    const NOW: u64 = EPOCH_2020 + 86_400;

    fn params(crls: Vec<CertificateList>) -> PkixParameters {
        let mut params =
            PkixParameters::new(vec![testing::root().clone()]).with_options(ValidationOptions {
                revocation_enabled: true,
                validation_time: Utc.timestamp_opt(NOW as i64, 0).single(),
                ..Default::default()
            });
        for crl in crls {
            params.add_crl(crl).unwrap();
        }
        params
    }

    fn root_crl(serials: &[u8]) -> CertificateList {
        testing::crl(
            &testing::root().tbs_certificate.subject,
            testing::root_key(),
            serials,
            (EPOCH_2020, EPOCH_2040),
        )
    }

    fn intermediate_crl(serials: &[u8], validity: (u64, u64)) -> CertificateList {
        testing::crl(
            &testing::intermediate().tbs_certificate.subject,
            testing::intermediate_key(),
            serials,
            validity,
        )
    }

    #[test]
    fn passes_with_current_crls() {
        let _ = env_logger::builder().is_test(true).try_init();
        let params = params(vec![
            root_crl(&[]),
            intermediate_crl(&[9], (EPOCH_2020, EPOCH_2040)),
        ]);
        assert!(params.validate(&testing::chain()).is_ok());
    }

    #[test]
    fn revoked_leaf_fails() {
        let params = params(vec![
            root_crl(&[]),
            intermediate_crl(&[3], (EPOCH_2020, EPOCH_2040)),
        ]);
        let err = params.validate(&testing::chain()).unwrap_err();
        assert!(err.to_string().contains("revoked"), "{err}");
    }

    #[test]
    fn missing_crl_fails() {
        let params = params(vec![intermediate_crl(&[], (EPOCH_2020, EPOCH_2040))]);
        assert!(params.validate(&testing::chain()).is_err());
    }

    #[test]
    fn stale_crl_does_not_count() {
        let params = params(vec![
            root_crl(&[]),
            intermediate_crl(&[], (EPOCH_2020, EPOCH_2020 + 3_600)),
        ]);
        assert!(params.validate(&testing::chain()).is_err());
    }

    #[test]
    fn crl_signed_by_wrong_key_is_ignored() {
        let forged = testing::crl(
            &testing::intermediate().tbs_certificate.subject,
            testing::leaf_key(),
            &[],
            (EPOCH_2020, EPOCH_2040),
        );
        let params = params(vec![root_crl(&[]), forged]);
        assert!(params.validate(&testing::chain()).is_err());
    }

    #[test]
    fn crl_round_trips_through_der() {
        let crl = root_crl(&[7]);
        let mut params = PkixParameters::default();
        let der = crl.to_der().unwrap();
        params.add_crl_der(&der).unwrap();
        assert_eq!(params.crls[0].value(), &crl);
        assert_eq!(params.crls[0].der(), der.as_slice());
        assert!(params.add_crl_der(b"\x30\x00").is_err());
    }
}
