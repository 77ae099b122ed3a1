//! The SMD revocation list: a versioned, line-oriented text file naming
//! signed marks withdrawn before their `notAfter`.
//!
//! ```text
//! 1,2013-11-24T23:15:37.4Z
//! smd-id,insertion-datetime
//! 0000001681375789102250-65535,2013-08-09T12:00:00.0Z
//! ```

use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DecodeError, EncodeError},
    signed_mark::SignedMark,
};

/// Literal second line of every revocation list.
pub const HEADER: &str = "smd-id,insertion-datetime";

/// Format version written by [`RevocationList::default`].
pub const DEFAULT_FORMAT_VERSION: u32 = 1;

/// One revoked signed mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedEntry {
    /// Identifier of the revoked signed mark
    pub id: String,
    /// When the revocation was inserted
    pub revoked_at: DateTime<Utc>,
}

impl RevokedEntry {
    pub fn new(id: impl Into<String>, revoked_at: DateTime<Utc>) -> Self {
        RevokedEntry {
            id: id.into(),
            revoked_at,
        }
    }

    fn check_encodable(&self) -> Result<(), EncodeError> {
        if self.id.is_empty() {
            return Err(EncodeError::MissingAttribute("smd-id"));
        }
        if self.id.contains([',', '\n', '\r']) {
            return Err(EncodeError::InvalidValue {
                field: "smd-id",
                value: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Formats as `<id>,<revoked-at>`; fractional seconds are kept.
impl fmt::Display for RevokedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.id, format_timestamp(self.revoked_at))
    }
}

/// Parses `<id>,<revoked-at>`, splitting on the first comma.
impl FromStr for RevokedEntry {
    type Err = DecodeError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (id, timestamp) = line.split_once(',').ok_or_else(|| DecodeError::InvalidValue {
            element: "revocation entry",
            value: line.to_owned(),
        })?;
        if id.is_empty() {
            return Err(DecodeError::InvalidValue {
                element: "smd-id",
                value: line.to_owned(),
            });
        }
        Ok(RevokedEntry {
            id: id.to_owned(),
            revoked_at: parse_timestamp(timestamp, "insertion-datetime")?,
        })
    }
}

/// A decoded revocation list.
///
/// Entries keep insertion order; lookups match identifiers exactly, case
/// included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationList {
    /// Value of the first field on line 1
    pub format_version: u32,
    /// Creation time from line 1; required to encode
    pub created_at: Option<DateTime<Utc>>,
    entries: Vec<RevokedEntry>,
}

impl Default for RevocationList {
    fn default() -> Self {
        RevocationList {
            format_version: DEFAULT_FORMAT_VERSION,
            created_at: None,
            entries: Vec::new(),
        }
    }
}

impl RevocationList {
    /// Creates an empty list created at `created_at`.
    pub fn new(created_at: DateTime<Utc>) -> Self {
        RevocationList {
            created_at: Some(created_at),
            ..Default::default()
        }
    }

    /// Appends an entry. Duplicates are kept.
    pub fn add(&mut self, entry: RevokedEntry) {
        self.entries.push(entry);
    }

    pub fn revoke(&mut self, id: impl Into<String>, revoked_at: DateTime<Utc>) {
        self.add(RevokedEntry::new(id, revoked_at));
    }

    /// True when the signed mark's identifier is listed.
    ///
    /// This looks at the identifier only; combine it with signature
    /// validation to decide whether to accept a signed mark.
    pub fn is_revoked(&self, mark: &SignedMark) -> bool {
        self.is_id_revoked(mark.id())
    }

    pub fn is_id_revoked(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    /// First entry revoking `id`.
    pub fn entry(&self, id: &str) -> Option<&RevokedEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn entries(&self) -> &[RevokedEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RevokedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the list in its text form, one `\n`-terminated line per record.
    pub fn encode(&self) -> Result<String, EncodeError> {
        let created_at = self
            .created_at
            .ok_or(EncodeError::MissingAttribute("created_at"))?;

        let mut out = format!(
            "{},{}\n{HEADER}\n",
            self.format_version,
            format_timestamp(created_at)
        );
        for entry in &self.entries {
            entry.check_encodable()?;
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        Ok(out)
    }

    /// Decodes a UTF-8 revocation list.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::decode_str(std::str::from_utf8(bytes)?)
    }

    /// Decodes a revocation list.
    ///
    /// Decoding is strict: the version line, the header and every record
    /// must be well-formed, and an error names the offending line. A single
    /// trailing newline is allowed; blank lines are not.
    pub fn decode_str(text: &str) -> Result<Self, DecodeError> {
        let mut lines = text.lines();

        let version_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or(DecodeError::MissingVersionLine)?;
        let (format_version, created_at) = parse_version_line(version_line)?;

        match lines.next() {
            None => return Err(DecodeError::MissingHeader),
            Some(HEADER) => {}
            Some(line) => {
                return Err(DecodeError::UnexpectedHeader {
                    line: line.to_owned(),
                })
            }
        }

        let mut entries = Vec::new();
        for (index, line) in lines.enumerate() {
            let entry = line
                .parse::<RevokedEntry>()
                .map_err(|e| DecodeError::MalformedEntry {
                    line_number: index + 3,
                    line: line.to_owned(),
                    reason: e.to_string(),
                })?;
            entries.push(entry);
        }

        log::debug!(
            "Decoded revocation list version {format_version} with {} entries",
            entries.len()
        );
        Ok(RevocationList {
            format_version,
            created_at: Some(created_at),
            entries,
        })
    }
}

impl FromStr for RevocationList {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode_str(s)
    }
}

impl<'a> IntoIterator for &'a RevocationList {
    type Item = &'a RevokedEntry;
    type IntoIter = std::slice::Iter<'a, RevokedEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn parse_version_line(line: &str) -> Result<(u32, DateTime<Utc>), DecodeError> {
    let malformed = |reason: String| DecodeError::MalformedVersionLine {
        line: line.to_owned(),
        reason,
    };
    let (version, created) = line
        .split_once(',')
        .ok_or_else(|| malformed("expected '<version>,<created-at>'".to_owned()))?;
    let version = version
        .parse::<u32>()
        .map_err(|e| malformed(format!("version: {e}")))?;
    let created = parse_timestamp(created, "created-at").map_err(|e| malformed(e.to_string()))?;
    Ok((version, created))
}

fn parse_timestamp(value: &str, element: &'static str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| DecodeError::InvalidDateTime {
            element,
            value: value.to_owned(),
            source,
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::testing;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn scenario_exact_case_sensitive_lookup() {
        let _ = env_logger::builder().is_test(true).try_init();
        let list = RevocationList::decode(
            b"1,2024-01-01T00:00:00Z\nsmd-id,insertion-datetime\nSMD001,2024-02-15T12:00:00Z\n",
        )
        .unwrap();
        assert_eq!(list.format_version, 1);
        assert_eq!(list.created_at, Some(ts(2024, 1, 1, 0, 0, 0)));
        assert_eq!(list.len(), 1);

        assert!(list.is_revoked(&testing::unsigned_mark("SMD001")));
        assert!(!list.is_revoked(&testing::unsigned_mark("smd001")));
        assert_eq!(
            list.entry("SMD001").unwrap().revoked_at,
            ts(2024, 2, 15, 12, 0, 0)
        );
    }

    #[test]
    fn revocation_is_independent_of_signature() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mark = testing::signed_mark("0000001681375789102250-65535");
        assert!(mark.validate(&testing::leaf_key().to_public_key()));

        let mut list = RevocationList::new(ts(2024, 1, 1, 0, 0, 0));
        assert!(!list.is_revoked(&mark));
        list.revoke(mark.id(), ts(2024, 3, 1, 0, 0, 0));
        assert!(list.is_revoked(&mark));
        assert!(mark.validate(&testing::leaf_key().to_public_key()));
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut list = RevocationList::new(ts(2013, 11, 24, 23, 15, 37));
        list.revoke("0000001681375789102250-65535", ts(2013, 8, 9, 12, 0, 0));
        list.revoke("0000001691375789102250-65535", ts(2013, 8, 9, 13, 0, 0));
        list.revoke("0000001681375789102250-65535", ts(2013, 8, 10, 9, 30, 0));

        let text = list.encode().unwrap();
        assert_eq!(
            text,
            "1,2013-11-24T23:15:37Z\n\
             smd-id,insertion-datetime\n\
             0000001681375789102250-65535,2013-08-09T12:00:00Z\n\
             0000001691375789102250-65535,2013-08-09T13:00:00Z\n\
             0000001681375789102250-65535,2013-08-10T09:30:00Z\n"
        );
        let decoded = RevocationList::decode_str(&text).unwrap();
        assert_eq!(decoded, list);
        assert_eq!(decoded.iter().count(), 3);
    }

    #[test]
    fn decode_accepts_fractions_offsets_and_no_trailing_newline() {
        let list = RevocationList::decode_str(
            "2,2013-11-24T23:15:37.4Z\r\nsmd-id,insertion-datetime\r\nabc,2013-08-09T14:00:00.5+02:00",
        )
        .unwrap();
        assert_eq!(list.format_version, 2);
        let entry = &list.entries()[0];
        assert_eq!(entry.id, "abc");
        assert_eq!(
            entry.revoked_at,
            ts(2013, 8, 9, 12, 0, 0) + chrono::Duration::milliseconds(500)
        );
    }

    #[test]
    fn fractional_seconds_survive_round_trip() {
        let list = RevocationList::decode_str(
            "1,2013-11-24T23:15:37.4Z\nsmd-id,insertion-datetime\nabc,2013-08-09T12:00:00.5Z\n",
        )
        .unwrap();
        let text = list.encode().unwrap();
        assert_eq!(
            text,
            "1,2013-11-24T23:15:37.400Z\n\
             smd-id,insertion-datetime\n\
             abc,2013-08-09T12:00:00.500Z\n"
        );
        let decoded = RevocationList::decode_str(&text).unwrap();
        assert_eq!(decoded, list);
        assert_eq!(
            decoded.created_at,
            Some(ts(2013, 11, 24, 23, 15, 37) + chrono::Duration::milliseconds(400))
        );
    }

    #[test]
    fn empty_list_round_trips() {
        let list = RevocationList::decode_str("1,2024-01-01T00:00:00Z\nsmd-id,insertion-datetime\n")
            .unwrap();
        assert!(list.is_empty());
        assert_eq!(RevocationList::decode_str(&list.encode().unwrap()).unwrap(), list);
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(matches!(
            RevocationList::decode_str("1,2024-01-01T00:00:00Z\nSMD001,2024-02-15T12:00:00Z\n"),
            Err(DecodeError::UnexpectedHeader { .. })
        ));
        assert!(matches!(
            RevocationList::decode_str("1,2024-01-01T00:00:00Z\n"),
            Err(DecodeError::MissingHeader)
        ));
        assert!(matches!(
            RevocationList::decode_str(""),
            Err(DecodeError::MissingVersionLine)
        ));
    }

    #[test]
    fn malformed_version_line_is_rejected() {
        for text in ["1;2024-01-01T00:00:00Z", "one,2024-01-01T00:00:00Z", "1,yesterday"] {
            let input = format!("{text}\n{HEADER}\n");
            assert!(
                matches!(
                    RevocationList::decode_str(&input),
                    Err(DecodeError::MalformedVersionLine { .. })
                ),
                "{text}"
            );
        }
    }

    #[test]
    fn bad_timestamp_cites_line() {
        let err = RevocationList::decode_str(
            "1,2024-01-01T00:00:00Z\nsmd-id,insertion-datetime\nSMD001,2024-02-15T12:00:00Z\nSMD002,not-a-date\n",
        )
        .unwrap_err();
        match &err {
            DecodeError::MalformedEntry {
                line_number, line, ..
            } => {
                assert_eq!(*line_number, 4);
                assert_eq!(line, "SMD002,not-a-date");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("SMD002,not-a-date"));
    }

    #[test]
    fn blank_and_comma_less_lines_are_rejected() {
        for body in ["\n\n", "SMD001\n", ",2024-02-15T12:00:00Z\n"] {
            let input = format!("1,2024-01-01T00:00:00Z\n{HEADER}\n{body}");
            assert!(
                matches!(
                    RevocationList::decode_str(&input),
                    Err(DecodeError::MalformedEntry { line_number: 3, .. })
                ),
                "{body:?}"
            );
        }
    }

    #[test]
    fn encode_requires_created_at_and_plain_ids() {
        let mut list = RevocationList::default();
        list.revoke("a", ts(2024, 1, 1, 0, 0, 0));
        assert!(matches!(
            list.encode(),
            Err(EncodeError::MissingAttribute("created_at"))
        ));

        list.created_at = Some(ts(2024, 1, 1, 0, 0, 0));
        list.revoke("b,c", ts(2024, 1, 1, 0, 0, 0));
        assert!(matches!(
            list.encode(),
            Err(EncodeError::InvalidValue { field: "smd-id", .. })
        ));
    }

    #[test]
    fn entry_display_and_parse() {
        let entry: RevokedEntry = "id-1,2024-02-15T12:00:00.000Z".parse().unwrap();
        assert_eq!(entry.to_string(), "id-1,2024-02-15T12:00:00Z");
        let with_comma_in_rest: Result<RevokedEntry, _> = "a,b,c".parse();
        assert!(with_comma_in_rest.is_err());
    }
}
