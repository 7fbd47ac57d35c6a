//! Decoder for the v201 secret format.
//!
//! Releases up to v201 wrote secrets as a run of 3-digit decimal groups
//! behind a fixed marker; each group `g` encodes the byte `500 - g`. Kept
//! only so secrets written by those releases stay readable; nothing ever
//! produces this format again.

use crate::error::Error;

/// Marker preceding the encoded groups.
pub(crate) const MARKER: &str = "123456789";

/// True when `data` carries the legacy marker and may be worth a decode
/// attempt.
pub(crate) fn looks_legacy(data: &str) -> bool {
    data.contains(MARKER)
}

/// Decode a v201-encoded secret into its raw bytes.
///
/// # Errors
/// Returns [`Error::MalformedSecret`] when the marker is missing or the
/// groups behind it are not well-formed 3-digit values in range.
pub(crate) fn decode(data: &str) -> Result<Vec<u8>, Error> {
    let start = data
        .find(MARKER)
        .ok_or_else(|| Error::MalformedSecret("legacy marker not found".to_string()))?
        + MARKER.len();
    let groups = &data[start..];
    if groups.len() % 3 != 0 {
        return Err(Error::MalformedSecret(
            "truncated legacy group".to_string(),
        ));
    }
    let mut bytes = Vec::with_capacity(groups.len() / 3);
    for group in groups.as_bytes().chunks(3) {
        let value: u16 = std::str::from_utf8(group)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| Error::MalformedSecret("legacy group is not numeric".to_string()))?;
        let byte = 500u16
            .checked_sub(value)
            .and_then(|byte| u8::try_from(byte).ok())
            .ok_or_else(|| Error::MalformedSecret("legacy group out of range".to_string()))?;
        bytes.push(byte);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_fixture_decodes() {
        // "secret" encoded by a v201 release.
        let decoded = decode("123456789385399401386399384").expect("decode");
        assert_eq!(decoded, b"secret");
    }

    #[test]
    fn leading_prefix_before_the_marker_is_ignored() {
        let decoded = decode("junk-ahead123456789385399401386399384").expect("decode");
        assert_eq!(decoded, b"secret");
    }

    #[test]
    fn empty_payload_decodes_to_nothing() {
        assert_eq!(decode("123456789").expect("decode"), Vec::<u8>::new());
    }

    #[test]
    fn bad_groups_are_malformed() {
        for data in [
            "no-marker-at-all",
            "12345678938",     // truncated group
            "123456789x85",    // not numeric
            "123456789100",    // 500 - 100 does not fit a byte
        ] {
            assert!(
                matches!(decode(data), Err(Error::MalformedSecret(_))),
                "{data:?} should be malformed"
            );
        }
    }
}
