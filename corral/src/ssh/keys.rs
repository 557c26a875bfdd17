use base64::Engine as _;
use thiserror::Error;

use crate::id::Fingerprint;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("an authorized key line is '<algorithm> <base64-blob> [comment]'")]
    Malformed,
    #[error("the key blob is not valid base64")]
    Encoding,
    #[error("the key blob does not match its declared algorithm")]
    AlgorithmMismatch,
}

/// A marshalled SSH public key: the declared algorithm, the decoded wire
/// blob, and an optional comment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: String,
    pub blob: Vec<u8>,
    pub comment: Option<String>,
}

impl PublicKey {
    /// Normalized `authorized_keys` form, comment dropped.
    pub fn marshal(&self) -> String {
        format!(
            "{} {}",
            self.algorithm,
            base64::engine::general_purpose::STANDARD.encode(&self.blob)
        )
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_key_blob(&self.blob)
    }
}

/// Parse one line in `authorized_keys` format. The blob must embed the same
/// algorithm name the line declares.
pub fn parse_authorized_key(line: &str) -> Result<PublicKey, KeyError> {
    let mut parts = line.split_whitespace();
    let algorithm = parts.next().ok_or(KeyError::Malformed)?;
    let encoded = parts.next().ok_or(KeyError::Malformed)?;
    let comment = parts.next().map(str::to_string);

    let blob = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| KeyError::Encoding)?;

    // The wire format leads with a length-prefixed algorithm name.
    if blob.len() < 4 {
        return Err(KeyError::AlgorithmMismatch);
    }
    let len = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
    let embedded = blob
        .get(4..4 + len)
        .ok_or(KeyError::AlgorithmMismatch)?;
    if embedded != algorithm.as_bytes() {
        return Err(KeyError::AlgorithmMismatch);
    }

    Ok(PublicKey {
        algorithm: algorithm.to_string(),
        blob,
        comment,
    })
}

#[cfg(test)]
pub(crate) fn example_key_line(seed: u8) -> String {
    let algorithm = b"ssh-ed25519";
    let mut blob = Vec::new();
    blob.extend_from_slice(&(algorithm.len() as u32).to_be_bytes());
    blob.extend_from_slice(algorithm);
    blob.extend_from_slice(&4u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 4]);
    format!(
        "ssh-ed25519 {} user@example",
        base64::engine::general_purpose::STANDARD.encode(blob)
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let line = example_key_line(7);
        let key = parse_authorized_key(&line).unwrap();

        assert_eq!(key.algorithm, "ssh-ed25519");
        assert_eq!(key.comment.as_deref(), Some("user@example"));
        // Marshalling drops the comment but keeps the blob.
        let marshalled = key.marshal();
        assert!(line.starts_with(&marshalled));
        assert_eq!(parse_authorized_key(&marshalled).unwrap().blob, key.blob);
    }

    #[test]
    fn fingerprints_are_stable() {
        let a = parse_authorized_key(&example_key_line(1)).unwrap();
        let b = parse_authorized_key(&example_key_line(2)).unwrap();

        assert_eq!(a.fingerprint(), a.fingerprint());
        assert_ne!(a.fingerprint().to_hex(), b.fingerprint().to_hex());
    }

    #[test]
    fn rejects_bad_lines() {
        assert_eq!(parse_authorized_key("ssh-ed25519"), Err(KeyError::Malformed));
        assert_eq!(
            parse_authorized_key("ssh-ed25519 ////***"),
            Err(KeyError::Encoding)
        );
        // Blob declares a different algorithm than the line.
        let line = example_key_line(3).replace("ssh-ed25519 ", "ssh-rsa ");
        assert_eq!(parse_authorized_key(&line), Err(KeyError::AlgorithmMismatch));
    }
}
