use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::{Language, TemperatureBand};

/// Cache-key schema version. Bump when the hashing strategy changes so old
/// entries invalidate cleanly.
const SCHEMA_VERSION: char = '1';

/// Deterministic identifier for a cacheable unit of work: lower-case hex
/// SHA-256 over a canonical byte encoding, prefixed with the schema version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update(b"\0");
            }
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(1 + digest.len() * 2);
        out.push(SCHEMA_VERSION);
        for byte in digest {
            out.push_str(&format!("{:02x}", byte));
        }
        Fingerprint(out)
    }

    /// `"file:" ‖ path ‖ "\0" ‖ language ‖ "\0" ‖ content`
    pub fn for_file(path: &str, language: &Language, content: &[u8]) -> Self {
        Self::from_parts(&[
            b"file:",
            path.as_bytes(),
            language.as_str().as_bytes(),
            content,
        ])
    }

    /// `"image:" ‖ path ‖ "\0" ‖ content`
    pub fn for_image(path: &str, content: &[u8]) -> Self {
        Self::from_parts(&[b"image:", path.as_bytes(), content])
    }

    /// `"llm:" ‖ model ‖ "\0" ‖ system ‖ "\0" ‖ prompt ‖ "\0" ‖ context ‖ "\0" ‖ band`
    ///
    /// `context` must already be canonicalized (sorted keys) by the caller.
    pub fn for_llm(
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        canonical_context: &str,
        band: TemperatureBand,
    ) -> Self {
        Self::from_parts(&[
            b"llm:",
            model.as_bytes(),
            system_prompt.as_bytes(),
            user_prompt.as_bytes(),
            canonical_context.as_bytes(),
            band.as_str().as_bytes(),
        ])
    }

    /// Derived fingerprint for an analysis result: the file fingerprint
    /// scoped by validation scope and language.
    pub fn scoped(&self, scope: &str) -> Self {
        Self::from_parts(&[b"scoped:", self.0.as_bytes(), scope.as_bytes()])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_fingerprint_is_deterministic() {
        let a = Fingerprint::for_file("a.py", &Language::Python, b"def f(): pass");
        let b = Fingerprint::for_file("a.py", &Language::Python, b"def f(): pass");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_every_component() {
        let base = Fingerprint::for_file("a.py", &Language::Python, b"x");
        assert_ne!(base, Fingerprint::for_file("b.py", &Language::Python, b"x"));
        assert_ne!(
            base,
            Fingerprint::for_file("a.py", &Language::JavaScript, b"x")
        );
        assert_ne!(base, Fingerprint::for_file("a.py", &Language::Python, b"y"));
    }

    #[test]
    fn schema_version_prefix_present() {
        let fp = Fingerprint::for_file("a.py", &Language::Python, b"x");
        assert!(fp.as_str().starts_with('1'));
        assert_eq!(fp.as_str().len(), 65);
        assert!(fp.as_str()[1..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.as_str(), fp.as_str().to_lowercase());
    }

    #[test]
    fn llm_fingerprint_varies_by_band() {
        let low = Fingerprint::for_llm("m", "s", "u", "{}", TemperatureBand::Low);
        let high = Fingerprint::for_llm("m", "s", "u", "{}", TemperatureBand::High);
        assert_ne!(low, high);
    }

    #[test]
    fn concatenation_is_not_ambiguous() {
        // "ab" + "c" must differ from "a" + "bc" thanks to the separator.
        let one = Fingerprint::for_llm("m", "ab", "c", "{}", TemperatureBand::Low);
        let two = Fingerprint::for_llm("m", "a", "bc", "{}", TemperatureBand::Low);
        assert_ne!(one, two);
    }
}
