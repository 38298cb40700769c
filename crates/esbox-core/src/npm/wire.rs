//! Compact binary registry wire format.
//!
//! Both registry endpoints return CBOR maps:
//! - `/v2/deps/{fingerprint}` → `name@major` to concrete version
//! - `/v2/mod/{base64(name@version)}` → relative file path to raw bytes

use super::error::NpmError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::collections::BTreeMap;

/// Decode a dependency-resolution response.
pub fn decode_deps(bytes: &[u8]) -> Result<BTreeMap<String, String>, NpmError> {
    ciborium::from_reader(bytes)
        .map_err(|e| NpmError::wire_invalid(format!("Invalid deps response: {e}")))
}

/// Encode a dependency-resolution response (mock registries and tooling).
pub fn encode_deps(map: &BTreeMap<String, String>) -> Result<Vec<u8>, NpmError> {
    let mut out = Vec::new();
    ciborium::into_writer(map, &mut out)
        .map_err(|e| NpmError::wire_invalid(format!("Failed to encode deps map: {e}")))?;
    Ok(out)
}

/// Decode a module-files response.
pub fn decode_module_files(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, NpmError> {
    ciborium::from_reader(bytes)
        .map_err(|e| NpmError::wire_invalid(format!("Invalid module response: {e}")))
}

/// Encode a module-files response (mock registries and tooling).
pub fn encode_module_files(map: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, NpmError> {
    let mut out = Vec::new();
    ciborium::into_writer(map, &mut out)
        .map_err(|e| NpmError::wire_invalid(format!("Failed to encode module map: {e}")))?;
    Ok(out)
}

/// Strip the trailing `@major` tag from a resolution key.
///
/// Splitting on `@` and dropping the last segment keeps scoped names intact:
/// `@scope/pkg@2` becomes `@scope/pkg`.
#[must_use]
pub fn strip_major(tagged: &str) -> String {
    let parts: Vec<&str> = tagged.split('@').collect();
    if parts.len() <= 1 {
        return tagged.to_string();
    }
    parts[..parts.len() - 1].join("@")
}

/// Registry request path for one package payload.
#[must_use]
pub fn module_request(name: &str, version: &str) -> String {
    format!(
        "/v2/mod/{}",
        URL_SAFE_NO_PAD.encode(format!("{name}@{version}"))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deps_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("react@18".to_string(), "18.2.0".to_string());
        map.insert("@scope/pkg@2".to_string(), "2.1.0".to_string());

        let bytes = encode_deps(&map).unwrap();
        assert_eq!(decode_deps(&bytes).unwrap(), map);
    }

    #[test]
    fn test_module_files_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("package.json".to_string(), b"{}".to_vec());
        map.insert("lib/index.js".to_string(), vec![0xE2, 0x98, 0x83]);

        let bytes = encode_module_files(&map).unwrap();
        assert_eq!(decode_module_files(&bytes).unwrap(), map);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_deps(&[0xFF, 0x00, 0x13]).is_err());
    }

    #[test]
    fn test_strip_major() {
        assert_eq!(strip_major("react@18"), "react");
        assert_eq!(strip_major("@scope/pkg@2"), "@scope/pkg");
        assert_eq!(strip_major("bare"), "bare");
    }

    #[test]
    fn test_module_request_is_path_safe() {
        let request = module_request("@scope/pkg", "2.1.0");
        assert!(request.starts_with("/v2/mod/"));
        let tail = request.trim_start_matches("/v2/mod/");
        assert!(!tail.contains('/'));
        assert!(!tail.contains('+'));
    }
}
