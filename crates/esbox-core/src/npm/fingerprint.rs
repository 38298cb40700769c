//! Canonical dependency-set fingerprints.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::collections::BTreeMap;

/// Compute the canonical fingerprint of a dependency set.
///
/// Entries are joined as `name@version` with `;`, sorted lexicographically by
/// name, then base64-encoded. The URL-safe alphabet is used so fingerprints
/// embed directly into registry request paths.
#[must_use]
pub fn packages_hash(deps: &BTreeMap<String, String>) -> String {
    let joined = deps
        .iter()
        .map(|(name, version)| format!("{name}@{version}"))
        .collect::<Vec<_>>()
        .join(";");
    URL_SAFE_NO_PAD.encode(joined)
}
