//! Protocol version negotiation.

/// Versions offered in the `connect` handshake, most preferred first.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["1", "pre2", "pre1"];

/// Version proposed when no other preference is configured.
pub const DEFAULT_VERSION: &str = SUPPORTED_VERSIONS[0];

/// Returns true if `version` is one of the versions this client speaks.
#[must_use]
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}
