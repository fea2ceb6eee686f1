//! Validated user identity.

use crate::error::CoreError;

/// Maximum length of a user address.
const MAX_ADDRESS_LEN: usize = 128;

/// Opaque, validated address of a single user.
///
/// Addresses are the identity the engine tracks read state and direct
/// subscriptions under. They are immutable once constructed and cheap to
/// clone. An *absent* address (`Option::<UserAddress>::None`) represents
/// the anonymous, not-signed-in user throughout the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct UserAddress(String);

impl UserAddress {
    /// Create an address from a raw string.
    ///
    /// Rules:
    /// - Must not be empty.
    /// - Must not exceed `MAX_ADDRESS_LEN` characters.
    /// - Must not contain whitespace or control characters.
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CoreError::Validation(
                "User address must not be empty".to_string(),
            ));
        }
        if raw.len() > MAX_ADDRESS_LEN {
            return Err(CoreError::Validation(format!(
                "User address must not exceed {MAX_ADDRESS_LEN} characters"
            )));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CoreError::Validation(
                "User address must not contain whitespace or control characters".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    /// The raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn valid_address_accepted() {
        let addr = UserAddress::new("alice").expect("should be valid");
        assert_eq!(addr.as_str(), "alice");
        assert_eq!(addr.to_string(), "alice");
    }

    #[test]
    fn empty_address_rejected() {
        assert_matches!(UserAddress::new(""), Err(CoreError::Validation(_)));
    }

    #[test]
    fn address_with_whitespace_rejected() {
        assert_matches!(UserAddress::new("al ice"), Err(CoreError::Validation(_)));
        assert_matches!(UserAddress::new("alice\n"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn address_too_long_rejected() {
        let raw = "a".repeat(MAX_ADDRESS_LEN + 1);
        assert_matches!(UserAddress::new(raw), Err(CoreError::Validation(_)));
    }

    #[test]
    fn addresses_compare_by_value() {
        let a = UserAddress::new("alice").expect("valid");
        let b = UserAddress::new("alice").expect("valid");
        assert_eq!(a, b);
    }
}
