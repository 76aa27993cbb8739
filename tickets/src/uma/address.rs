//! Universal Money Address parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why an address string was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Missing the leading `$`
    #[error("UMA address must start with '$'")]
    MissingDollar,
    /// No `@` or more than one
    #[error("UMA address must contain exactly one '@'")]
    BadSeparator,
    /// Nothing between `$` and `@`
    #[error("UMA address local part is empty")]
    EmptyLocalPart,
    /// Nothing after `@`
    #[error("UMA address domain is empty")]
    EmptyDomain,
    /// Character outside the allowed set
    #[error("UMA address contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// A validated `$localpart@domain` address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UmaAddress {
    local_part: String,
    domain: String,
}

impl UmaAddress {
    /// Parse and validate an address
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] when the string does not follow `$localpart@domain`.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let rest = raw.strip_prefix('$').ok_or(AddressError::MissingDollar)?;

        let mut parts = rest.split('@');
        let (Some(local_part), Some(domain), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AddressError::BadSeparator);
        };

        if local_part.is_empty() {
            return Err(AddressError::EmptyLocalPart);
        }
        if domain.is_empty() {
            return Err(AddressError::EmptyDomain);
        }
        if let Some(c) = local_part
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+')))
        {
            return Err(AddressError::InvalidCharacter(c));
        }
        if let Some(c) = domain
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':')))
        {
            return Err(AddressError::InvalidCharacter(c));
        }

        Ok(Self {
            local_part: local_part.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    /// The part between `$` and `@`
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// The provider (VASP) domain
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for UmaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}@{}", self.local_part, self.domain)
    }
}

impl FromStr for UmaAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UmaAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UmaAddress> for String {
    fn from(address: UmaAddress) -> Self {
        address.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_dollar_address() {
        let address = UmaAddress::parse("$alice@example.com").unwrap();
        assert_eq!(address.local_part(), "alice");
        assert_eq!(address.domain(), "example.com");
        assert_eq!(address.to_string(), "$alice@example.com");
    }

    #[test]
    fn test_rejects_missing_dollar() {
        assert_eq!(
            UmaAddress::parse("alice@example.com"),
            Err(AddressError::MissingDollar)
        );
    }

    #[test]
    fn test_rejects_plain_word() {
        assert_eq!(UmaAddress::parse("invalid"), Err(AddressError::MissingDollar));
        assert_eq!(UmaAddress::parse("$invalid"), Err(AddressError::BadSeparator));
    }

    #[test]
    fn test_rejects_empty_parts() {
        assert_eq!(UmaAddress::parse("$@example.com"), Err(AddressError::EmptyLocalPart));
        assert_eq!(UmaAddress::parse("$alice@"), Err(AddressError::EmptyDomain));
        assert_eq!(
            UmaAddress::parse("$alice@bob@example.com"),
            Err(AddressError::BadSeparator)
        );
        assert_eq!(
            UmaAddress::parse("$$alice@example.com"),
            Err(AddressError::InvalidCharacter('$'))
        );
    }

    #[test]
    fn test_domain_keeps_port_for_local_providers() {
        let address = UmaAddress::parse("$bob@LOCALHOST:8080").unwrap();
        assert_eq!(address.domain(), "localhost:8080");
    }

    #[test]
    fn test_serde_validates() {
        let ok: UmaAddress = serde_json::from_str("\"$alice@example.com\"").unwrap();
        assert_eq!(ok.local_part(), "alice");
        assert!(serde_json::from_str::<UmaAddress>("\"alice@example.com\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_wellformed_addresses_roundtrip(
            local in "[a-z0-9_.+-]{1,20}",
            domain in "[a-z0-9-]{1,20}\\.[a-z]{2,6}",
        ) {
            let raw = format!("${local}@{domain}");
            let parsed = UmaAddress::parse(&raw).unwrap();
            prop_assert_eq!(parsed.to_string(), raw);
        }

        #[test]
        fn prop_addresses_without_dollar_are_rejected(raw in "[a-z]{1,10}@[a-z]{1,10}\\.com") {
            prop_assert_eq!(UmaAddress::parse(&raw), Err(AddressError::MissingDollar));
        }
    }
}
