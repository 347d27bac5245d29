//! Mail address parsing and normalization.
//!
//! The validator normalizes literal addresses at compile time; operations
//! repeat the check at runtime for values that were computed. The grammar
//! accepted here is the pragmatic `local@domain` subset with an optional
//! display-name `Name <local@domain>` wrapper.

/// A parsed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub localpart: String,
    pub domain: String,
}

impl Address {
    /// Canonical form: local part verbatim, domain lowercased.
    pub fn to_normalized(&self) -> String {
        format!("{}@{}", self.localpart, self.domain.to_ascii_lowercase())
    }
}

/// Parses one address, accepting an optional angle-bracket wrapper.
pub fn parse(input: &str) -> Result<Address, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty address".to_string());
    }
    let inner = match (trimmed.find('<'), trimmed.rfind('>')) {
        (Some(open), Some(close)) if open < close => &trimmed[open + 1..close],
        (None, None) => trimmed,
        _ => return Err(format!("unbalanced angle brackets in address {trimmed:?}")),
    };
    let (localpart, domain) = inner
        .rsplit_once('@')
        .ok_or_else(|| format!("missing @ in address {inner:?}"))?;
    if localpart.is_empty() {
        return Err(format!("empty local part in address {inner:?}"));
    }
    if domain.is_empty() {
        return Err(format!("empty domain in address {inner:?}"));
    }
    if localpart.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("invalid local part in address {inner:?}"));
    }
    for c in domain.chars() {
        if !(c.is_ascii_alphanumeric() || c == '-' || c == '.') {
            return Err(format!("invalid domain character in address {inner:?}"));
        }
    }
    if domain.split('.').any(str::is_empty) {
        return Err(format!("empty domain segment in address {inner:?}"));
    }
    Ok(Address {
        localpart: localpart.to_string(),
        domain: domain.to_string(),
    })
}

/// Parses and normalizes one address.
pub fn normalize(input: &str) -> Result<String, String> {
    parse(input).map(|a| a.to_normalized())
}

/// Extracts the addresses of one header value; entries that do not parse
/// are skipped, matching how tests treat malformed address headers.
pub fn parse_header_addresses(value: &str) -> Vec<Address> {
    value
        .split(',')
        .filter_map(|part| parse(part).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_address_parses() {
        let a = parse("user@Example.ORG").expect("parse");
        assert_eq!(a.localpart, "user");
        assert_eq!(a.to_normalized(), "user@example.org");
    }

    #[test]
    fn display_name_wrapper_parses() {
        let a = parse("Some User <some.user@example.org>").expect("parse");
        assert_eq!(a.localpart, "some.user");
        assert_eq!(a.domain, "example.org");
    }

    #[test]
    fn bad_addresses_are_rejected() {
        for bad in ["", "no-at-sign", "@example.org", "user@", "user@ex ample.org", "a@b..c"] {
            assert!(parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn header_addresses_skip_malformed_entries() {
        let found = parse_header_addresses("a@b.example, not-an-address, c@d.example");
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].localpart, "c");
    }
}
