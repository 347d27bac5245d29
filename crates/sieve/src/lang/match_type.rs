//! Match types and address parts shared by the built-in tests.

use regex::Regex;

use crate::ast::{Argument, ResolvedTag};
use crate::operands::OperandValue;
use crate::registry::TagDef;
use crate::validate::Validator;

use super::{OPT_ADDRESS_PART, OPT_MATCH_TYPE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchType {
    #[default]
    Is,
    Contains,
    Matches,
}

impl MatchType {
    pub fn code(self) -> u64 {
        match self {
            MatchType::Is => 0,
            MatchType::Contains => 1,
            MatchType::Matches => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(MatchType::Is),
            1 => Some(MatchType::Contains),
            2 => Some(MatchType::Matches),
            _ => None,
        }
    }

    /// Case-insensitive comparison per the default comparator.
    pub fn matches(self, pattern: &str, value: &str) -> Result<bool, String> {
        match self {
            MatchType::Is => Ok(pattern.eq_ignore_ascii_case(value)),
            MatchType::Contains => Ok(value
                .to_ascii_lowercase()
                .contains(&pattern.to_ascii_lowercase())),
            MatchType::Matches => {
                let re = glob_to_regex(pattern)?;
                Ok(re.is_match(value))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddressPart {
    #[default]
    All,
    Localpart,
    Domain,
}

impl AddressPart {
    pub fn code(self) -> u64 {
        match self {
            AddressPart::All => 0,
            AddressPart::Localpart => 1,
            AddressPart::Domain => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(AddressPart::All),
            1 => Some(AddressPart::Localpart),
            2 => Some(AddressPart::Domain),
            _ => None,
        }
    }

    pub fn extract(self, address: &crate::address::Address) -> String {
        match self {
            AddressPart::All => address.to_normalized(),
            AddressPart::Localpart => address.localpart.clone(),
            AddressPart::Domain => address.domain.to_ascii_lowercase(),
        }
    }
}

/// Translates a `*`/`?` wildcard pattern into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, String> {
    let mut out = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| format!("bad match pattern {pattern:?}: {e}"))
}

fn match_type_tag(mt: MatchType) -> Option<ResolvedTag> {
    Some(ResolvedTag::Operand {
        opt_code: OPT_MATCH_TYPE,
        value: OperandValue::Number(mt.code()),
    })
}

fn address_part_tag(part: AddressPart) -> Option<ResolvedTag> {
    Some(ResolvedTag::Operand {
        opt_code: OPT_ADDRESS_PART,
        value: OperandValue::Number(part.code()),
    })
}

macro_rules! simple_tag {
    ($ty:ident, $name:literal, $make:expr) => {
        pub struct $ty;

        impl TagDef for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn validate(
                &self,
                _v: &mut Validator<'_>,
                _value: Option<&mut Argument>,
            ) -> Option<ResolvedTag> {
                $make
            }
        }
    };
}

simple_tag!(IsTag, "is", match_type_tag(MatchType::Is));
simple_tag!(ContainsTag, "contains", match_type_tag(MatchType::Contains));
simple_tag!(MatchesTag, "matches", match_type_tag(MatchType::Matches));
simple_tag!(AllTag, "all", address_part_tag(AddressPart::All));
simple_tag!(LocalpartTag, "localpart", address_part_tag(AddressPart::Localpart));
simple_tag!(DomainTag, "domain", address_part_tag(AddressPart::Domain));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_and_contains_are_case_insensitive() {
        assert!(MatchType::Is.matches("ToDo", "todo").expect("is"));
        assert!(MatchType::Contains.matches("ODO", "todos").expect("contains"));
        assert!(!MatchType::Is.matches("todo", "todos").expect("is"));
    }

    #[test]
    fn wildcard_match_translates_globs() {
        assert!(MatchType::Matches.matches("*@example.org", "user@example.org").expect("matches"));
        assert!(MatchType::Matches.matches("us?r", "USER").expect("matches"));
        assert!(!MatchType::Matches.matches("us?r", "usser").expect("matches"));
        // Regex metacharacters in the pattern are literal.
        assert!(MatchType::Matches.matches("a+b", "a+b").expect("matches"));
        assert!(!MatchType::Matches.matches("a+b", "aab").expect("matches"));
    }
}
