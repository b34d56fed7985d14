//! Referral code generation and format checks.
//!
//! Codes are drawn from an alphabet without visually confusable characters
//! (no `0`, `O`, `1`, `I`, `L`). Uniqueness is the registry's concern, not
//! the generator's.

use rand::Rng;

use crate::types::AccountType;

/// The unambiguous code alphabet.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// The length of a personal referral code.
pub const PERSONAL_CODE_LEN: usize = 8;

/// Random characters following an organization code's type prefix.
const ORG_SUFFIX_LEN: usize = 6;

fn random_chars(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Produces a personal referral code.
pub fn generate_personal() -> String {
    random_chars(PERSONAL_CODE_LEN)
}

/// Produces an organization referral code, prefixed by organization type.
pub fn generate_for_org(org_type: AccountType) -> String {
    let mut code = String::with_capacity(PERSONAL_CODE_LEN + 1);
    code.push_str(org_type.code_prefix());
    code.push_str(&random_chars(ORG_SUFFIX_LEN));
    code
}

/// Uppercases and strips whitespace; codes are matched case-sensitively
/// against this canonical form.
pub fn normalize(code: &str) -> String {
    code.trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Whether a string is shaped like a referral code.
///
/// Accepts the full uppercase alphanumeric range so that caller-chosen codes
/// and prefixed organization codes both pass.
pub fn is_valid(code: &str) -> bool {
    (PERSONAL_CODE_LEN..=10).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Builds the shareable invite link for a code. Pure string composition.
pub fn invite_link(base_url: &str, code: &str) -> String {
    format!("{}/invite/{}", base_url.trim_end_matches('/'), code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personal_codes_use_the_safe_alphabet() {
        for _ in 0..100 {
            let code = generate_personal();
            assert_eq!(code.len(), PERSONAL_CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
            assert!(is_valid(&code));
        }
    }

    #[test]
    fn org_codes_carry_a_type_prefix() {
        let code = generate_for_org(AccountType::Club);
        assert!(code.starts_with("CLB"));
        assert_eq!(code.len(), 9);
        assert!(is_valid(&code));

        assert!(generate_for_org(AccountType::Academy).starts_with("ACD"));
        assert!(generate_for_org(AccountType::Trainer).starts_with("TRN"));
        assert!(generate_for_org(AccountType::Agent).starts_with("AGT"));
    }

    #[test]
    fn normalize_strips_whitespace_and_uppercases() {
        assert_eq!(normalize("  ab cd23 45 "), "ABCD2345");
    }

    #[test]
    fn format_check_rejects_bad_shapes() {
        assert!(!is_valid("SHORT"));
        assert!(!is_valid("WAYTOOLONGCODE"));
        assert!(!is_valid("lower234"));
        assert!(!is_valid("HAS-DASH"));
        assert!(is_valid("CLBABCD23"));
    }

    #[test]
    fn invite_link_joins_cleanly() {
        assert_eq!(
            invite_link("https://example.com/", "ABCD2345"),
            "https://example.com/invite/ABCD2345"
        );
    }
}
