//! Recipient masking for audit payloads and notifications.
//!
//! Audit entries record where a code was sent without disclosing the full
//! contact, so a leaked log does not leak reachable addresses.

/// Mask an email address: keep the first character of the local part and of
/// the domain, plus the final dot-suffix.
///
/// `joana@example.com` → `j***@e***.com`
pub fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return "***".to_string();
    };
    let local_head = local.chars().next().unwrap_or('*');
    let (domain_name, suffix) = match domain.rsplit_once('.') {
        Some((name, tld)) => (name, Some(tld)),
        None => (domain, None),
    };
    let domain_head = domain_name.chars().next().unwrap_or('*');
    match suffix {
        Some(tld) => format!("{}***@{}***.{}", local_head, domain_head, tld),
        None => format!("{}***@{}***", local_head, domain_head),
    }
}

/// Mask a phone number: keep a leading `+`, mask all but the last four digits.
///
/// `+5511999998888` → `+*********8888`
pub fn mask_phone(phone: &str) -> String {
    let has_plus = phone.starts_with('+');
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return if has_plus { "+****".into() } else { "****".into() };
    }
    let visible: String = digits[digits.len() - 4..].iter().collect();
    let masked = "*".repeat(digits.len() - 4);
    if has_plus {
        format!("+{}{}", masked, visible)
    } else {
        format!("{}{}", masked, visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("joana@example.com"), "j***@e***.com");
        assert_eq!(mask_email("a@b.co"), "a***@b***.co");
        assert_eq!(mask_email("no-domain"), "***");
        assert_eq!(mask_email("x@localhost"), "x***@l***");
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+5511999998888"), "+*********8888");
        assert_eq!(mask_phone("11988887777"), "*******7777");
        assert_eq!(mask_phone("+123"), "+****");
    }

    #[test]
    fn test_mask_never_echoes_full_input() {
        let email = "someone@company.com";
        assert!(!mask_email(email).contains("someone"));
        let phone = "+5511999998888";
        assert!(!mask_phone(phone).contains("99999"));
    }
}
