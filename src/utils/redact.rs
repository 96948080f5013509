//! Single redaction policy for personal data that reaches logs.

/// Keeps the first two characters of the local part and the full domain:
/// `alice@example.com` becomes `al***@example.com`.
pub fn redact_email(email: &str) -> String {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !domain.is_empty() => {
            let visible: String = local.chars().take(2).collect();
            format!("{visible}***@{domain}")
        }
        _ => "***".to_string(),
    }
}
