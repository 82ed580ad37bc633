//! Helpers for the protocol's addressable identities (JIDs).

/// Domain appended to bare phone identifiers.
pub const USER_DOMAIN: &str = "s.whatsapp.net";

/// Normalizes a destination into a JID.
///
/// Bare identifiers get the default user domain; anything already carrying
/// a domain separator passes through unchanged.
pub fn to_jid(to: &str) -> String {
    let to = to.trim();
    if to.contains('@') {
        to.to_string()
    } else {
        format!("{to}@{USER_DOMAIN}")
    }
}

/// The user part of a JID ("5511999999999@s.whatsapp.net" -> "5511999999999").
pub fn phone_from_jid(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

/// Phone number bound to a live connection identity.
///
/// Device identities look like "5511999999999:12@s.whatsapp.net".
pub fn phone_from_user_id(user_id: &str) -> Option<String> {
    let phone = user_id.split(':').next().map(phone_from_jid)?;
    (!phone.is_empty()).then(|| phone.to_string())
}

pub fn is_broadcast(jid: &str) -> bool {
    jid.ends_with("@broadcast")
}

/// Format a phone number string for log output.
/// Example: "5511999999999" -> "+55 11 99999-9999"
pub fn format_phone_number(phone: &str) -> String {
    if phone.is_empty() {
        return phone.to_string();
    }

    if phone.starts_with("55") && phone.len() >= 12 && phone.chars().all(|c| c.is_ascii_digit()) {
        let country = &phone[0..2];
        let area = &phone[2..4];
        let rest = &phone[4..];

        if rest.len() == 9 {
            return format!("+{} {} {}-{}", country, area, &rest[0..5], &rest[5..]);
        } else if rest.len() == 8 {
            return format!("+{} {} {}-{}", country, area, &rest[0..4], &rest[4..]);
        }
    }

    if phone.len() > 10 {
        return format!("+{}", phone);
    }

    phone.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_gets_domain() {
        assert_eq!(to_jid("5511999999999"), "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn jid_passes_through() {
        assert_eq!(to_jid("123456@g.us"), "123456@g.us");
        assert_eq!(
            to_jid("5511999999999@s.whatsapp.net"),
            "5511999999999@s.whatsapp.net"
        );
    }

    #[test]
    fn phone_from_device_identity() {
        assert_eq!(
            phone_from_user_id("5511999999999:12@s.whatsapp.net").as_deref(),
            Some("5511999999999")
        );
        assert_eq!(
            phone_from_user_id("5511999999999@s.whatsapp.net").as_deref(),
            Some("5511999999999")
        );
        assert_eq!(phone_from_user_id(""), None);
    }

    #[test]
    fn phone_from_contact_jid() {
        assert_eq!(phone_from_jid("5511988887777@s.whatsapp.net"), "5511988887777");
        assert_eq!(phone_from_jid("no-domain"), "no-domain");
    }

    #[test]
    fn broadcast_jids() {
        assert!(is_broadcast("status@broadcast"));
        assert!(!is_broadcast("5511@s.whatsapp.net"));
        assert!(!is_broadcast("120363@g.us"));
    }

    #[test]
    fn test_format_brazilian_mobile() {
        assert_eq!(format_phone_number("5511999999999"), "+55 11 99999-9999");
    }

    #[test]
    fn test_format_brazilian_landline() {
        assert_eq!(format_phone_number("551133334444"), "+55 11 3333-4444");
    }

    #[test]
    fn test_format_international() {
        assert_eq!(format_phone_number("14155552671"), "+14155552671");
        assert_eq!(format_phone_number("12345"), "12345");
    }
}
