//! Chat address helpers.

/// Suffix the network uses for individual user chats.
pub const USER_SUFFIX: &str = "@c.us";

/// Turn a recipient (phone number or full address) into a chat address.
///
/// Full addresses pass through untouched. Phone numbers lose a leading `+`
/// and common separators before the user suffix is appended.
#[must_use]
pub fn chat_address(recipient: &str) -> String {
    let recipient = recipient.trim();
    if recipient.contains('@') {
        return recipient.to_string();
    }

    let digits: String = recipient
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    format!("{digits}{USER_SUFFIX}")
}

/// Reduce a provider sender address to the bare user id.
///
/// `"15551234567:3@c.us"` becomes `"15551234567"`.
#[must_use]
pub fn normalize_sender(address: &str) -> String {
    let user = address.trim().split('@').next().unwrap_or_default();
    user.split(':').next().unwrap_or_default().to_string()
}
