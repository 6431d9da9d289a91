//! Identifier conversions.
//!
//! Ids are dotted paths rooted at the account id:
//! - folder: `account.folder`
//! - conversation: `account.conversation`
//! - message: `account.conversation.message[.uid]`
//! - umid: `folder_or_account.suffix`

use super::a64;

/// Account id portion of a folder id
pub fn account_id_from_folder_id(folder_id: &str) -> &str {
    first_segment(folder_id)
}

/// Account id portion of a conversation id
pub fn account_id_from_conv_id(conv_id: &str) -> &str {
    first_segment(conv_id)
}

/// Account id portion of a message id
pub fn account_id_from_message_id(message_id: &str) -> &str {
    first_segment(message_id)
}

/// Everything after the account portion of a conversation id.
///
/// For Gmail this is the encoded thread id.
pub fn conv_specific_id_from_conv_id(conv_id: &str) -> &str {
    match conv_id.find('.') {
        Some(idx) => &conv_id[idx + 1..],
        None => "",
    }
}

/// The conversation id a message belongs to (its first two segments)
pub fn conv_id_from_message_id(message_id: &str) -> &str {
    let mut dots = message_id.match_indices('.').map(|(idx, _)| idx);
    let _account_end = dots.next();
    match dots.next() {
        Some(idx) => &message_id[..idx],
        None => message_id,
    }
}

/// Build the account-qualified conversation id for a protocol-native id
pub fn make_conv_id(account_id: &str, specific_id: &str) -> String {
    format!("{}.{}", account_id, specific_id)
}

/// Encode a decimal X-GM-THRID as our raw conversation id
pub fn parse_gmail_conv_id(thread_id: &str) -> Option<String> {
    thread_id.trim().parse::<u64>().ok().map(a64::encode_int)
}

/// Encode a decimal X-GM-MSGID the same way
pub fn parse_gmail_msg_id(msg_id: &str) -> Option<String> {
    parse_gmail_conv_id(msg_id)
}

/// Recover the decimal X-GM-THRID from a Gmail conversation id
pub fn gmail_thread_id_from_conv_id(conv_id: &str) -> Option<String> {
    a64::decode_int(conv_specific_id_from_conv_id(conv_id)).map(|id| id.to_string())
}

fn first_segment(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}
