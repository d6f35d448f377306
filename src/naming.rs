//! Convention-based queue naming.
//!
//! The naming scheme is an external contract other services depend on:
//! `{application}_{type_name}` where the type name is snake_cased with a
//! single leading interface-style `I` stripped. Failed-message queues
//! append `_error`, fault-event queues append `_fault`.

use crate::message::MessageTypeKey;

/// Suffix for queues holding hard-failed messages.
pub const ERROR_QUEUE_SUFFIX: &str = "error";
/// Suffix for queues carrying fault events.
pub const FAULT_QUEUE_SUFFIX: &str = "fault";

/// Convert a CamelCase name to snake_case.
///
/// Every non-lowercase character starts a new `_`-separated segment
/// (except at position zero) and is lowercased. Total over any input.
pub fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_lowercase() {
            out.push(c);
        } else {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Strip a single leading interface-style `I` (only when followed by
/// another uppercase letter, so `Item` stays `Item` but `ICommand`
/// becomes `Command`).
pub fn strip_interface_prefix(name: &str) -> &str {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some('I'), Some(second)) if second.is_uppercase() => &name[1..],
        _ => name,
    }
}

/// Derive the conventional queue name for a message type owned by the
/// given application.
pub fn queue_name(application_name: &str, key: &MessageTypeKey) -> String {
    format!(
        "{}_{}",
        application_name,
        snake_case(strip_interface_prefix(key.name()))
    )
}

/// The error queue paired with a queue name.
pub fn error_queue_name(queue: &str) -> String {
    format!("{}_{}", queue, ERROR_QUEUE_SUFFIX)
}

/// The fault queue paired with a queue name.
pub fn fault_queue_name(queue: &str) -> String {
    format!("{}_{}", queue, FAULT_QUEUE_SUFFIX)
}
