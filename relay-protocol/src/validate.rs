//! # Descriptor Validator
//!
//! Parses decrypted plaintext and enforces the descriptor schema. All fields
//! are required and none has a default. Every violated field is reported,
//! not just the first one.

use crate::descriptor::{ConnectionDescriptor, GuestType};
use crate::error::{DescriptorError, DescriptorResult, Issue};
use serde_json::{Map, Value};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Parses `plaintext` as a JSON descriptor and checks every field invariant.
pub fn validate(plaintext: &[u8]) -> DescriptorResult<ConnectionDescriptor> {
    let text = std::str::from_utf8(plaintext)
        .map_err(|_| DescriptorError::MalformedPayload("plaintext is not UTF-8".into()))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|e| DescriptorError::MalformedPayload(format!("plaintext is not JSON: {e}")))?;

    let Value::Object(obj) = value else {
        return Err(DescriptorError::ValidationFailure(vec![Issue::new(
            "descriptor",
            "expected a JSON object",
        )]));
    };

    let mut issues = Vec::new();
    let guest_id = record(&mut issues, "guestId", guest_id(&obj));
    let guest_type = record(&mut issues, "guestType", guest_type(&obj));
    let host = record(&mut issues, "host", hostname(&obj, "host"));
    let node = record(&mut issues, "node", hostname(&obj, "node"));
    let auth_ticket = record(&mut issues, "authTicket", ticket(&obj, "authTicket"));
    let console_ticket = record(&mut issues, "consoleTicket", ticket(&obj, "consoleTicket"));
    let port = record(&mut issues, "port", port(&obj));

    match (guest_id, guest_type, host, node, auth_ticket, console_ticket, port) {
        (
            Some(guest_id),
            Some(guest_type),
            Some(host),
            Some(node),
            Some(auth_ticket),
            Some(console_ticket),
            Some(port),
        ) if issues.is_empty() => Ok(ConnectionDescriptor {
            guest_id,
            guest_type,
            host,
            node,
            auth_ticket,
            console_ticket,
            port,
        }),
        _ => Err(DescriptorError::ValidationFailure(issues)),
    }
}

/// Returns `true` if `s` is a syntactically valid hostname.
///
/// Follows RFC 1123: dot-separated labels of ASCII letters, digits and
/// hyphens, 1–63 characters each, not starting or ending with a hyphen, at
/// most 253 characters overall. A single trailing dot is allowed. Dotted
/// IPv4 addresses satisfy the same rule.
pub fn is_valid_hostname(s: &str) -> bool {
    let s = s.strip_suffix('.').unwrap_or(s);
    if s.is_empty() || s.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

fn record<T>(issues: &mut Vec<Issue>, field: &str, check: Result<T, String>) -> Option<T> {
    match check {
        Ok(v) => Some(v),
        Err(message) => {
            issues.push(Issue::new(field, message));
            None
        }
    }
}

fn required<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a Value, String> {
    match obj.get(field) {
        None | Some(Value::Null) => Err("is required".into()),
        Some(v) => Ok(v),
    }
}

fn guest_id(obj: &Map<String, Value>) -> Result<u32, String> {
    let value = required(obj, "guestId")?;
    let Value::Number(n) = value else {
        return Err("must be an integer".into());
    };
    if let Some(id) = n.as_u64() {
        if id == 0 {
            return Err("must be positive".into());
        }
        return u32::try_from(id).map_err(|_| "is out of range".into());
    }
    if n.as_i64().is_some() || n.as_f64().is_some_and(|f| f <= 0.0) {
        return Err("must be positive".into());
    }
    Err("must be an integer".into())
}

fn guest_type(obj: &Map<String, Value>) -> Result<GuestType, String> {
    let value = required(obj, "guestType")?;
    value
        .as_str()
        .and_then(GuestType::parse)
        .ok_or_else(|| "must be one of: qemu, lxc".into())
}

fn hostname(obj: &Map<String, Value>, field: &str) -> Result<String, String> {
    let value = required(obj, field)?;
    let Some(s) = value.as_str() else {
        return Err("must be a string".into());
    };
    if !is_valid_hostname(s) {
        return Err("must be a valid hostname".into());
    }
    Ok(s.to_string())
}

fn ticket(obj: &Map<String, Value>, field: &str) -> Result<String, String> {
    let value = required(obj, field)?;
    match value.as_str() {
        Some("") => Err("must not be empty".into()),
        Some(s) => Ok(s.to_string()),
        None => Err("must be a string".into()),
    }
}

/// Accepts a JSON number or a string of ASCII digits.
fn port(obj: &Map<String, Value>) -> Result<u16, String> {
    let value = required(obj, "port")?;
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse::<u64>().ok()
        }
        _ => None,
    };
    match parsed {
        Some(0) | None => Err("must be a positive integer".into()),
        Some(p) => u16::try_from(p).map_err(|_| "must be at most 65535".into()),
    }
}
