//! Backend-safe machine names.
//!
//! A machine name is the owner's username followed by a six character
//! encoding of the creation time, e.g. `alice-Q3F9kT`. Backends use it as the
//! container/domain/server name, so it has to be unique per owner per second.

use crate::token::generate_token;
use chrono::{DateTime, Datelike, Timelike, Utc};

const BASE_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn base_char(index: u32) -> char {
    BASE_CHARS[index as usize % BASE_CHARS.len()] as char
}

/// Encode year (4-year buckets), month, day, hour, minute and second as one
/// character each.
pub fn encode_date_time(at: DateTime<Utc>) -> String {
    let year_bucket = (at.year().rem_euclid(100) as u32) / 4;
    [
        year_bucket,
        at.month0(),
        at.day0(),
        at.hour(),
        at.minute(),
        at.second(),
    ]
    .into_iter()
    .map(base_char)
    .collect()
}

/// Reduce a username to characters every backend accepts in a name.
pub fn sanitize_owner(owner: &str) -> String {
    let cleaned: String = owner
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "machine".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

pub fn safe_machine_name(owner: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", sanitize_owner(owner), encode_date_time(at))
}

/// `base` with a random suffix, for the rare collision within one second.
///
/// Base names never contain `_`, so a suffixed name is never mistaken for
/// another machine's name or one of its `<name>-<n>` disks.
pub fn disambiguate(base: &str) -> String {
    format!("{}_{}", base, generate_token(4).to_ascii_lowercase())
}
