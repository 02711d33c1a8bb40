//! Validation of user-supplied names and of values that end up inside
//! remote shell command lines (data transfer hosts and directories).

use std::net::IpAddr;

use crate::error::{CoreError, Result};

pub const MACHINE_NAME_MIN_LEN: usize = 4;
pub const MACHINE_NAME_MAX_LEN: usize = 80;

/// Display names: 4 to 80 characters of `a-Z`, `0-9` and `-`.
pub fn validate_machine_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if !(MACHINE_NAME_MIN_LEN..=MACHINE_NAME_MAX_LEN).contains(&len) {
        return Err(CoreError::Validation(format!(
            "Machine name must be between {} and {} characters long",
            MACHINE_NAME_MIN_LEN, MACHINE_NAME_MAX_LEN
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(CoreError::Validation(
            "Machine name may only contain characters a-Z, 0-9 and -".to_string(),
        ));
    }

    Ok(())
}

/// Validate a server address (hostname or IP address).
///
/// The address is interpolated into `ssh`/`rsync` command lines.
pub fn validate_server_address(server_addr: &str) -> Result<()> {
    if server_addr.is_empty() || server_addr.len() > 253 {
        return Err(CoreError::Validation(
            "Server address must be between 1 and 253 characters".to_string(),
        ));
    }

    if server_addr.contains('\0') || server_addr.chars().any(|c| c.is_control()) {
        return Err(CoreError::Validation(
            "Server address contains invalid control characters".to_string(),
        ));
    }

    if server_addr.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    // Looks like an IPv4 address but failed to parse, e.g. "256.256.256.256"
    let labels: Vec<&str> = server_addr.split('.').collect();
    if labels.len() >= 2
        && labels
            .iter()
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(CoreError::Validation(format!(
            "Invalid IP address format: {}",
            server_addr
        )));
    }

    validate_hostname(server_addr)
}

/// Validate a hostname according to RFC 1123 rules
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() > 253 {
        return Err(CoreError::Validation(
            "Hostname must be between 1 and 253 characters".to_string(),
        ));
    }

    if hostname.starts_with('.') || hostname.ends_with('.') {
        return Err(CoreError::Validation(
            "Hostname cannot start or end with a dot".to_string(),
        ));
    }

    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(CoreError::Validation(
                "Hostname labels must be between 1 and 63 characters".to_string(),
            ));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(CoreError::Validation(
                "Hostname labels cannot start or end with a hyphen".to_string(),
            ));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(CoreError::Validation(format!(
                "Hostname label '{}' contains invalid characters (only alphanumeric and '-' allowed)",
                label
            )));
        }
    }

    Ok(())
}

/// Remote paths and login names may not carry shell metacharacters.
pub fn validate_shell_safe(value: &str, what: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '~');
    if !value.chars().all(allowed) {
        return Err(CoreError::Validation(format!(
            "{} '{}' contains characters outside [A-Za-z0-9/._~-]",
            what, value
        )));
    }
    Ok(())
}
