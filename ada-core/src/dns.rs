//! Best-effort reverse DNS for machine addresses.

use crate::command::CliCommand;
use tracing::warn;

/// Resolve `ip` to a hostname with `getent hosts`.
///
/// Never fails: any lookup problem yields an empty string.
pub fn reverse_lookup(ip: &str) -> String {
    if ip.is_empty() {
        return String::new();
    }

    match CliCommand::new("getent").args(["hosts", ip]).output() {
        Ok(stdout) => parse_getent_hosts(&stdout).unwrap_or_default(),
        Err(e) => {
            warn!(ip, "couldn't get hostname: {}", e);
            String::new()
        }
    }
}

pub async fn reverse_lookup_async(ip: String) -> String {
    tokio::task::spawn_blocking(move || reverse_lookup(&ip))
        .await
        .unwrap_or_default()
}

/// `getent hosts` prints `<address> <canonical name> [aliases...]`.
fn parse_getent_hosts(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_getent_hosts() {
        assert_eq!(
            parse_getent_hosts("10.0.0.5      vm5.cloud.example.org vm5\n"),
            Some("vm5.cloud.example.org".to_string())
        );
        assert_eq!(parse_getent_hosts(""), None);
        assert_eq!(parse_getent_hosts("10.0.0.5\n"), None);
    }

    #[test]
    fn test_empty_ip_is_empty_hostname() {
        assert_eq!(reverse_lookup(""), "");
    }
}
