//! Network capability: host-allowlisted, blocking HTTP.
//!
//! A [`Network`] grant names the hosts a snippet may reach. Host matching
//! is literal, exact equality -- no wildcards -- and is checked before any
//! connection is opened. Requests are synchronous with fixed 10-second
//! connect and read timeouts.

use std::collections::BTreeSet;
use std::time::Duration;

use super::CapabilityState;
use crate::error::{Result, SandboxError};

/// Connect and read timeout for every request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A scoped network capability.
#[derive(Debug, Clone)]
pub struct Network {
    hosts: BTreeSet<String>,
    state: CapabilityState,
}

impl Network {
    pub fn new(hosts: impl IntoIterator<Item = String>, state: CapabilityState) -> Self {
        Self {
            hosts: hosts.into_iter().collect(),
            state,
        }
    }

    /// Extracts the host from `url` and checks it against the allowlist.
    /// No connection is opened when the check fails.
    fn check_url(&self, url: &str) -> Result<()> {
        self.state.ensure_active()?;
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| SandboxError::Http(format!("invalid URL '{url}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| SandboxError::Http(format!("URL has no host: {url}")))?;
        if !self.hosts.contains(host) {
            return Err(SandboxError::security(format!(
                "host not in allowlist: {host}"
            )));
        }
        Ok(())
    }

    fn client() -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .connect_timeout(HTTP_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| SandboxError::Http(e.to_string()))
    }

    /// Synchronous GET; returns the response body as text.
    pub fn http_get(&self, url: &str) -> Result<String> {
        self.check_url(url)?;
        let response = Self::client()?
            .get(url)
            .send()
            .map_err(|e| SandboxError::Http(e.to_string()))?;
        response.text().map_err(|e| SandboxError::Http(e.to_string()))
    }

    /// Synchronous POST with an explicit content type; returns the
    /// response body as text.
    pub fn http_post(&self, url: &str, body: &str, content_type: &str) -> Result<String> {
        self.check_url(url)?;
        let response = Self::client()?
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.to_string())
            .send()
            .map_err(|e| SandboxError::Http(e.to_string()))?;
        response.text().map_err(|e| SandboxError::Http(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::new_grant;

    fn network(hosts: &[&str]) -> Network {
        let (state, guard) = new_grant();
        std::mem::forget(guard);
        Network::new(hosts.iter().map(|s| s.to_string()), state)
    }

    #[test]
    fn test_disallowed_host_rejected_before_connecting() {
        let net = network(&["api.example.com"]);
        let err = net.http_get("https://evil.example.net/data").unwrap_err();
        assert!(err.to_string().starts_with("SecurityException"));
        assert!(err.to_string().contains("evil.example.net"));
    }

    #[test]
    fn test_host_match_is_exact_not_suffix() {
        let net = network(&["example.com"]);
        // A subdomain is a different host.
        assert!(net.http_get("https://sub.example.com/").is_err());
        // So is a superstring.
        assert!(net.http_get("https://notexample.com/").is_err());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let net = network(&["example.com"]);
        assert!(matches!(
            net.http_get("not a url"),
            Err(SandboxError::Http(_))
        ));
    }

    #[test]
    fn test_url_without_host_rejected() {
        let net = network(&["example.com"]);
        assert!(net.http_get("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_post_checks_host_too() {
        let net = network(&["api.example.com"]);
        let err = net
            .http_post("https://other.com/submit", "{}", "application/json")
            .unwrap_err();
        assert!(err.to_string().starts_with("SecurityException"));
    }

    #[test]
    fn test_revoked_network_blocks_requests() {
        let (state, guard) = new_grant();
        let net = Network::new(["example.com".to_string()], state);
        drop(guard);
        assert!(net.http_get("https://example.com/").is_err());
    }
}
