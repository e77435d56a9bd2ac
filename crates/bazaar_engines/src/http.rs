#![forbid(unsafe_code)]

use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "bazaarbrain/0.1";

/// Redacted description of a failed provider call, safe to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCallError {
    pub provider: &'static str,
    pub http_status: Option<u16>,
    pub error_kind: &'static str,
}

impl ProviderCallError {
    pub fn new(provider: &'static str, error_kind: &'static str, http_status: Option<u16>) -> Self {
        Self {
            provider,
            http_status,
            error_kind,
        }
    }

    pub fn safe_detail(&self) -> String {
        match self.http_status {
            Some(status) => format!(
                "provider={} error={} status={}",
                self.provider, self.error_kind, status
            ),
            None => format!("provider={} error={}", self.provider, self.error_kind),
        }
    }
}

pub fn build_http_agent(timeout_ms: u32, user_agent: &str) -> Result<ureq::Agent, String> {
    if timeout_ms == 0 {
        return Err("timeout must be > 0".to_string());
    }
    let timeout = Duration::from_millis(u64::from(timeout_ms).max(100));
    Ok(ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .user_agent(user_agent)
        .build())
}

pub fn provider_error_from_ureq(provider: &'static str, err: ureq::Error) -> ProviderCallError {
    match err {
        ureq::Error::Status(status, _) => {
            ProviderCallError::new(provider, "http_non_200", Some(status))
        }
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            ProviderCallError::new(provider, classify_transport_error_kind(&combined), None)
        }
    }
}

pub fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_http_01_transport_errors_are_classified() {
        assert_eq!(classify_transport_error_kind("Io: operation timed out"), "timeout");
        assert_eq!(classify_transport_error_kind("Dns failed"), "dns");
        assert_eq!(classify_transport_error_kind("ConnectionFailed"), "connection");
        assert_eq!(classify_transport_error_kind("weird"), "transport");
    }

    #[test]
    fn at_http_02_zero_timeout_is_rejected() {
        assert!(build_http_agent(0, DEFAULT_USER_AGENT).is_err());
        assert!(build_http_agent(50, DEFAULT_USER_AGENT).is_ok());
    }

    #[test]
    fn at_http_03_safe_detail_never_carries_secrets() {
        let e = ProviderCallError::new("openai", "http_non_200", Some(401));
        assert_eq!(e.safe_detail(), "provider=openai error=http_non_200 status=401");
    }
}
