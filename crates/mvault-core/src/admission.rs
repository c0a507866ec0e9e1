//! Admission Filter: split-horizon classification by `Host` header.
//! Pure decision logic; the `mvault-cli` server wires this as an `axum`
//! middleware in front of every route.

/// Which horizon an inbound request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// Loopback / local UI: full access.
    Loopback,
    /// `Host` matches the configured `remote_base_url` hostname: only
    /// `/api/remote/*` is served.
    ExternalTunnel,
}

/// Classifies a request by comparing its `Host` header (hostname only,
/// case-insensitively, port ignored) against the configured remote
/// hostname. An empty `remote_base_url` means no external horizon is
/// configured, so every request is treated as loopback.
pub fn classify(host_header: Option<&str>, remote_base_url: &str) -> Horizon {
    let remote_host = match remote_hostname(remote_base_url) {
        Some(h) if !h.is_empty() => h,
        _ => return Horizon::Loopback,
    };
    let request_host = match host_header.and_then(hostname_only) {
        Some(h) => h,
        None => return Horizon::Loopback,
    };
    if request_host.eq_ignore_ascii_case(&remote_host) {
        Horizon::ExternalTunnel
    } else {
        Horizon::Loopback
    }
}

/// True when `path` is allowed on `horizon`.
pub fn is_allowed(horizon: Horizon, path: &str) -> bool {
    match horizon {
        Horizon::Loopback => true,
        Horizon::ExternalTunnel => path.starts_with("/api/remote/"),
    }
}

fn remote_hostname(remote_base_url: &str) -> Option<String> {
    url::Url::parse(remote_base_url).ok().and_then(|u| u.host_str().map(str::to_string))
}

/// Strips a `:port` suffix from a `Host` header value (IPv6 literals keep
/// their brackets and are returned as-is past the closing bracket).
fn hostname_only(host_header: &str) -> Option<String> {
    let host_header = host_header.trim();
    if host_header.is_empty() {
        return None;
    }
    if let Some(rest) = host_header.strip_prefix('[') {
        // [::1]:8080 -> ::1
        return rest.split(']').next().map(str::to_string);
    }
    Some(host_header.split(':').next().unwrap_or(host_header).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_remote_base_url_is_always_loopback() {
        assert_eq!(classify(Some("ext.example"), ""), Horizon::Loopback);
    }

    #[test]
    fn matching_host_is_external_tunnel() {
        let horizon = classify(Some("ext.example"), "https://ext.example");
        assert_eq!(horizon, Horizon::ExternalTunnel);
    }

    #[test]
    fn host_comparison_is_case_insensitive_and_ignores_port() {
        let horizon = classify(Some("EXT.example:9000"), "https://ext.example");
        assert_eq!(horizon, Horizon::ExternalTunnel);
    }

    #[test]
    fn loopback_host_is_not_external() {
        let horizon = classify(Some("127.0.0.1"), "https://ext.example");
        assert_eq!(horizon, Horizon::Loopback);
    }

    #[test]
    fn external_tunnel_only_allows_remote_api() {
        assert!(is_allowed(Horizon::ExternalTunnel, "/api/remote/assets/file"));
        assert!(!is_allowed(Horizon::ExternalTunnel, "/api/index/stats"));
        assert!(is_allowed(Horizon::Loopback, "/api/index/stats"));
    }
}
