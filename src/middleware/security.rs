use axum::{
    extract::{Request, State},
    http::header::HOST,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::AppError, state::AppState};

/// Rejects requests whose Host header is not in `TRUSTED_HOSTS`. A `*`
/// entry disables the check.
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !host_is_trusted(host, &state.config.trusted_hosts) {
        tracing::warn!(host, "Rejected request for untrusted host");
        return AppError::Forbidden("Host is not allowed.".to_string()).into_response();
    }

    next.run(request).await
}

fn host_is_trusted(host_header: &str, trusted_hosts: &[String]) -> bool {
    if trusted_hosts.iter().any(|trusted| trusted == "*") {
        return true;
    }
    let host = strip_port(host_header.trim()).to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }
    trusted_hosts.iter().any(|trusted| {
        let trusted = trusted.trim().to_ascii_lowercase();
        match trusted.strip_prefix("*.") {
            Some(suffix) => host.ends_with(&format!(".{suffix}")),
            None => host == trusted,
        }
    })
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map(|(address, _)| address.trim_start_matches('['))
            .unwrap_or(host);
    }
    host.rsplit_once(':').map(|(name, _)| name).unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::host_is_trusted;

    fn hosts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn matches_exact_hosts_ignoring_port() {
        let trusted = hosts(&["localhost", "127.0.0.1"]);
        assert!(host_is_trusted("localhost:8000", &trusted));
        assert!(host_is_trusted("127.0.0.1", &trusted));
        assert!(!host_is_trusted("evil.example", &trusted));
        assert!(!host_is_trusted("", &trusted));
    }

    #[test]
    fn supports_wildcards() {
        assert!(host_is_trusted("anything", &hosts(&["*"])));
        let trusted = hosts(&["*.billing.example"]);
        assert!(host_is_trusted("api.billing.example", &trusted));
        assert!(!host_is_trusted("billing.example", &trusted));
    }
}
