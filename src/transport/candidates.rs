use std::net::IpAddr;

pub const CHAT_PATH: &str = "/chat";
pub const IMAGE_GENERATION_PATH: &str = "/v1/images/generations";

/// Operation paths that may already be present on a configured base URL.
const KNOWN_SUFFIXES: [&str; 4] = [IMAGE_GENERATION_PATH, CHAT_PATH, "/v1/images", "/v1/chat"];

/// One configured backend, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCandidate {
    pub base_url: String,
    pub is_local_host: bool,
}

impl BackendCandidate {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let base_url = normalize_base_url(raw);
        let is_local_host = is_local_host(&base_url);
        Self {
            base_url,
            is_local_host,
        }
    }

    /// Full URL for an operation path such as [`CHAT_PATH`].
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let mut url = String::with_capacity(self.base_url.len() + path.len());
        url.push_str(&self.base_url);
        url.push_str(path);
        url
    }
}

/// Strip trailing slashes and any known operation suffixes, repeatedly.
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    let mut url = raw.trim();
    loop {
        let before = url.len();
        url = url.trim_end_matches('/');
        for suffix in KNOWN_SUFFIXES {
            if let Some(stripped) = url.strip_suffix(suffix) {
                // Keep hosts literally named like a suffix ("https://chat").
                if stripped.contains("://") && !stripped.ends_with("://") {
                    url = stripped;
                }
            }
        }
        if url.len() == before {
            break;
        }
    }
    url.to_owned()
}

/// Loopback detection: `localhost`, `127.0.0.0/8`, `::1`.
#[must_use]
pub fn is_local_host(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.host() {
            Some(url::Host::Domain(domain)) => {
                domain.eq_ignore_ascii_case("localhost")
                    || domain.to_ascii_lowercase().ends_with(".localhost")
            }
            Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
            Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
            None => false,
        },
        Err(_) => {
            let lower = url.to_ascii_lowercase();
            lower.contains("localhost") || lower.contains("127.0.0.1")
        }
    }
}

/// Normalize, de-duplicate, and order candidates: remote first, then local,
/// preserving configured order within each group.
#[must_use]
pub fn ordered_candidates<S: AsRef<str>>(raw: &[S]) -> Vec<BackendCandidate> {
    let mut candidates: Vec<BackendCandidate> = Vec::with_capacity(raw.len());
    for entry in raw {
        let entry = entry.as_ref().trim();
        if entry.is_empty() {
            continue;
        }
        let candidate = BackendCandidate::new(entry);
        if candidate.base_url.is_empty()
            || candidates
                .iter()
                .any(|existing| existing.base_url == candidate.base_url)
        {
            continue;
        }
        candidates.push(candidate);
    }
    // sort_by_key is stable.
    candidates.sort_by_key(|candidate| candidate.is_local_host);
    candidates
}

/// Models listing URLs derived from a provider API address.
#[must_use]
pub fn models_endpoints(api_url: &str) -> Vec<String> {
    let base = api_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Vec::new();
    }
    if base.ends_with("/v1") {
        return vec![format!("{base}/models")];
    }
    vec![format!("{base}/v1/models"), format!("{base}/models")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_single_chat_segment() {
        let candidate = BackendCandidate::new("https://h/chat");
        assert_eq!(candidate.base_url, "https://h");
        assert_eq!(candidate.endpoint(CHAT_PATH), "https://h/chat");
    }

    #[test]
    fn test_normalize_repeated_suffixes() {
        assert_eq!(normalize_base_url("https://h/chat/chat/"), "https://h");
        assert_eq!(
            normalize_base_url("https://h/api/v1/images/generations/"),
            "https://h/api"
        );
        assert_eq!(normalize_base_url(" https://h/api// "), "https://h/api");
        assert_eq!(normalize_base_url("https://h/chatroom"), "https://h/chatroom");
        assert_eq!(normalize_base_url("https://chat"), "https://chat");
    }

    #[test]
    fn test_local_host_detection() {
        assert!(is_local_host("http://localhost:8080"));
        assert!(is_local_host("http://127.0.0.1:9000"));
        assert!(is_local_host("http://127.1.2.3"));
        assert!(is_local_host("http://[::1]:3000"));
        assert!(!is_local_host("https://api.example.com"));
        assert!(!is_local_host("http://10.0.0.2"));
    }

    #[test]
    fn test_local_candidates_sorted_last_stable() {
        let ordered = ordered_candidates(&[
            "http://localhost:1",
            "https://a.example/chat",
            "http://127.0.0.1:2",
            "https://b.example",
            "  ",
            "https://a.example/",
        ]);
        let urls: Vec<&str> = ordered.iter().map(|c| c.base_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.example",
                "https://b.example",
                "http://localhost:1",
                "http://127.0.0.1:2",
            ]
        );
    }

    #[test]
    fn test_models_endpoints() {
        assert_eq!(
            models_endpoints("https://api.openai.com/"),
            vec![
                "https://api.openai.com/v1/models".to_string(),
                "https://api.openai.com/models".to_string()
            ]
        );
        assert_eq!(
            models_endpoints("https://api.example.com/v1"),
            vec!["https://api.example.com/v1/models".to_string()]
        );
        assert!(models_endpoints("  ").is_empty());
    }
}
