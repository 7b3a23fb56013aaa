use once_cell::sync::Lazy;
use regex::Regex;

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|/)([a-zA-Z0-9\-\.]+?)\.?(#|\?|/|$)").expect("valid regex")
});

/// Hostname portion of a URL or DNS record value, trailing dot removed.
/// Falls back to `fallback` when nothing host-like is found.
pub fn normalize(s: &str, fallback: &str) -> String {
    if s.is_empty() {
        return fallback.to_string();
    }
    match HOSTNAME.captures(s).and_then(|caps| caps.get(2)) {
        Some(host) => host.as_str().to_string(),
        None => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("https://www.example.com/path?q=1", "x"), "www.example.com");
        assert_eq!(normalize("target.example.com.", "x"), "target.example.com");
        assert_eq!(normalize("api.example.com", "x"), "api.example.com");
        assert_eq!(normalize("", "fallback"), "fallback");
        assert_eq!(normalize("!!!", "fallback"), "fallback");
    }
}
