//! Continuation path sanitization

/// Where a flow continues when no usable `next` is supplied
pub const DEFAULT_NEXT: &str = "/org";

const MAX_DECODE_PASSES: usize = 2;

/// Reduce an untrusted `next` value to a same-origin relative path, or
/// `default` when that is not possible.
pub fn sanitize_next(raw: Option<&str>, default: &str) -> String {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return default.to_string();
    };

    let mut candidate = raw.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        if candidate.starts_with('/') {
            break;
        }
        match urlencoding::decode(&candidate) {
            Ok(decoded) if decoded != candidate => candidate = decoded.into_owned(),
            _ => break,
        }
    }

    if is_relative_path(&candidate) {
        candidate
    } else {
        default.to_string()
    }
}

fn is_relative_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(raw: &str) -> String {
        sanitize_next(Some(raw), DEFAULT_NEXT)
    }

    #[test]
    fn absolute_urls_fall_back_to_default() {
        assert_eq!(sanitize("https://evil.example/"), "/org");
        assert_eq!(sanitize("https%3A%2F%2Fevil.example%2F"), "/org");
        assert_eq!(sanitize("javascript:alert(1)"), "/org");
    }

    #[test]
    fn relative_paths_pass_unchanged() {
        assert_eq!(sanitize("/org"), "/org");
        assert_eq!(
            sanitize("/auth/accept?inviteId=42&em=a%40x.com"),
            "/auth/accept?inviteId=42&em=a%40x.com"
        );
    }

    #[test]
    fn encoded_paths_are_decoded() {
        assert_eq!(sanitize("%2Fdashboard"), "/dashboard");
        assert_eq!(sanitize("%252Fdashboard"), "/dashboard");
        assert_eq!(sanitize("%25252Fdashboard"), "/org");
    }

    #[test]
    fn protocol_relative_and_backslash_tricks_are_rejected() {
        assert_eq!(sanitize("//evil.example"), "/org");
        assert_eq!(sanitize("%2F%2Fevil.example"), "/org");
        assert_eq!(sanitize("/\\evil.example"), "/org");
        assert_eq!(sanitize("/org\r\nSet-Cookie: x=1"), "/org");
    }

    #[test]
    fn missing_or_blank_uses_default() {
        assert_eq!(sanitize_next(None, "/org"), "/org");
        assert_eq!(sanitize_next(Some("  "), "/welcome"), "/welcome");
    }
}
