//! Tests for logging configuration

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.include_target);
    }

    #[test]
    fn test_from_lookup_reads_level_and_format() {
        let config = LoggingConfig::from_lookup(lookup(&[
            (ENV_LOG_LEVEL, "aixgo_guard_auth=debug,warn"),
            (ENV_LOG_FORMAT, "JSON"),
        ]));

        assert_eq!(config.level, "aixgo_guard_auth=debug,warn");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_from_lookup_ignores_unknown_format() {
        let config = LoggingConfig::from_lookup(lookup(&[(ENV_LOG_FORMAT, "xml")]));
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_blank_level_keeps_default() {
        let config = LoggingConfig::from_lookup(lookup(&[(ENV_LOG_LEVEL, "  ")]));
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!(" json ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!(matches!(
            "yaml".parse::<LogFormat>(),
            Err(LoggingError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig::default().with_level("aixgo_guard_auth=loudest");
        assert!(matches!(config.env_filter(), Err(LoggingError::Config(_))));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: LoggingConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_init_tracing_only_once() {
        let config = LoggingConfig::default()
            .with_level("warn")
            .with_format(LogFormat::Json);

        let _ = init_tracing(&config);
        let second = init_tracing(&config);
        assert!(matches!(second, Err(LoggingError::Tracing(_))));
    }
}
