//! Environment-driven configuration for the count featurizer, pipeline and logging.

use std::env;

use chrono::Duration;
use thiserror::Error;

use crate::count::CountFeaturizerConfig;
use crate::observability::{LogFormat, LoggingConfig};
use crate::time_bins::TimeBinEdge;

pub const DEFAULT_PARTITIONS: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
}

pub fn count_config_from_env() -> Result<CountFeaturizerConfig, ConfigError> {
    let mut config = CountFeaturizerConfig::default();

    if let Some(raw) = non_empty_var("EHR_FEATURIZE_ONTOLOGY_EXPANSION") {
        config.is_ontology_expansion = parse_bool_var("EHR_FEATURIZE_ONTOLOGY_EXPANSION", &raw)?;
    }

    if let Some(raw) = non_empty_var("EHR_FEATURIZE_EXCLUDED_CODES") {
        config.excluded_codes = raw
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect();
    }

    if let Some(raw) = non_empty_var("EHR_FEATURIZE_TIME_BINS") {
        config.time_bins = Some(parse_time_bins(&raw).ok_or(ConfigError::InvalidValue {
            var: "EHR_FEATURIZE_TIME_BINS",
            value: raw.clone(),
        })?);
    }

    if let Some(raw) = non_empty_var("EHR_FEATURIZE_NUMERIC_DECILES") {
        config.numeric_value_decile = parse_bool_var("EHR_FEATURIZE_NUMERIC_DECILES", &raw)?;
    }

    if let Some(raw) = non_empty_var("EHR_FEATURIZE_TEXT_VALUES") {
        config.string_value_combination = parse_bool_var("EHR_FEATURIZE_TEXT_VALUES", &raw)?;
    }

    if let Some(raw) = non_empty_var("EHR_FEATURIZE_TEXT_PREFIX_CHARS") {
        config.characters_for_string_values = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                var: "EHR_FEATURIZE_TEXT_PREFIX_CHARS",
                value: raw.clone(),
            })?;
    }

    Ok(config)
}

pub fn partitions_from_env() -> Result<usize, ConfigError> {
    match non_empty_var("EHR_FEATURIZE_PARTITIONS") {
        None => Ok(DEFAULT_PARTITIONS),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(partitions) if partitions > 0 => Ok(partitions),
            _ => Err(ConfigError::InvalidValue {
                var: "EHR_FEATURIZE_PARTITIONS",
                value: raw,
            }),
        },
    }
}

/// Reads `EHR_FEATURIZE_LOG_LEVEL` (filter directive), `EHR_FEATURIZE_LOG_FORMAT`
/// (`json` or `text`) and `EHR_FEATURIZE_LOG_THREAD_IDS`.
pub fn logging_config_from_env() -> Result<LoggingConfig, ConfigError> {
    let mut config = LoggingConfig::default();

    if let Some(level) = non_empty_var("EHR_FEATURIZE_LOG_LEVEL") {
        config.level = level;
    }

    if let Some(raw) = non_empty_var("EHR_FEATURIZE_LOG_FORMAT") {
        config.format = match raw.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "text" => LogFormat::Text,
            _ => {
                return Err(ConfigError::InvalidValue {
                    var: "EHR_FEATURIZE_LOG_FORMAT",
                    value: raw,
                })
            }
        };
    }

    if let Some(raw) = non_empty_var("EHR_FEATURIZE_LOG_THREAD_IDS") {
        config.thread_ids = parse_bool_var("EHR_FEATURIZE_LOG_THREAD_IDS", &raw)?;
    }

    Ok(config)
}

/// Parses `90d,180d,open` style lists. Units: `d`, `h`, `s`.
pub fn parse_time_bins(raw: &str) -> Option<Vec<TimeBinEdge>> {
    raw.split(',')
        .map(str::trim)
        .map(|token| {
            if token.eq_ignore_ascii_case("open") {
                return Some(TimeBinEdge::Unbounded);
            }
            let (split, _) = token.char_indices().last()?;
            let (amount, unit) = token.split_at(split);
            let amount: i64 = amount.parse().ok()?;
            let duration = match unit {
                "d" => Duration::try_days(amount)?,
                "h" => Duration::try_hours(amount)?,
                "s" => Duration::try_seconds(amount)?,
                _ => return None,
            };
            Some(TimeBinEdge::Within(duration))
        })
        .collect()
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_bool_var(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    parse_bool(raw).ok_or_else(|| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::test_env::with_env_vars;
    use super::*;

    const ALL_VARS: [&str; 10] = [
        "EHR_FEATURIZE_ONTOLOGY_EXPANSION",
        "EHR_FEATURIZE_EXCLUDED_CODES",
        "EHR_FEATURIZE_TIME_BINS",
        "EHR_FEATURIZE_NUMERIC_DECILES",
        "EHR_FEATURIZE_TEXT_VALUES",
        "EHR_FEATURIZE_TEXT_PREFIX_CHARS",
        "EHR_FEATURIZE_PARTITIONS",
        "EHR_FEATURIZE_LOG_LEVEL",
        "EHR_FEATURIZE_LOG_FORMAT",
        "EHR_FEATURIZE_LOG_THREAD_IDS",
    ];

    fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
        ALL_VARS.iter().map(|var| (*var, None)).collect()
    }

    #[test]
    fn defaults_when_env_missing() {
        let (config, partitions) =
            with_env_vars(&cleared(), || (count_config_from_env(), partitions_from_env()));
        assert_eq!(config, Ok(CountFeaturizerConfig::default()));
        assert_eq!(partitions, Ok(DEFAULT_PARTITIONS));
    }

    #[test]
    fn parses_every_variable() {
        let mut vars = cleared();
        vars.extend([
            ("EHR_FEATURIZE_ONTOLOGY_EXPANSION", Some("yes")),
            ("EHR_FEATURIZE_EXCLUDED_CODES", Some("A, B,,C")),
            ("EHR_FEATURIZE_TIME_BINS", Some("90d, 12h,open")),
            ("EHR_FEATURIZE_NUMERIC_DECILES", Some("1")),
            ("EHR_FEATURIZE_TEXT_VALUES", Some("true")),
            ("EHR_FEATURIZE_TEXT_PREFIX_CHARS", Some("16")),
            ("EHR_FEATURIZE_PARTITIONS", Some("8")),
        ]);
        let (config, partitions) =
            with_env_vars(&vars, || (count_config_from_env(), partitions_from_env()));
        let config = config.expect("config parses");

        assert!(config.is_ontology_expansion);
        assert_eq!(config.excluded_codes, vec!["A", "B", "C"]);
        assert_eq!(
            config.time_bins,
            Some(vec![
                TimeBinEdge::Within(Duration::days(90)),
                TimeBinEdge::Within(Duration::hours(12)),
                TimeBinEdge::Unbounded,
            ])
        );
        assert!(config.numeric_value_decile);
        assert!(config.string_value_combination);
        assert_eq!(config.characters_for_string_values, 16);
        assert_eq!(partitions, Ok(8));
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut vars = cleared();
        vars.extend([
            ("EHR_FEATURIZE_TIME_BINS", Some("90x")),
            ("EHR_FEATURIZE_PARTITIONS", Some("0")),
        ]);
        let (config, partitions) =
            with_env_vars(&vars, || (count_config_from_env(), partitions_from_env()));
        assert_eq!(
            config,
            Err(ConfigError::InvalidValue {
                var: "EHR_FEATURIZE_TIME_BINS",
                value: "90x".to_string(),
            })
        );
        assert!(partitions.is_err());
    }

    #[test]
    fn logging_defaults_and_overrides() {
        let defaults = with_env_vars(&cleared(), logging_config_from_env);
        assert_eq!(defaults, Ok(LoggingConfig::default()));

        let mut vars = cleared();
        vars.extend([
            ("EHR_FEATURIZE_LOG_LEVEL", Some("ehr_featurize=debug")),
            ("EHR_FEATURIZE_LOG_FORMAT", Some("JSON")),
            ("EHR_FEATURIZE_LOG_THREAD_IDS", Some("on")),
        ]);
        let config = with_env_vars(&vars, logging_config_from_env).expect("logging config parses");
        assert_eq!(config.level, "ehr_featurize=debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.thread_ids);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut vars = cleared();
        vars.push(("EHR_FEATURIZE_LOG_FORMAT", Some("yaml")));
        assert_eq!(
            with_env_vars(&vars, logging_config_from_env),
            Err(ConfigError::InvalidValue {
                var: "EHR_FEATURIZE_LOG_FORMAT",
                value: "yaml".to_string(),
            })
        );
    }

    #[test]
    fn time_bin_tokens() {
        assert_eq!(
            parse_time_bins("3600s"),
            Some(vec![TimeBinEdge::Within(Duration::hours(1))])
        );
        assert_eq!(parse_time_bins(""), None);
        assert_eq!(parse_time_bins("d"), None);
        assert_eq!(parse_time_bins("ten d"), None);
    }
}
