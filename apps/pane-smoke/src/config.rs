//! Environment-backed configuration for `pane-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use pane_core::{MessageId, PaginationConfig};

const DEFAULT_HISTORY_LEN: u64 = 500;
const DEFAULT_JUMP_TARGET: MessageId = 120;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_FETCH_RETRIES: u32 = 3;
const MAX_GAP_FILL_CAP: u32 = 100;

/// Runtime configuration used by the smoke driver.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Pagination tuning forwarded to the pane runtime.
    pub pagination: PaginationConfig,
    /// Number of synthetic messages seeded into the demo conversation.
    pub history_len: u64,
    /// Message the driver jumps to after the first older page.
    pub jump_target: MessageId,
    /// Per-call timeout applied by the retrying source.
    pub fetch_timeout: Duration,
    /// Retries for transient source failures.
    pub fetch_retries: u32,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = PaginationConfig::default();

        let page_size = parse_or("PANE_PAGE_SIZE", defaults.page_size, &mut lookup)?;
        let gap_fill_cap = parse_or("PANE_GAP_FILL_CAP", defaults.gap_fill_cap, &mut lookup)?;
        let neighbourhood_window = parse_or(
            "PANE_NEIGHBOURHOOD_WINDOW",
            defaults.neighbourhood_window,
            &mut lookup,
        )?;
        let bottom_epsilon_px = parse_or(
            "PANE_BOTTOM_EPSILON_PX",
            defaults.bottom_epsilon_px,
            &mut lookup,
        )?;
        let jump_settle_ms = parse_or("PANE_JUMP_SETTLE_MS", defaults.jump_settle_ms, &mut lookup)?;
        let history_len = parse_or("PANE_HISTORY_LEN", DEFAULT_HISTORY_LEN, &mut lookup)?;
        let jump_target = parse_or("PANE_JUMP_TARGET", DEFAULT_JUMP_TARGET, &mut lookup)?;
        let fetch_timeout_ms =
            parse_or("PANE_FETCH_TIMEOUT_MS", DEFAULT_FETCH_TIMEOUT_MS, &mut lookup)?;
        let fetch_retries = parse_or("PANE_FETCH_RETRIES", DEFAULT_FETCH_RETRIES, &mut lookup)?;

        require_positive("PANE_PAGE_SIZE", page_size)?;
        require_positive("PANE_NEIGHBOURHOOD_WINDOW", neighbourhood_window)?;
        require_positive("PANE_HISTORY_LEN", history_len)?;
        require_positive("PANE_FETCH_TIMEOUT_MS", fetch_timeout_ms)?;
        if gap_fill_cap == 0 || gap_fill_cap > MAX_GAP_FILL_CAP {
            return Err(ConfigError::InvalidValue {
                key: "PANE_GAP_FILL_CAP",
                value: gap_fill_cap.to_string(),
                reason: format!("must be between 1 and {MAX_GAP_FILL_CAP}"),
            });
        }
        if !(bottom_epsilon_px > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "PANE_BOTTOM_EPSILON_PX",
                value: bottom_epsilon_px.to_string(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if jump_target == 0 || jump_target > history_len {
            return Err(ConfigError::InvalidValue {
                key: "PANE_JUMP_TARGET",
                value: jump_target.to_string(),
                reason: format!("must be between 1 and {history_len}"),
            });
        }

        Ok(Self {
            pagination: PaginationConfig {
                page_size,
                gap_fill_cap,
                neighbourhood_window,
                bottom_epsilon_px,
                jump_settle_ms,
                ..defaults
            },
            history_len,
            jump_target,
            fetch_timeout: Duration::from_millis(fetch_timeout_ms),
            fetch_retries,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed or is out of range.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key).map(|value| value.trim().to_owned()) else {
        return Ok(default);
    };
    if value.is_empty() {
        return Ok(default);
    }
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn require_positive<T>(key: &'static str, value: T) -> Result<(), ConfigError>
where
    T: Default + PartialEq + fmt::Display,
{
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config_from_pairs(&[]).expect("empty environment should parse");

        assert_eq!(cfg.pagination, PaginationConfig::default());
        assert_eq!(cfg.history_len, DEFAULT_HISTORY_LEN);
        assert_eq!(cfg.jump_target, DEFAULT_JUMP_TARGET);
        assert_eq!(cfg.fetch_timeout, Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS));
        assert_eq!(cfg.fetch_retries, DEFAULT_FETCH_RETRIES);
    }

    #[test]
    fn parses_pagination_overrides() {
        let cfg = config_from_pairs(&[
            ("PANE_PAGE_SIZE", "50"),
            ("PANE_GAP_FILL_CAP", " 80 "),
            ("PANE_NEIGHBOURHOOD_WINDOW", "10"),
            ("PANE_BOTTOM_EPSILON_PX", "12.5"),
            ("PANE_JUMP_SETTLE_MS", "0"),
            ("PANE_HISTORY_LEN", "1000"),
            ("PANE_JUMP_TARGET", "900"),
            ("PANE_FETCH_RETRIES", "0"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.pagination.page_size, 50);
        assert_eq!(cfg.pagination.gap_fill_cap, 80);
        assert_eq!(cfg.pagination.neighbourhood_window, 10);
        assert_eq!(cfg.pagination.bottom_epsilon_px, 12.5);
        assert_eq!(cfg.pagination.jump_settle_ms, 0);
        assert_eq!(cfg.pagination.highlight_ms, PaginationConfig::default().highlight_ms);
        assert_eq!(cfg.history_len, 1_000);
        assert_eq!(cfg.jump_target, 900);
        assert_eq!(cfg.fetch_retries, 0);
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[("PANE_PAGE_SIZE", "abc")])
            .expect_err("invalid page size should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "PANE_PAGE_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_page_size() {
        let err = config_from_pairs(&[("PANE_PAGE_SIZE", "0")]).expect_err("zero must fail");
        assert_eq!(
            err.to_string(),
            "invalid PANE_PAGE_SIZE='0': must be at least 1"
        );
    }

    #[test]
    fn rejects_gap_fill_cap_above_hard_limit() {
        let err = config_from_pairs(&[("PANE_GAP_FILL_CAP", "101")])
            .expect_err("cap above 100 must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "PANE_GAP_FILL_CAP",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_positive_bottom_epsilon() {
        for value in ["0", "-4", "NaN"] {
            let err = config_from_pairs(&[("PANE_BOTTOM_EPSILON_PX", value)])
                .expect_err("non-positive epsilon must fail");
            assert!(matches!(
                err,
                ConfigError::InvalidValue {
                    key: "PANE_BOTTOM_EPSILON_PX",
                    ..
                }
            ));
        }
    }

    #[test]
    fn rejects_jump_target_outside_history() {
        let err = config_from_pairs(&[("PANE_HISTORY_LEN", "50"), ("PANE_JUMP_TARGET", "51")])
            .expect_err("target beyond history must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "PANE_JUMP_TARGET",
                ..
            }
        ));
    }
}
