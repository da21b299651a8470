use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Service settings, read once from the environment at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    /// sysfs directory of the PWM chip.
    pub pwm_chip: PathBuf,
    /// Channel 0 drives GPIO 18 on a Raspberry Pi.
    pub pwm_channel: u32,
    /// Named pipe the controller writes commands to.
    pub fifo: PathBuf,
    pub write_timeout: Duration,
    pub tick_interval: Duration,
    /// Append logs here (the file the alert checker scans) instead of stdout.
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let write_timeout_ms: u64 = parse_or(&get, "CHIME_WRITE_TIMEOUT_MS", 250)?;
        let tick_ms: u64 = parse_or(&get, "CHIME_TICK_MS", 1000)?;
        if write_timeout_ms == 0 {
            bail!("CHIME_WRITE_TIMEOUT_MS must be greater than zero");
        }
        if tick_ms == 0 {
            bail!("CHIME_TICK_MS must be greater than zero");
        }

        Ok(Config {
            pwm_chip: get("CHIME_PWM_CHIP")
                .unwrap_or_else(|| "/sys/class/pwm/pwmchip0".to_string())
                .into(),
            pwm_channel: parse_or(&get, "CHIME_PWM_CHANNEL", 0)?,
            fifo: get("CHIME_FIFO")
                .unwrap_or_else(|| "/tmp/music".to_string())
                .into(),
            write_timeout: Duration::from_millis(write_timeout_ms),
            tick_interval: Duration::from_millis(tick_ms),
            log_file: get("CHIME_LOG_FILE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} {value:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_pi_deployment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.pwm_chip, PathBuf::from("/sys/class/pwm/pwmchip0"));
        assert_eq!(config.pwm_channel, 0);
        assert_eq!(config.fifo, PathBuf::from("/tmp/music"));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.write_timeout, Duration::from_millis(250));
        assert!(config.log_file.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("CHIME_PWM_CHANNEL", "1"),
            ("CHIME_FIFO", "/run/chime"),
            ("CHIME_TICK_MS", " 500 "),
            ("CHIME_LOG_FILE", "/var/log/shower"),
        ])
        .unwrap();
        assert_eq!(config.pwm_channel, 1);
        assert_eq!(config.fifo, PathBuf::from("/run/chime"));
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/shower")));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = config(&[("CHIME_PWM_CHANNEL", "zero")]).unwrap_err();
        assert!(err.to_string().contains("CHIME_PWM_CHANNEL"), "{err}");
        assert!(config(&[("CHIME_TICK_MS", "0")]).is_err());
        assert!(config(&[("CHIME_WRITE_TIMEOUT_MS", "-5")]).is_err());
    }
}
