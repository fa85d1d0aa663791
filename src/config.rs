use crate::error::ConfigError;
use chrono::FixedOffset;
use std::env;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    pub addr: SocketAddr,
    pub db_path: String,
    pub ocr_url: String,
    pub cache_ttl: Duration,
    /// Upper bound on cached responses.
    pub cache_capacity: NonZeroUsize,
    /// Time zone used to stamp scan log entries.
    pub utc_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let offset_hours: i32 = parse(&lookup, "SCAN_UTC_OFFSET_HOURS", "7")?;
        let utc_offset = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| {
            ConfigError::Invalid {
                var: "SCAN_UTC_OFFSET_HOURS",
                value: offset_hours.to_string(),
            }
        })?;
        Ok(Config {
            addr: parse(&lookup, "PLATE_SCANNER_ADDR", "0.0.0.0:5000")?,
            db_path: lookup("PLATE_SCANNER_DB").unwrap_or_else(|| "/data/plates.db".to_string()),
            ocr_url: lookup("OCR_URL").unwrap_or_else(|| "http://localhost:8866/ocr".to_string()),
            cache_ttl: Duration::from_secs(parse(&lookup, "CACHE_TTL_SECS", "300")?),
            cache_capacity: parse(&lookup, "CACHE_CAPACITY", "1024")?,
            utc_offset,
        })
    }
}

fn parse<T, F>(lookup: &F, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    let value = lookup(var).unwrap_or_else(|| default.to_string());
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}
