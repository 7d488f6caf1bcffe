//! Runtime settings for the local store, attachments and sync engine.
//!
//! Everything is read from `LOGBOOK_*` environment variables. Unset values
//! fall back to defaults; malformed or contradictory values are rejected.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::attachments::PrepareOptions;
use crate::remote::HttpRemoteService;
use crate::sync::RetryPolicy;
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const ENV_DATA_DIR: &str = "LOGBOOK_DATA_DIR";
pub const ENV_API_URL: &str = "LOGBOOK_API_URL";
pub const ENV_ACCESS_TOKEN: &str = "LOGBOOK_ACCESS_TOKEN";
pub const ENV_RETENTION_DAYS: &str = "LOGBOOK_RETENTION_DAYS";
pub const ENV_ATTACHMENT_MAX_BYTES: &str = "LOGBOOK_ATTACHMENT_MAX_BYTES";
pub const ENV_ATTACHMENT_MAX_DIMENSION: &str = "LOGBOOK_ATTACHMENT_MAX_DIMENSION";
pub const ENV_RETRY_BASE_SECS: &str = "LOGBOOK_RETRY_BASE_SECS";
pub const ENV_RETRY_MAX_SECS: &str = "LOGBOOK_RETRY_MAX_SECS";
pub const ENV_SYNC_INTERVAL_SECS: &str = "LOGBOOK_SYNC_INTERVAL_SECS";

const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

#[derive(Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Base URL of the record API; `None` keeps the client local-only.
    pub api_base_url: Option<String>,
    /// Bearer token obtained by the external auth flow.
    pub access_token: Option<String>,
    /// Age in days after which synced attachments are evicted from the cache.
    pub retention_days: u32,
    pub attachment: PrepareOptions,
    pub retry: RetryPolicy,
    pub auto_sync_interval: Duration,
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("data_dir", &self.data_dir)
            .field("api_base_url", &self.api_base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("retention_days", &self.retention_days)
            .field("attachment", &self.attachment)
            .field("retry", &self.retry)
            .field("auto_sync_interval", &self.auto_sync_interval)
            .finish()
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            api_base_url: None,
            access_token: None,
            retention_days: DEFAULT_RETENTION_DAYS,
            attachment: PrepareOptions::default(),
            retry: RetryPolicy::default(),
            auto_sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
        }
    }
}

impl SyncSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        parse_settings(|key| env::var(key).ok())
    }

    /// Whether a remote is configured.
    #[must_use]
    pub const fn is_remote_configured(&self) -> bool {
        self.api_base_url.is_some()
    }

    /// Build the HTTP remote client, or `None` when running local-only.
    pub fn remote_service(&self) -> Result<Option<HttpRemoteService>> {
        let Some(base_url) = &self.api_base_url else {
            return Ok(None);
        };
        let service =
            HttpRemoteService::new(base_url.as_str())?.with_access_token(self.access_token.clone());
        Ok(Some(service))
    }
}

/// Parse settings through `lookup` so tests need not touch the environment.
pub fn parse_settings(lookup: impl Fn(&str) -> Option<String>) -> Result<SyncSettings> {
    let value = |key: &str| normalize_text_option(lookup(key));
    let defaults = SyncSettings::default();

    let api_base_url = value(ENV_API_URL);
    let access_token = value(ENV_ACCESS_TOKEN);
    if let Some(url) = &api_base_url {
        if !is_http_url(url) {
            return Err(Error::InvalidInput(format!(
                "{ENV_API_URL} must include http:// or https://"
            )));
        }
    } else if access_token.is_some() {
        return Err(Error::InvalidInput(format!(
            "{ENV_ACCESS_TOKEN} is set but {ENV_API_URL} is missing"
        )));
    }

    let retention_days =
        parse_number(ENV_RETENTION_DAYS, value(ENV_RETENTION_DAYS))?.unwrap_or(defaults.retention_days);

    let mut attachment = defaults.attachment;
    if let Some(max_bytes) = parse_positive(ENV_ATTACHMENT_MAX_BYTES, value(ENV_ATTACHMENT_MAX_BYTES))? {
        attachment.max_bytes = max_bytes;
    }
    if let Some(max_dimension) =
        parse_positive(ENV_ATTACHMENT_MAX_DIMENSION, value(ENV_ATTACHMENT_MAX_DIMENSION))?
    {
        attachment.max_dimension = max_dimension;
    }

    let retry_base = parse_positive::<u64>(ENV_RETRY_BASE_SECS, value(ENV_RETRY_BASE_SECS))?
        .map_or(defaults.retry.base, Duration::from_secs);
    let retry_max = parse_positive::<u64>(ENV_RETRY_MAX_SECS, value(ENV_RETRY_MAX_SECS))?
        .map_or(defaults.retry.max, Duration::from_secs);
    if retry_base > retry_max {
        return Err(Error::InvalidInput(format!(
            "{ENV_RETRY_BASE_SECS} must not exceed {ENV_RETRY_MAX_SECS}"
        )));
    }

    let auto_sync_interval =
        parse_positive::<u64>(ENV_SYNC_INTERVAL_SECS, value(ENV_SYNC_INTERVAL_SECS))?
            .map_or(defaults.auto_sync_interval, Duration::from_secs);

    Ok(SyncSettings {
        data_dir: value(ENV_DATA_DIR).map(PathBuf::from),
        api_base_url: api_base_url.map(|url| url.trim_end_matches('/').to_string()),
        access_token,
        retention_days,
        attachment,
        retry: RetryPolicy {
            base: retry_base,
            max: retry_max,
        },
        auto_sync_interval,
    })
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|raw| {
        raw.parse::<T>()
            .map_err(|_| Error::InvalidInput(format!("{key} must be a number, got {raw:?}")))
    })
    .transpose()
}

fn parse_positive<T>(key: &str, raw: Option<String>) -> Result<Option<T>>
where
    T: std::str::FromStr + Default + PartialEq,
{
    match parse_number::<T>(key, raw)? {
        Some(value) if value == T::default() => Err(Error::InvalidInput(format!(
            "{key} must be greater than zero"
        ))),
        parsed => Ok(parsed),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse_from_map(map: &HashMap<&str, &str>) -> Result<SyncSettings> {
        parse_settings(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let settings = parse_from_map(&HashMap::new()).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert!(!settings.is_remote_configured());
        assert!(settings.remote_service().unwrap().is_none());
        assert_eq!(settings.retention_days, 30);
        assert_eq!(settings.auto_sync_interval, Duration::from_secs(60));
    }

    #[test]
    fn parses_overrides_and_trims_api_url() {
        let map = HashMap::from([
            (ENV_API_URL, " https://api.example.com/ "),
            (ENV_ACCESS_TOKEN, "secret-token"),
            (ENV_RETENTION_DAYS, "7"),
            (ENV_ATTACHMENT_MAX_BYTES, "500000"),
            (ENV_RETRY_BASE_SECS, "5"),
            (ENV_RETRY_MAX_SECS, "40"),
            (ENV_DATA_DIR, "/tmp/logbook"),
        ]);

        let settings = parse_from_map(&map).unwrap();

        assert_eq!(
            settings.api_base_url.as_deref(),
            Some("https://api.example.com")
        );
        assert_eq!(settings.retention_days, 7);
        assert_eq!(settings.attachment.max_bytes, 500_000);
        assert_eq!(settings.attachment.max_dimension, 1600);
        assert_eq!(settings.retry.base, Duration::from_secs(5));
        assert_eq!(settings.retry.max, Duration::from_secs(40));
        assert_eq!(settings.data_dir, Some(PathBuf::from("/tmp/logbook")));
        assert!(settings.remote_service().unwrap().is_some());
    }

    #[test]
    fn debug_output_redacts_access_token() {
        let map = HashMap::from([
            (ENV_API_URL, "https://api.example.com"),
            (ENV_ACCESS_TOKEN, "secret-token"),
        ]);
        let rendered = format!("{:?}", parse_from_map(&map).unwrap());
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn token_without_api_url_is_rejected() {
        let map = HashMap::from([(ENV_ACCESS_TOKEN, "secret-token")]);
        match parse_from_map(&map).unwrap_err() {
            Error::InvalidInput(message) => assert!(message.contains(ENV_API_URL)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_values() {
        for (key, value) in [
            (ENV_API_URL, "api.example.com"),
            (ENV_RETENTION_DAYS, "thirty"),
            (ENV_ATTACHMENT_MAX_BYTES, "0"),
            (ENV_SYNC_INTERVAL_SECS, "-5"),
        ] {
            let map = HashMap::from([(key, value)]);
            match parse_from_map(&map).unwrap_err() {
                Error::InvalidInput(message) => assert!(message.contains(key), "{message}"),
                other => panic!("unexpected error for {key}: {other:?}"),
            }
        }
    }

    #[test]
    fn retry_base_cannot_exceed_max() {
        let map = HashMap::from([(ENV_RETRY_BASE_SECS, "600"), (ENV_RETRY_MAX_SECS, "60")]);
        assert!(matches!(
            parse_from_map(&map),
            Err(Error::InvalidInput(_))
        ));
    }
}
