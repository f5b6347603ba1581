use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub webhook_secret: String,
    pub record_store_url: String,
    pub record_store_key: String,
    pub provider_api_url: String,
    pub provider_api_key: String,
    pub redis_url: Option<String>,
    pub notification_url: Option<String>,
    pub alert_recipients: Vec<String>,
    pub request_timeout_seconds: u64,
    pub queue_max_pending_per_entity: usize,
    pub queue_max_concurrent_entities: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub event_timeout_seconds: u64,
    pub recovery_interval_seconds: u64,
    pub recovery_max_attempts: u32,
    pub resync_interval_hours: u64,
    pub resync_days_ahead: i64,
    pub catalog_refresh_seconds: u64,
    pub office_catalog_path: Option<String>,
    pub assignment_rules_path: Option<String>,
    pub hard_delete_cancellations: bool,
    pub recurring_horizon_weeks: u32,
    pub ledger_retention_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            webhook_secret: String::new(),
            record_store_url: String::new(),
            record_store_key: String::new(),
            provider_api_url: "https://intakeq.com/api/v1".to_string(),
            provider_api_key: String::new(),
            redis_url: None,
            notification_url: None,
            alert_recipients: Vec::new(),
            request_timeout_seconds: 15,
            queue_max_pending_per_entity: 32,
            queue_max_concurrent_entities: 0,
            retry_max_attempts: 4,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 8000,
            event_timeout_seconds: 60,
            recovery_interval_seconds: 900,
            recovery_max_attempts: 5,
            resync_interval_hours: 24,
            resync_days_ahead: 14,
            catalog_refresh_seconds: 3600,
            office_catalog_path: None,
            assignment_rules_path: None,
            hard_delete_cancellations: true,
            recurring_horizon_weeks: 12,
            ledger_retention_days: 7,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            port: parsed_or("PORT", defaults.port),
            webhook_secret: env::var("WEBHOOK_SECRET")
                .unwrap_or_else(|_| {
                    warn!("WEBHOOK_SECRET not set, every webhook will be rejected");
                    String::new()
                }),
            record_store_url: env::var("RECORD_STORE_URL")
                .unwrap_or_else(|_| {
                    warn!("RECORD_STORE_URL not set, using in-memory record store");
                    String::new()
                }),
            record_store_key: env::var("RECORD_STORE_KEY")
                .unwrap_or_else(|_| {
                    warn!("RECORD_STORE_KEY not set, using empty value");
                    String::new()
                }),
            provider_api_url: env::var("PROVIDER_API_URL")
                .unwrap_or_else(|_| {
                    warn!("PROVIDER_API_URL not set, using default");
                    defaults.provider_api_url.clone()
                }),
            provider_api_key: env::var("PROVIDER_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("PROVIDER_API_KEY not set, using empty value");
                    String::new()
                }),
            redis_url: optional("REDIS_URL"),
            notification_url: optional("NOTIFICATION_URL"),
            alert_recipients: env::var("ALERT_RECIPIENTS")
                .map(|raw| {
                    raw.split(',')
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            request_timeout_seconds: parsed_or("REQUEST_TIMEOUT_SECONDS", defaults.request_timeout_seconds),
            queue_max_pending_per_entity: parsed_or("QUEUE_MAX_PENDING_PER_ENTITY", defaults.queue_max_pending_per_entity),
            queue_max_concurrent_entities: parsed_or("QUEUE_MAX_CONCURRENT_ENTITIES", defaults.queue_max_concurrent_entities),
            retry_max_attempts: parsed_or("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_base_delay_ms: parsed_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: parsed_or("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            event_timeout_seconds: parsed_or("EVENT_TIMEOUT_SECONDS", defaults.event_timeout_seconds),
            recovery_interval_seconds: parsed_or("RECOVERY_INTERVAL_SECONDS", defaults.recovery_interval_seconds),
            recovery_max_attempts: parsed_or("RECOVERY_MAX_ATTEMPTS", defaults.recovery_max_attempts),
            resync_interval_hours: parsed_or("RESYNC_INTERVAL_HOURS", defaults.resync_interval_hours),
            resync_days_ahead: parsed_or("RESYNC_DAYS_AHEAD", defaults.resync_days_ahead),
            catalog_refresh_seconds: parsed_or("CATALOG_REFRESH_SECONDS", defaults.catalog_refresh_seconds),
            office_catalog_path: optional("OFFICE_CATALOG_PATH"),
            assignment_rules_path: optional("ASSIGNMENT_RULES_PATH"),
            hard_delete_cancellations: parsed_or("HARD_DELETE_CANCELLATIONS", defaults.hard_delete_cancellations),
            recurring_horizon_weeks: parsed_or("RECURRING_HORIZON_WEEKS", defaults.recurring_horizon_weeks),
            ledger_retention_days: parsed_or("LEDGER_RETENTION_DAYS", defaults.ledger_retention_days),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.webhook_secret.is_empty()
            && self.is_record_store_configured()
            && self.is_provider_configured()
    }

    pub fn is_record_store_configured(&self) -> bool {
        !self.record_store_url.is_empty() && !self.record_store_key.is_empty()
    }

    pub fn is_provider_configured(&self) -> bool {
        !self.provider_api_url.is_empty() && !self.provider_api_key.is_empty()
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_not_configured() {
        let config = AppConfig::default();
        assert!(!config.is_configured());
        assert!(!config.is_record_store_configured());
        assert_eq!(config.retry_max_attempts, 4);
        assert!(config.hard_delete_cancellations);
    }

    #[test]
    fn test_record_store_configured() {
        let config = AppConfig {
            record_store_url: "http://localhost:54321".to_string(),
            record_store_key: "key".to_string(),
            ..AppConfig::default()
        };
        assert!(config.is_record_store_configured());
    }
}
