use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub crm_api_url: String,
    pub crm_api_token: String,
    pub checkout_api_url: String,
    pub checkout_api_key: String,
    pub messenger_api_url: String,
    pub messenger_api_token: String,
    /// UTC hour the daily reconciliation cycle runs at (0-23)
    pub run_hour_utc: u32,
    /// Fixed offset of the business timezone, in hours from UTC
    pub business_tz_offset_hours: i32,
    /// Substring marking a customer email as synthetic/test traffic
    pub test_customer_pattern: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/splitpay".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            crm_api_url: std::env::var("CRM_API_URL")
                .unwrap_or_else(|_| "https://api.pipedrive.com/v1".to_string()),
            crm_api_token: std::env::var("CRM_API_TOKEN").unwrap_or_default(),
            checkout_api_url: std::env::var("CHECKOUT_API_URL")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
            checkout_api_key: std::env::var("CHECKOUT_API_KEY").unwrap_or_default(),
            messenger_api_url: std::env::var("MESSENGER_API_URL")
                .unwrap_or_else(|_| "https://api.manychat.com".to_string()),
            messenger_api_token: std::env::var("MESSENGER_API_TOKEN").unwrap_or_default(),
            run_hour_utc: std::env::var("RUN_HOUR_UTC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            business_tz_offset_hours: std::env::var("BUSINESS_TZ_OFFSET_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            test_customer_pattern: std::env::var("TEST_CUSTOMER_PATTERN")
                .unwrap_or_else(|_| "+test@".to_string()),
        })
    }
}
