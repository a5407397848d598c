use demi_masa_api::config::{Config, ConfigError, DEFAULT_TRIPAY_BASE_URL};
use demi_masa_api::services::payment::DEFAULT_DISCOUNT_PERCENT;
use std::env;
use std::sync::Mutex;
use std::time::Duration;

// Use a mutex to serialize tests that modify environment variables
static ENV_LOCK: Mutex<()> = Mutex::new(());

const ALL_VARS: &[&str] = &[
    "DEMI_MASA_TEST_MODE",
    "DATABASE_URL",
    "SECRET_KEY",
    "ORIGIN_URL",
    "ACCESS_TOKEN_EXPIRY_SECS",
    "REFRESH_TOKEN_EXPIRY_DAYS",
    "DB_RETRY_ATTEMPTS",
    "DB_RETRY_BACKOFF_MS",
    "COUPON_DISCOUNT_PERCENT",
    "HOST",
    "PORT",
    "TRIPAY_BASE_URL",
    "TRIPAY_MERCHANT_CODE",
    "TRIPAY_API_KEY",
    "TRIPAY_PRIVATE_KEY",
];

fn setup_required_env() {
    env::set_var("DEMI_MASA_TEST_MODE", "1");
    env::set_var("DATABASE_URL", "postgres://localhost/test");
    env::set_var("SECRET_KEY", "test_secret_key");
    env::set_var("ORIGIN_URL", "https://api.demi-masa.test/");
}

fn cleanup_env() {
    for var in ALL_VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_config_from_env_with_all_required() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env();
    setup_required_env();

    let config = Config::from_env().expect("Failed to load config");

    assert_eq!(config.database_url, "postgres://localhost/test");
    assert_eq!(config.secret_key, "test_secret_key");
    assert_eq!(config.origin_url, "https://api.demi-masa.test"); // Trailing slash trimmed
    assert_eq!(config.access_token_expiry_secs, 300); // Default
    assert_eq!(config.refresh_token_expiry_days, 30); // Default
    assert_eq!(config.db_retry_attempts, 3);
    assert_eq!(config.db_retry_backoff_ms, 25);
    assert_eq!(config.coupon_discount_percent, DEFAULT_DISCOUNT_PERCENT);
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8080);
    assert!(config.tripay.is_none());

    cleanup_env();
}

#[test]
fn test_config_from_env_with_custom_values() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env();
    setup_required_env();

    env::set_var("ACCESS_TOKEN_EXPIRY_SECS", "600");
    env::set_var("REFRESH_TOKEN_EXPIRY_DAYS", "7");
    env::set_var("DB_RETRY_ATTEMPTS", "5");
    env::set_var("DB_RETRY_BACKOFF_MS", "100");
    env::set_var("COUPON_DISCOUNT_PERCENT", "50");
    env::set_var("HOST", "127.0.0.1");
    env::set_var("PORT", "3000");

    let config = Config::from_env().expect("Failed to load config");

    assert_eq!(config.access_token_expiry_secs, 600);
    assert_eq!(config.refresh_token_expiry_days, 7);
    assert_eq!(config.coupon_discount_percent, 50);
    assert_eq!(config.server_addr(), "127.0.0.1:3000");

    let policy = config.retry_policy();
    assert_eq!(policy.max_attempts, 5);
    assert_eq!(policy.backoff, Duration::from_millis(100));

    cleanup_env();
}

#[test]
fn test_config_missing_required_var() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env();
    setup_required_env();
    env::remove_var("SECRET_KEY");

    let result = Config::from_env();
    assert!(matches!(result, Err(ConfigError::MissingVar(ref var)) if var == "SECRET_KEY"));

    cleanup_env();
}

#[test]
fn test_config_rejects_invalid_values() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    for (var, value) in [
        ("PORT", "not_a_number"),
        ("DB_RETRY_ATTEMPTS", "0"),
        ("COUPON_DISCOUNT_PERCENT", "101"),
        ("ACCESS_TOKEN_EXPIRY_SECS", "-1"),
        ("REFRESH_TOKEN_EXPIRY_DAYS", "0"),
    ] {
        cleanup_env();
        setup_required_env();
        env::set_var(var, value);

        match Config::from_env() {
            Err(ConfigError::InvalidValue { var: ref got, .. }) => assert_eq!(got, var),
            other => panic!("{}={} should be invalid, got {:?}", var, value, other),
        }
    }

    cleanup_env();
}

#[test]
fn test_tripay_requires_all_credentials() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env();
    setup_required_env();

    env::set_var("TRIPAY_MERCHANT_CODE", "T1234");
    env::set_var("TRIPAY_API_KEY", "api-key");
    let config = Config::from_env().expect("Failed to load config");
    assert!(config.tripay.is_none(), "partial credentials disable the gateway");

    env::set_var("TRIPAY_PRIVATE_KEY", "private-key");
    let config = Config::from_env().expect("Failed to load config");
    let tripay = config.tripay.expect("gateway should be configured");
    assert_eq!(tripay.base_url, DEFAULT_TRIPAY_BASE_URL);
    assert_eq!(tripay.merchant_code, "T1234");
    assert_eq!(tripay.api_key, "api-key");
    assert_eq!(tripay.private_key, "private-key");

    env::set_var("TRIPAY_BASE_URL", "https://tripay.co.id/api/");
    let config = Config::from_env().expect("Failed to load config");
    assert_eq!(config.tripay.unwrap().base_url, "https://tripay.co.id/api");

    cleanup_env();
}
