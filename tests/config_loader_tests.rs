use portal_sync::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const TEST_KEY_B64: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("PORTAL_"))
        .collect();
    for key in keys {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn set_required_env() {
    unsafe {
        env::set_var("PORTAL_CRYPTO_KEY", TEST_KEY_B64);
        env::set_var("PORTAL_OPERATOR_TOKEN", "local-operator");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

fn loader_in(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(dir.path().to_path_buf())
}

#[test]
fn loads_defaults_when_only_required_settings_present() {
    let _guard = env_guard();
    clear_env();
    set_required_env();
    let dir = TempDir::new().unwrap();

    let cfg = loader_in(&dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.reporting_utc_offset_minutes, 540);
    assert_eq!(cfg.sync.failure_threshold, 3);
    assert_eq!(cfg.scheduler.daily_sync_at, "03:00");
    assert_eq!(cfg.scheduler.sync_window_days, 7);
    assert_eq!(cfg.crypto_key.as_ref().map(Vec::len), Some(32));
    assert_eq!(cfg.operator_tokens, vec!["local-operator".to_string()]);
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();
    set_required_env();

    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", "PORTAL_API_BIND_ADDR=127.0.0.1:3000\nPORTAL_SYNC_WINDOW_DAYS=5\n");
    // The profile is chosen in .env.local, before profile files load.
    write_env_file(
        &dir,
        ".env.local",
        "PORTAL_PROFILE=test\nPORTAL_API_BIND_ADDR=127.0.0.1:4000\n",
    );
    write_env_file(&dir, ".env.test", "PORTAL_API_BIND_ADDR=192.168.0.10:5000\n");
    write_env_file(
        &dir,
        ".env.test.local",
        "PORTAL_API_BIND_ADDR=10.0.0.5:6000\nPORTAL_DAILY_SYNC_AT=04:30\n",
    );

    let cfg = loader_in(&dir).load().expect("layered config loads");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.scheduler.sync_window_days, 5);
    assert_eq!(cfg.scheduler.daily_sync_at, "04:30");
    clear_env();
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();
    set_required_env();

    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", "PORTAL_SYNC_CONCURRENCY=2\nPORTAL_LOG_LEVEL=warn\n");
    unsafe {
        env::set_var("PORTAL_SYNC_CONCURRENCY", "8");
    }

    let cfg = loader_in(&dir).load().expect("config loads");

    assert_eq!(cfg.sync.concurrency, 8);
    assert_eq!(cfg.log_level, "warn");
    clear_env();
}

#[test]
fn operator_token_list_is_split_and_trimmed() {
    let _guard = env_guard();
    clear_env();
    set_required_env();
    unsafe {
        env::set_var("PORTAL_OPERATOR_TOKENS", " first , second,,third ");
    }

    let dir = TempDir::new().unwrap();
    let cfg = loader_in(&dir).load().expect("config loads");

    assert_eq!(cfg.operator_tokens, vec!["first", "second", "third"]);
    clear_env();
}

#[test]
fn missing_crypto_key_is_an_error() {
    let _guard = env_guard();
    clear_env();
    unsafe {
        env::set_var("PORTAL_OPERATOR_TOKEN", "local-operator");
    }

    let dir = TempDir::new().unwrap();
    let err = loader_in(&dir).load().expect_err("key is required");
    assert!(matches!(err, ConfigError::MissingCryptoKey));
    clear_env();
}

#[test]
fn short_crypto_key_is_rejected() {
    let _guard = env_guard();
    clear_env();
    set_required_env();
    unsafe {
        env::set_var("PORTAL_CRYPTO_KEY", "c2hvcnQ=");
    }

    let dir = TempDir::new().unwrap();
    let err = loader_in(&dir).load().expect_err("short key rejected");
    assert!(matches!(err, ConfigError::InvalidCryptoKeyLength { length: 5 }));
    clear_env();
}

#[test]
fn unparsable_number_names_the_setting() {
    let _guard = env_guard();
    clear_env();
    set_required_env();
    unsafe {
        env::set_var("PORTAL_SYNC_FAILURE_THRESHOLD", "three");
    }

    let dir = TempDir::new().unwrap();
    let err = loader_in(&dir).load().expect_err("invalid number rejected");
    match err {
        ConfigError::InvalidValue { key, value } => {
            assert_eq!(key, "SYNC_FAILURE_THRESHOLD");
            assert_eq!(value, "three");
        }
        other => panic!("unexpected error: {other}"),
    }
    clear_env();
}

#[test]
fn out_of_range_scheduler_settings_are_rejected() {
    let _guard = env_guard();
    clear_env();
    set_required_env();
    unsafe {
        env::set_var("PORTAL_SYNC_WINDOW_DAYS", "45");
    }

    let dir = TempDir::new().unwrap();
    let err = loader_in(&dir).load().expect_err("window too long");
    assert!(matches!(err, ConfigError::InvalidSyncWindow { value: 45 }));
    clear_env();
}
