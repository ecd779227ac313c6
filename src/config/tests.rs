use std::io::Write;

use serial_test::serial;

use super::*;

fn minimal_raw() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.store.endpoint = Some("https://sheets.example.test/query".to_string());
    raw.store.users_table = Some("Users".to_string());
    raw.store.items_table = Some("Items".to_string());
    raw
}

fn invalid_key(result: Result<Settings, LoadError>) -> &'static str {
    match result {
        Err(LoadError::Invalid { key, .. }) => key,
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("settings unexpectedly valid"),
    }
}

#[test]
fn defaults_fill_everything_but_store_identifiers() {
    let settings = Settings::from_raw(minimal_raw()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.store.request_timeout, Duration::from_secs(30));
    assert!(settings.store.access_token.is_none());
    assert_eq!(settings.columns, ColumnSettings::default());
    assert_eq!(settings.vocabulary, CatalogVocabulary::default());
    assert_eq!(settings.sync.interval, Duration::from_secs(300));
    assert_eq!(settings.sync.staleness, Duration::from_secs(300));
    assert_eq!(settings.sync.startup_attempts.get(), 3);
    assert_eq!(settings.sync.startup_backoff, Duration::from_secs(5));
    assert_eq!(settings.sync.catalog_strategy, CatalogStrategy::Replace);
}

#[test]
fn missing_required_identifiers_are_fatal() {
    let mut raw = minimal_raw();
    raw.store.endpoint = None;
    assert_eq!(invalid_key(Settings::from_raw(raw)), "store.endpoint");

    let mut raw = minimal_raw();
    raw.store.users_table = Some("   ".to_string());
    assert_eq!(invalid_key(Settings::from_raw(raw)), "store.users_table");

    let mut raw = minimal_raw();
    raw.store.items_table = None;
    assert_eq!(invalid_key(Settings::from_raw(raw)), "store.items_table");
}

#[test]
fn endpoint_must_be_http() {
    let mut raw = minimal_raw();
    raw.store.endpoint = Some("ftp://sheets.example.test".to_string());
    assert_eq!(invalid_key(Settings::from_raw(raw)), "store.endpoint");

    let mut raw = minimal_raw();
    raw.store.endpoint = Some("not a url".to_string());
    assert_eq!(invalid_key(Settings::from_raw(raw)), "store.endpoint");
}

#[test]
fn zero_durations_are_rejected() {
    let mut raw = minimal_raw();
    raw.sync.interval_seconds = Some(0);
    assert_eq!(invalid_key(Settings::from_raw(raw)), "sync.interval_seconds");

    let mut raw = minimal_raw();
    raw.sync.startup_attempts = Some(0);
    assert_eq!(invalid_key(Settings::from_raw(raw)), "sync.startup_attempts");

    let mut raw = minimal_raw();
    raw.store.request_timeout_seconds = Some(0);
    assert_eq!(
        invalid_key(Settings::from_raw(raw)),
        "store.request_timeout_seconds"
    );
}

#[test]
fn order_steps_are_validated_and_normalized() {
    let mut raw = minimal_raw();
    raw.vocabulary.default_order_steps = Some(vec![5.0, 1.0, 5.0]);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.vocabulary.default_order_steps, vec![1.0, 5.0]);

    let mut raw = minimal_raw();
    raw.vocabulary.default_order_steps = Some(vec![1.0, -2.0]);
    assert_eq!(
        invalid_key(Settings::from_raw(raw)),
        "vocabulary.default_order_steps"
    );

    let mut raw = minimal_raw();
    raw.vocabulary.default_order_steps = Some(Vec::new());
    assert_eq!(
        invalid_key(Settings::from_raw(raw)),
        "vocabulary.default_order_steps"
    );
}

#[test]
fn empty_labels_are_rejected() {
    let mut raw = minimal_raw();
    raw.vocabulary.unit_milliliter = Some(" ".to_string());
    assert_eq!(
        invalid_key(Settings::from_raw(raw)),
        "vocabulary.unit_milliliter"
    );

    let mut raw = minimal_raw();
    raw.columns.items.status = Some(String::new());
    assert_eq!(invalid_key(Settings::from_raw(raw)), "columns.items.status");
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = minimal_raw();
    raw.logging.level = Some("info".to_string());
    raw.sync.interval_seconds = Some(60);

    let args = ServeArgs {
        common: CommonOverrides {
            store_endpoint: Some("http://localhost:8080/sql".to_string()),
            log_level: Some("debug".to_string()),
            log_json: Some(true),
        },
        sync_interval_seconds: Some(15),
    };

    raw.apply_serve_overrides(&args);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
    assert_eq!(settings.store.endpoint.as_str(), "http://localhost:8080/sql");
    assert_eq!(settings.sync.interval, Duration::from_secs(15));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["shopkeep"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(ServeArgs::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_sync_arguments() {
    let args = CliArgs::parse_from([
        "shopkeep",
        "sync",
        "--store-endpoint",
        "http://localhost:9000",
        "--log-json",
        "yes",
    ]);

    match args.command.expect("sync command") {
        Command::Sync(sync) => {
            assert_eq!(
                sync.common.store_endpoint.as_deref(),
                Some("http://localhost:9000")
            );
            assert_eq!(sync.common.log_json, Some(true));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "shopkeep",
        "serve",
        "--sync-interval-seconds",
        "120",
        "--log-level",
        "warn",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.sync_interval_seconds, Some(120));
            assert_eq!(serve.common.log_level.as_deref(), Some("warn"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial]
fn file_and_environment_layers_are_merged() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    writeln!(
        file,
        r#"
[store]
endpoint = "https://sheets.example.test/query"
users_table = "Users"
items_table = "Items"

[sync]
catalog_strategy = "incremental"
staleness_seconds = 90
"#
    )
    .expect("write config");

    // SAFETY: serialized with every other test touching the environment.
    unsafe {
        std::env::set_var("SHOPKEEP__STORE__ACCESS_TOKEN", "secret-token");
        std::env::set_var("SHOPKEEP__SYNC__STALENESS_SECONDS", "45");
    }

    let cli = CliArgs {
        config_file: Some(file.path().to_path_buf()),
        command: Some(Command::Sync(SyncArgs::default())),
    };
    let result = load(&cli);

    unsafe {
        std::env::remove_var("SHOPKEEP__STORE__ACCESS_TOKEN");
        std::env::remove_var("SHOPKEEP__SYNC__STALENESS_SECONDS");
    }

    let settings = result.expect("settings load");
    assert_eq!(settings.store.users_table, "Users");
    assert_eq!(settings.store.access_token.as_deref(), Some("secret-token"));
    assert_eq!(settings.sync.staleness, Duration::from_secs(45));
    assert_eq!(settings.sync.catalog_strategy, CatalogStrategy::Incremental);
}
