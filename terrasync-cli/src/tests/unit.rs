//! Focused unit tests covering sync CLI configuration and output.

use super::helpers::Workspace;
use super::*;
use rstest::rstest;
use std::time::Duration;
use terrasync_core::SyncStatsSnapshot;
use terrasync_data::layers::CADASTRAL_ENDPOINT;
use terrasync_data::sync::{
    DEFAULT_BATCH_SIZE, DEFAULT_PAGE_SIZE, SettingsError, SyncReport, SyncSettings,
};

fn args_with_database() -> SyncArgs {
    SyncArgs {
        database: Some("cadastral.sqlite".into()),
        ..SyncArgs::default()
    }
}

#[rstest]
fn converting_without_database_errors() {
    let err = SyncConfig::try_from(SyncArgs::default()).expect_err("missing database");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_DATABASE);
            assert_eq!(env, ENV_DATABASE);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn defaults_fill_unset_options() {
    let config = SyncConfig::try_from(args_with_database()).expect("config should build");
    assert_eq!(config.endpoint, CADASTRAL_ENDPOINT);
    assert!(config.credentials.is_none());
    assert_eq!(config.settings.page_size, DEFAULT_PAGE_SIZE);
    assert_eq!(config.settings.batch_size, DEFAULT_BATCH_SIZE);
    assert_eq!(config.request_timeout, Duration::from_secs(300));
}

#[rstest]
fn explicit_options_override_settings() {
    let args = SyncArgs {
        endpoint: Some("https://wfs.example/service".to_owned()),
        page_size: Some(250),
        batch_size: Some(400),
        max_concurrent: Some(2),
        requests_per_second: Some(7),
        request_timeout_secs: Some(30),
        ..args_with_database()
    };
    let config = SyncConfig::try_from(args).expect("config should build");
    let expected = SyncSettings::default()
        .with_page_size(250)
        .with_batch_size(400)
        .with_max_concurrent(2)
        .with_requests_per_second(7);
    assert_eq!(config.endpoint, "https://wfs.example/service");
    assert_eq!(config.settings.page_size, expected.page_size);
    assert_eq!(config.settings.batch_size, expected.batch_size);
    assert_eq!(config.settings.max_concurrent, expected.max_concurrent);
    assert_eq!(
        config.settings.requests_per_second,
        expected.requests_per_second
    );
    assert_eq!(config.request_timeout, Duration::from_secs(30));
}

#[rstest]
#[case(Some("alice"), None, ARG_USERNAME, ARG_PASSWORD)]
#[case(None, Some("hunter2"), ARG_PASSWORD, ARG_USERNAME)]
fn credentials_must_come_in_pairs(
    #[case] username: Option<&str>,
    #[case] password: Option<&str>,
    #[case] expected_present: &'static str,
    #[case] expected_missing: &'static str,
) {
    let args = SyncArgs {
        username: username.map(str::to_owned),
        password: password.map(str::to_owned),
        ..args_with_database()
    };
    let err = SyncConfig::try_from(args).expect_err("half credentials");
    match err {
        CliError::IncompleteCredentials { present, missing } => {
            assert_eq!(present, expected_present);
            assert_eq!(missing, expected_missing);
        }
        other => panic!("expected IncompleteCredentials, found {other:?}"),
    }
}

#[rstest]
fn password_never_appears_in_debug_output() {
    let args = SyncArgs {
        username: Some("alice".to_owned()),
        password: Some("hunter2".to_owned()),
        ..args_with_database()
    };
    assert!(!format!("{args:?}").contains("hunter2"));
    let config = SyncConfig::try_from(args).expect("config should build");
    let rendered = format!("{config:?}");
    assert!(rendered.contains("alice"));
    assert!(!rendered.contains("hunter2"));
}

#[rstest]
#[case::page_size(SyncArgs { page_size: Some(0), ..args_with_database() }, SettingsError::ZeroPageSize)]
#[case::batch_size(SyncArgs { batch_size: Some(0), ..args_with_database() }, SettingsError::ZeroBatchSize)]
#[case::concurrency(SyncArgs { max_concurrent: Some(0), ..args_with_database() }, SettingsError::ZeroConcurrency)]
#[case::rate(SyncArgs { requests_per_second: Some(0), ..args_with_database() }, SettingsError::ZeroRate)]
fn zero_pipeline_options_are_rejected(#[case] args: SyncArgs, #[case] expected: SettingsError) {
    let err = SyncConfig::try_from(args).expect_err("zero option");
    match err {
        CliError::InvalidSettings(found) => assert_eq!(found, expected),
        other => panic!("expected InvalidSettings, found {other:?}"),
    }
}

#[rstest]
fn zero_request_timeout_is_rejected() {
    let args = SyncArgs {
        request_timeout_secs: Some(0),
        ..args_with_database()
    };
    let err = SyncConfig::try_from(args).expect_err("zero timeout");
    assert!(matches!(
        err,
        CliError::ZeroValue {
            field: ARG_REQUEST_TIMEOUT_SECS
        }
    ));
}

#[rstest]
fn database_directory_is_rejected() {
    let workspace = Workspace::new();
    let args = SyncArgs {
        database: Some(workspace.root()),
        ..SyncArgs::default()
    };
    let config = SyncConfig::try_from(args).expect("config should build");
    let err = config.validate_destination().expect_err("directory rejected");
    assert!(matches!(err, CliError::DatabaseIsDirectory { .. }));
}

#[rstest]
fn missing_database_file_is_accepted() {
    let workspace = Workspace::new();
    let args = SyncArgs {
        database: Some(workspace.database("fresh.sqlite")),
        ..SyncArgs::default()
    };
    let config = SyncConfig::try_from(args).expect("config should build");
    config.validate_destination().expect("new file is fine");
}

#[rstest]
fn relative_endpoint_fails_to_build_source() {
    let args = SyncArgs {
        endpoint: Some("not a url".to_owned()),
        ..args_with_database()
    };
    let config = SyncConfig::try_from(args).expect("config should build");
    let err = sync::build_source(&config).expect_err("invalid endpoint");
    match err {
        CliError::BuildSource { endpoint, .. } => assert_eq!(endpoint, "not a url"),
        other => panic!("expected BuildSource, found {other:?}"),
    }
}

#[rstest]
fn summary_is_written_as_json() {
    let report = SyncReport {
        total_available: 2500,
        pages_planned: 3,
        stored_rows: 1500,
        stats: SyncStatsSnapshot {
            pages_fetched: 2,
            pages_skipped: 1,
            ..SyncStatsSnapshot::default()
        },
        duration: Duration::from_millis(1500),
        cancelled: false,
    };
    let mut out = Vec::new();
    write_summary(&mut out, &SyncSummary::from(&report)).expect("write summary");

    let value: serde_json::Value = serde_json::from_slice(&out).expect("valid json");
    assert_eq!(value["stored_rows"], 1500);
    assert_eq!(value["complete"], false);
    assert_eq!(value["duration_secs"], 1.5);
    assert_eq!(value["stats"]["pages_skipped"], 1);
    assert!(out.ends_with(b"\n"));
}
