use super::*;

use std::path::Path;

use messhub_core::{AppConfig, Environment};
use messhub_lifecycle::StoreStatus;

const MESS: &str = "22222222-2222-4222-8222-222222222222";
const REQUEST: &str = "44444444-4444-4444-8444-444444444444";

fn test_config(dir: &Path, manifest: &str) -> AppConfig {
    let stores_path = dir.join("stores.yaml");
    std::fs::write(&stores_path, manifest).expect("write manifest");
    AppConfig {
        backend_url: "http://127.0.0.1:9".to_string(),
        backend_anon_key: "anon".to_string(),
        env: Environment::Test,
        log_level: "info".to_string(),
        state_dir: dir.join("state"),
        stores_path,
        request_timeout_secs: 1,
        retry_max_attempts: 1,
        retry_base_delay_ms: 0,
        store_max_retries: 1,
        store_backoff_base_ms: 0,
        store_backoff_cap_ms: 0,
        error_throttle_ms: 0,
        lookup_timeout_ms: None,
    }
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["messhub"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
    assert!(cli.mess.is_none());
}

#[test]
fn parses_init_command() {
    let cli = Cli::try_parse_from(["messhub", "init"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Init)));
}

#[test]
fn parses_sign_in_credentials() {
    let cli = Cli::try_parse_from([
        "messhub",
        "sign-in",
        "--email",
        "cook@example.com",
        "--password",
        "hunter22",
    ])
    .expect("expected valid cli args");

    match cli.command {
        Some(Commands::SignIn { email, password }) => {
            assert_eq!(email, "cook@example.com");
            assert_eq!(password, "hunter22");
        }
        other => panic!("expected sign-in, got {other:?}"),
    }
}

#[test]
fn mess_is_global() {
    let cli = Cli::try_parse_from(["messhub", "eligibility", "--mess", MESS])
        .expect("expected valid cli args");
    assert_eq!(cli.mess, Some(MESS.parse().unwrap()));
    assert!(matches!(
        cli.command,
        Some(Commands::Eligibility { member: None })
    ));
}

#[test]
fn parses_renewal_request_amount_as_decimal() {
    let cli = Cli::try_parse_from([
        "messhub",
        "renewal",
        "request",
        "--plan",
        "55555555-5555-4555-8555-555555555555",
        "--amount",
        "2450.50",
    ])
    .unwrap();

    match cli.command {
        Some(Commands::Renewal {
            command:
                RenewalCommands::Request {
                    amount,
                    points,
                    membership,
                    ..
                },
        }) => {
            assert_eq!(amount, rust_decimal::Decimal::new(245_050, 2));
            assert_eq!(points, 0);
            assert!(membership.is_none());
        }
        other => panic!("expected renewal request, got {other:?}"),
    }
}

#[test]
fn renewal_cancel_requires_request_id() {
    assert!(Cli::try_parse_from(["messhub", "renewal", "cancel"]).is_err());
    assert!(Cli::try_parse_from(["messhub", "renewal", "cancel", "--request", "nope"]).is_err());

    let cli = Cli::try_parse_from(["messhub", "renewal", "cancel", "--request", REQUEST]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Renewal {
            command: RenewalCommands::Cancel { .. }
        })
    ));
}

#[test]
fn points_history_defaults_to_first_page() {
    let cli = Cli::try_parse_from(["messhub", "points", "history"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Points {
            command: PointsCommands::History {
                member: None,
                page: 1,
                per_page: 20
            }
        })
    ));
}

#[tokio::test]
async fn runtime_initializes_manifest_stores_while_signed_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        r"
stores:
  - name: session
    critical: true
    persist_state: true
  - name: membership
    critical: true
    dependencies: [session]
  - name: points
    dependencies: [session]
",
    );

    let runtime = Runtime::start(config, Some(MESS.parse().unwrap()))
        .await
        .expect("runtime starts without a session");

    let states = runtime.lifecycle.stores.store_states();
    let names: Vec<&str> = states.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["session", "membership", "points"]);
    assert!(states
        .iter()
        .all(|(_, state)| state.status == StoreStatus::Initialized));
    assert!(runtime.cache.snapshot().membership.is_none());
    assert!(dir.path().join("state").is_dir());
}

#[tokio::test]
async fn runtime_rejects_unknown_store_names() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        r"
stores:
  - name: session
  - name: inventory
",
    );

    let err = Runtime::start(config, None).await.err().expect("start fails");
    assert!(err.to_string().contains("no initializer for store 'inventory'"));
}

#[tokio::test]
async fn member_falls_back_to_session_and_errors_without_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "stores: []\n");
    let runtime = Runtime::start(config, None).await.unwrap();

    let explicit = Uuid::new_v4();
    assert_eq!(runtime.member(Some(explicit)).unwrap(), explicit);
    assert!(runtime.member(None).is_err());
    assert!(runtime.mess().is_err());
}

#[test]
fn classified_errors_are_reported_once_by_the_cli() {
    use messhub_core::RenewalEligibility;

    let ineligible = anyhow::Error::from(ServiceError::Ineligible(
        RenewalEligibility::pending_request_exists(),
    ));
    assert_eq!(
        report_lines(&ineligible),
        Some(vec![
            "A renewal request is already pending [PENDING_REQUEST_EXISTS]".to_string()
        ])
    );

    let plain = anyhow::anyhow!("no mess selected");
    assert!(report_lines(&plain).is_none());
    assert!(!report(&plain));
}
