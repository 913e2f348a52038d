use std::path::PathBuf;

use clap::Parser;
use falimy_core::models::{List, ListItem, ListType};
use falimy_core::{ClientConfig, LocalStore, ServerId};
use pretty_assertions::assert_eq;

use falimy_core::SessionPersistence;

use crate::auth::{load_stored_session, AuthSession, SessionStore};
use crate::cli::{AuthCommands, Cli, Commands, ItemCommands, TypeArg};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::{
    format_item_lines, format_relative_time, format_sync_timestamp, list_items,
    normalize_identifier, resolve_by_id, resolve_item, resolve_list, CliContext,
};
use crate::error::CliError;

fn auth() -> AuthSession {
    AuthSession {
        server_url: "https://pb.example.com".to_string(),
        token: "token".to_string(),
        identity: falimy_core::AuthIdentity {
            user_id: ServerId::from("user1"),
            family_id: ServerId::from("fam1"),
            email: None,
            name: "Ada".to_string(),
            role: falimy_core::models::MemberRole::Member,
        },
        issued_at: 0,
    }
}

fn list(name: &str) -> List {
    List::new(ServerId::from("fam1"), name, ListType::Shopping, None, 1)
}

#[test]
fn normalize_identifier_trims_and_rejects_empty() {
    assert_eq!(normalize_identifier("  abc ").unwrap(), "abc");
    assert!(matches!(normalize_identifier("   "), Err(CliError::EmptyId)));
}

#[test]
fn resolve_by_id_matches_exact_and_prefix() {
    let first = list("Groceries");
    let second = list("Chores");
    let rows = vec![first.clone(), second.clone()];

    let by_server = resolve_by_id(rows.clone(), first.meta.server_id.as_str(), "List").unwrap();
    assert_eq!(by_server, first);

    let local = second.meta.local_id.to_string();
    let by_local = resolve_by_id(rows.clone(), &local, "List").unwrap();
    assert_eq!(by_local, second);

    let prefix: String = first.meta.server_id.as_str().chars().take(12).collect();
    let by_prefix = resolve_by_id(rows.clone(), &prefix, "List").unwrap();
    assert_eq!(by_prefix, first);

    let missing = resolve_by_id(rows, "zzzzzzzzzzzzzzzzzz", "List").unwrap_err();
    assert!(matches!(missing, CliError::NotFound("List", _)));
}

#[test]
fn resolve_by_id_reports_ambiguous_prefix() {
    let mut first = list("Groceries");
    let mut second = list("Chores");
    first.meta.server_id = ServerId::from("abc111");
    second.meta.server_id = ServerId::from("abc222");

    let error = resolve_by_id(vec![first, second], "abc", "List").unwrap_err();
    match error {
        CliError::AmbiguousId(message) => {
            assert!(message.contains("abc111"));
            assert!(message.contains("abc222"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn items_resolve_within_family_lists() {
    let store = LocalStore::open_in_memory().unwrap();
    let groceries = store
        .create_list(&ServerId::from("fam1"), "Groceries", ListType::Shopping, None)
        .await
        .unwrap();
    let milk = store
        .add_item(&groceries.meta.local_id, "Milk", None, None, None)
        .await
        .unwrap();
    let theirs = store
        .create_list(&ServerId::from("fam2"), "Theirs", ListType::Todo, None)
        .await
        .unwrap();

    let resolved = resolve_list(&store, &auth(), groceries.meta.server_id.as_str())
        .await
        .unwrap();
    assert_eq!(resolved.name, "Groceries");
    assert!(matches!(
        resolve_list(&store, &auth(), theirs.meta.server_id.as_str()).await,
        Err(CliError::NotFound("List", _))
    ));

    let item: ListItem = resolve_item(&store, &auth(), milk.meta.server_id.as_str())
        .await
        .unwrap();
    assert_eq!(item.name, "Milk");

    store.toggle_item(&milk.meta.local_id, None).await.unwrap();
    let items = list_items(&store, &resolved).await.unwrap();
    let lines = format_item_lines(&items);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("[x] "));
    assert!(lines[0].ends_with("  *"));
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
}

#[test]
fn format_sync_timestamp_uses_utc() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn cli_parses_item_add() {
    let cli = Cli::try_parse_from([
        "falimy",
        "item",
        "add",
        "groc",
        "Milk",
        "--quantity",
        "2",
        "--profile",
        "tablet",
    ])
    .unwrap();
    assert_eq!(cli.profile.as_deref(), Some("tablet"));
    match cli.command {
        Commands::Item {
            command:
                ItemCommands::Add {
                    list,
                    name,
                    quantity,
                    note,
                },
        } => {
            assert_eq!(list, "groc");
            assert_eq!(name, "Milk");
            assert_eq!(quantity.as_deref(), Some("2"));
            assert_eq!(note, None);
        }
        _ => panic!("expected item add"),
    }
}

#[test]
fn cli_parses_list_type() {
    let cli = Cli::try_parse_from(["falimy", "list", "add", "Trip", "--type", "packing"]).unwrap();
    match cli.command {
        Commands::List {
            command: crate::cli::ListCommands::Add { name, list_type },
        } => {
            assert_eq!(name, "Trip");
            assert_eq!(list_type, TypeArg::Packing);
            assert_eq!(ListType::from(list_type), ListType::Packing);
        }
        _ => panic!("expected list add"),
    }
}

#[test]
fn server_url_is_required_for_remote_commands() {
    let ctx = CliContext {
        profile_name: "default".to_string(),
        config: ClientConfig::default(),
        db_path: PathBuf::from("unused.db"),
    };
    assert!(matches!(
        ctx.server_url(),
        Err(CliError::ServerNotConfigured)
    ));
}

#[tokio::test]
async fn store_opens_under_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CliContext {
        profile_name: "default".to_string(),
        config: ClientConfig::default(),
        db_path: dir.path().join("nested").join("falimy.db"),
    };
    let store = ctx.open_store().unwrap();
    assert!(store.pending_mutations().await.unwrap().is_empty());
    assert!(ctx.db_path.exists());
}

#[tokio::test]
async fn logout_forgets_session_and_replica() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = CliContext {
        profile_name: "logout-test".to_string(),
        config: ClientConfig::default(),
        db_path: dir.path().join("falimy.db"),
    };
    SessionStore::new(&ctx.profile_name)
        .save_session(&auth())
        .unwrap();
    let store = ctx.open_store().unwrap();
    store
        .create_list(&ServerId::from("fam1"), "Groceries", ListType::Shopping, None)
        .await
        .unwrap();

    run_auth(AuthCommands::Logout, &ctx).await.unwrap();

    assert_eq!(load_stored_session(&ctx.profile_name).unwrap(), None);
    assert!(store.pending_mutations().await.unwrap().is_empty());
    assert!(store
        .lists_for_family(&ServerId::from("fam1"))
        .await
        .unwrap()
        .is_empty());
}

#[test]
fn default_log_filter_covers_the_sync_layer() {
    assert!(tracing_subscriber::EnvFilter::try_new(crate::DEFAULT_LOG_FILTER).is_ok());
    assert!(crate::DEFAULT_LOG_FILTER
        .split(',')
        .any(|directive| directive == "falimy_core=info"));
}
