use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use falimy_core::models::{List, ListItem, Member, RowState};
use falimy_core::store::SortOrder;
use falimy_core::{
    ClientConfig, LocalStore, Model, PocketBaseClient, Query, SessionContext, SessionOptions,
};
use serde::Serialize;

use crate::auth::{load_stored_session, AuthSession, PocketBaseAuthService};
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Resolved profile, config and replica location for one invocation
#[derive(Debug, Clone)]
pub struct CliContext {
    pub profile_name: String,
    pub config: ClientConfig,
    pub db_path: PathBuf,
}

impl CliContext {
    /// Profile file first, then `FALIMY_*` variables, then `--db-path`.
    pub fn resolve(profile: Option<&str>, db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = profiles.resolve_profile_name(profile);
        let config = profiles
            .profile(&profile_name)
            .map(CliProfile::client_config)
            .unwrap_or_default()
            .apply_env()
            .map_err(CliError::Config)?;
        let db_path = db_path
            .or_else(|| config.database_path.clone())
            .unwrap_or_else(|| default_db_path(&profile_name));

        Ok(Self {
            profile_name,
            config,
            db_path,
        })
    }

    pub fn server_url(&self) -> Result<&str, CliError> {
        self.config
            .server_url
            .as_deref()
            .ok_or(CliError::ServerNotConfigured)
    }

    pub fn open_store(&self) -> Result<LocalStore, CliError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(LocalStore::open_path(&self.db_path)?)
    }

    pub fn auth_service(&self) -> Result<PocketBaseAuthService, CliError> {
        Ok(PocketBaseAuthService::new(
            &self.profile_name,
            self.server_url()?,
        )?)
    }

    /// Stored session without contacting the server
    pub fn signed_in(&self) -> Result<AuthSession, CliError> {
        load_stored_session(&self.profile_name)?.ok_or(CliError::NotSignedIn)
    }

    /// Refresh the stored session and begin a live session on `store`.
    pub async fn start_session(
        &self,
        store: LocalStore,
        realtime_enabled: bool,
    ) -> Result<(SessionContext, AuthSession), CliError> {
        let auth = self
            .auth_service()?
            .restore_session()
            .await?
            .ok_or(CliError::NotSignedIn)?;
        let remote = PocketBaseClient::new(&auth.server_url, auth.token.clone())?;
        tracing::info!(
            "Starting session for family {} via profile '{}'",
            auth.identity.family_id,
            self.profile_name
        );

        let options = SessionOptions {
            realtime_enabled,
            ..SessionOptions::from(&self.config)
        };
        let session = SessionContext::new(store, options);
        session
            .begin(auth.identity.clone(), Arc::new(remote))
            .await?;
        Ok((session, auth))
    }
}

pub fn default_db_path(profile_name: &str) -> PathBuf {
    let file_name = if profile_name == "default" {
        "falimy.db".to_string()
    } else {
        format!("falimy-{profile_name}.db")
    };
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("falimy")
        .join(file_name)
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Pick the one row whose local id or server id equals or starts with `query`.
pub fn resolve_by_id<T: Model>(
    rows: Vec<T>,
    query: &str,
    label: &'static str,
) -> Result<T, CliError> {
    let query = normalize_identifier(query)?;
    let ids = |row: &T| (row.meta().local_id.as_str(), row.meta().server_id.to_string());

    if let Some(exact) = rows.iter().find(|row| {
        let (local, server) = ids(row);
        local == query || server == query
    }) {
        return Ok(exact.clone());
    }

    let mut matching: Vec<T> = rows
        .into_iter()
        .filter(|row| {
            let (local, server) = ids(row);
            local.starts_with(&query) || server.starts_with(&query)
        })
        .collect();

    match matching.len() {
        0 => Err(CliError::NotFound(label, query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|row| row.meta().server_id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "{label} prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub async fn family_lists(store: &LocalStore, auth: &AuthSession) -> Result<Vec<List>, CliError> {
    Ok(store.lists_for_family(&auth.identity.family_id).await?)
}

pub async fn resolve_list(
    store: &LocalStore,
    auth: &AuthSession,
    query: &str,
) -> Result<List, CliError> {
    resolve_by_id(family_lists(store, auth).await?, query, "List")
}

pub async fn list_items(store: &LocalStore, list: &List) -> Result<Vec<ListItem>, CliError> {
    Ok(store
        .fetch(
            &Query::new()
                .eq("list_id", list.meta.server_id.as_str())
                .sort_by("is_checked", SortOrder::Asc)
                .sort_by("sort_order", SortOrder::Asc),
        )
        .await?)
}

pub async fn resolve_item(
    store: &LocalStore,
    auth: &AuthSession,
    query: &str,
) -> Result<ListItem, CliError> {
    let lists = family_lists(store, auth).await?;
    let mut items = Vec::new();
    for list in &lists {
        items.extend(list_items(store, list).await?);
    }
    resolve_by_id(items, query, "Item")
}

pub async fn family_members(
    store: &LocalStore,
    auth: &AuthSession,
) -> Result<Vec<Member>, CliError> {
    Ok(store
        .fetch(
            &Query::new()
                .eq("family_id", auth.identity.family_id.as_str())
                .sort_by("name", SortOrder::Asc),
        )
        .await?)
}

#[derive(Debug, Serialize)]
pub struct ListRow {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub list_type: String,
    pub status: String,
    pub pending: bool,
    pub updated_at: i64,
}

impl From<&List> for ListRow {
    fn from(list: &List) -> Self {
        Self {
            id: list.meta.local_id.to_string(),
            server_id: list.meta.server_id.to_string(),
            name: list.name.clone(),
            list_type: list.list_type.to_string(),
            status: list.status.to_string(),
            pending: list.meta.sync_status == RowState::Pending,
            updated_at: list.meta.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemRow {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub quantity: Option<String>,
    pub note: Option<String>,
    pub checked: bool,
    pub pending: bool,
}

impl From<&ListItem> for ItemRow {
    fn from(item: &ListItem) -> Self {
        Self {
            id: item.meta.local_id.to_string(),
            server_id: item.meta.server_id.to_string(),
            name: item.name.clone(),
            quantity: item.quantity.clone(),
            note: item.note.clone(),
            checked: item.is_checked,
            pending: item.meta.sync_status == RowState::Pending,
        }
    }
}

pub fn format_list_lines(lists: &[List]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    lists
        .iter()
        .map(|list| {
            let marker = pending_marker(list.meta.sync_status);
            format!(
                "{:<15}  {:<30}  {:<9} {:<9}  {}{marker}",
                list.meta.server_id.as_str(),
                list.name,
                list.list_type.as_str(),
                list.status.as_str(),
                format_relative_time(list.meta.updated_at, now_ms),
            )
        })
        .collect()
}

pub fn format_item_lines(items: &[ListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let check = if item.is_checked { "[x]" } else { "[ ]" };
            let quantity = item
                .quantity
                .as_deref()
                .map(|quantity| format!(" ({quantity})"))
                .unwrap_or_default();
            let marker = pending_marker(item.meta.sync_status);
            format!(
                "{check} {:<15}  {}{quantity}{marker}",
                item.meta.server_id.as_str(),
                item.name
            )
        })
        .collect()
}

const fn pending_marker(state: RowState) -> &'static str {
    match state {
        RowState::Pending => "  *",
        RowState::Synced => "",
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
