use crate::cli::ConfigCommands;
use crate::config_profiles::{normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            server,
            sync_interval,
            retention_days,
            no_activate,
        } => run_config_init(
            global_profile,
            server,
            sync_interval,
            retention_days,
            no_activate,
        ),
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn run_config_init(
    profile_name: Option<&str>,
    server: Option<String>,
    sync_interval: Option<u64>,
    retention_days: Option<u64>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let existing = config.profile(&profile_name).cloned().unwrap_or_default();

    let server_url = normalize_text_option(server)
        .or_else(|| normalize_text_option(std::env::var("FALIMY_SERVER_URL").ok()))
        .or(existing.server_url.clone())
        .ok_or(CliError::ServerNotConfigured)?;

    let mut updated = existing;
    updated.server_url = Some(server_url);
    if sync_interval.is_some() {
        updated.sync_interval_secs = sync_interval;
    }
    if retention_days.is_some() {
        updated.location_retention_days = retention_days;
    }
    updated
        .client_config()
        .validated()
        .map_err(CliError::Config)?;

    *config.profile_mut_or_default(&profile_name) = updated;
    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }
    let path = config.save().map_err(CliError::Config)?;

    println!("Saved profile '{profile_name}' to {}", path.display());
    Ok(())
}
