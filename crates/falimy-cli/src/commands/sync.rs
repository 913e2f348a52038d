use falimy_core::sync::{FailureKind, SyncStatus};

use crate::commands::common::{format_sync_timestamp, CliContext};
use crate::error::CliError;

pub async fn run_sync(ctx: &CliContext) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let (session, _) = ctx.start_session(store, false).await?;
    let status = session.trigger_sync().await.unwrap_or_default();
    let expired = session.auth_expired();
    session.close().await;

    if expired {
        return Err(CliError::SessionExpired);
    }
    report_sync(&status)
}

fn report_sync(status: &SyncStatus) -> Result<(), CliError> {
    if let Some(failure) = &status.last_error {
        return match failure.kind {
            FailureKind::AuthExpired => Err(CliError::SessionExpired),
            FailureKind::Transport => {
                println!("Sync failed, changes stay queued: {}", failure.message);
                Ok(())
            }
            FailureKind::Local => Err(CliError::Sync(failure.message.clone())),
        };
    }

    if let Some(report) = status.last_report {
        println!(
            "Sync completed: pushed {}, fetched {}, inserted {}, updated {}, deleted {}",
            report.pushed, report.fetched, report.inserted, report.updated, report.deleted
        );
        if report.push_failed > 0 || report.quarantined > 0 {
            println!(
                "  {} pushes rejected, {} malformed records skipped",
                report.push_failed, report.quarantined
            );
        }
    } else {
        println!("Sync completed");
    }
    Ok(())
}

pub async fn run_status(ctx: &CliContext) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let pending = store.pending_mutations().await?;
    let failed = pending.iter().filter(|entry| entry.last_error.is_some()).count();
    let last_synced_at = store.last_synced_at().await?;

    println!("Profile:   {}", ctx.profile_name);
    println!(
        "Server:    {}",
        ctx.config.server_url.as_deref().unwrap_or("(not configured)")
    );
    println!("Replica:   {}", ctx.db_path.display());
    match crate::auth::load_stored_session(&ctx.profile_name)? {
        Some(session) => println!(
            "Signed in: {} (family {})",
            session.identity.user_id, session.identity.family_id
        ),
        None => println!("Signed in: no"),
    }
    println!(
        "Last sync: {}",
        last_synced_at.map_or_else(|| "never".to_string(), format_sync_timestamp)
    );
    println!("Pending:   {} ({failed} failed)", pending.len());
    Ok(())
}
