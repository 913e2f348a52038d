use falimy_core::auth::JoinRequest;

use crate::auth::{clear_stored_session, AuthSession};
use crate::cli::AuthCommands;
use crate::commands::common::{format_sync_timestamp, CliContext};
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, ctx: &CliContext) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { email, password } => {
            let session = ctx.auth_service()?.login(&email, &password).await?;
            print_signed_in(ctx, &session);
            Ok(())
        }
        AuthCommands::Join {
            family,
            code,
            email,
            password,
            name,
        } => {
            let request = JoinRequest {
                family_id: family.trim().to_string(),
                invite_code: code,
                email,
                password,
                name: name.trim().to_string(),
            };
            let session = ctx.auth_service()?.join_family(&request).await?;
            print_signed_in(ctx, &session);
            Ok(())
        }
        AuthCommands::Status => {
            let session = match ctx.server_url() {
                Ok(_) => ctx.auth_service()?.restore_session().await?,
                Err(_) => crate::auth::load_stored_session(&ctx.profile_name)?,
            };
            if let Some(session) = session {
                let email_label = session.identity.email.as_deref().unwrap_or("(no email)");
                println!(
                    "Profile '{}' is signed in as {} ({}) in family {} (token issued {})",
                    ctx.profile_name,
                    email_label,
                    session.identity.role.as_str(),
                    session.identity.family_id,
                    format_sync_timestamp(session.issued_at)
                );
            } else {
                println!("Profile '{}' is not signed in.", ctx.profile_name);
            }
            Ok(())
        }
        AuthCommands::Logout => {
            clear_stored_session(&ctx.profile_name)?;
            let store = ctx.open_store()?;
            store.clear().await?;
            println!(
                "Signed out profile '{}' and cleared {}",
                ctx.profile_name,
                ctx.db_path.display()
            );
            Ok(())
        }
    }
}

fn print_signed_in(ctx: &CliContext, session: &AuthSession) {
    let label = session
        .identity
        .email
        .as_deref()
        .unwrap_or(session.identity.name.as_str());
    println!(
        "Signed in profile '{}' as {label} (family {})",
        ctx.profile_name, session.identity.family_id
    );
}
