use crate::commands::common::{resolve_item, CliContext};
use crate::error::CliError;

pub async fn run_item_check(ctx: &CliContext, item: &str) -> Result<(), CliError> {
    let auth = ctx.signed_in()?;
    let store = ctx.open_store()?;
    let item = resolve_item(&store, &auth, item).await?;
    let item = store
        .toggle_item(&item.meta.local_id, Some(&auth.identity.user_id))
        .await?;
    let state = if item.is_checked { "Checked" } else { "Unchecked" };
    println!("{state} {}", item.name);
    Ok(())
}
