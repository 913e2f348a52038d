use crate::commands::common::{resolve_item, CliContext};
use crate::error::CliError;

pub async fn run_item_delete(ctx: &CliContext, item: &str) -> Result<(), CliError> {
    let auth = ctx.signed_in()?;
    let store = ctx.open_store()?;
    let item = resolve_item(&store, &auth, item).await?;
    store.delete_item(&item.meta.local_id).await?;
    println!("Deleted {}", item.name);
    Ok(())
}
