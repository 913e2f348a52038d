use falimy_core::models::ListType;

use crate::commands::common::{resolve_list, CliContext};
use crate::error::CliError;

pub async fn run_list_add(
    ctx: &CliContext,
    name: &str,
    list_type: ListType,
) -> Result<(), CliError> {
    let auth = ctx.signed_in()?;
    let store = ctx.open_store()?;
    let list = store
        .create_list(
            &auth.identity.family_id,
            name,
            list_type,
            Some(&auth.identity.user_id),
        )
        .await?;
    println!("Created list {} ({})", list.meta.server_id, list.name);
    Ok(())
}

pub async fn run_item_add(
    ctx: &CliContext,
    list: &str,
    name: &str,
    quantity: Option<String>,
    note: Option<String>,
) -> Result<(), CliError> {
    let auth = ctx.signed_in()?;
    let store = ctx.open_store()?;
    let list = resolve_list(&store, &auth, list).await?;
    let item = store
        .add_item(
            &list.meta.local_id,
            name,
            quantity,
            note,
            Some(&auth.identity.user_id),
        )
        .await?;
    println!(
        "Added {} to {} ({})",
        item.name, list.name, item.meta.server_id
    );
    Ok(())
}
