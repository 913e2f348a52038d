use falimy_core::models::{List, ListStatus};
use serde::Serialize;

use crate::commands::common::{
    family_lists, family_members, format_item_lines, format_list_lines, list_items, resolve_list,
    CliContext, ItemRow, ListRow,
};
use crate::error::CliError;

pub async fn run_lists(
    ctx: &CliContext,
    status: Option<ListStatus>,
    as_json: bool,
) -> Result<(), CliError> {
    let auth = ctx.signed_in()?;
    let store = ctx.open_store()?;
    let lists: Vec<List> = family_lists(&store, &auth)
        .await?
        .into_iter()
        .filter(|list| status.map_or(true, |status| list.status == status))
        .collect();

    if as_json {
        let rows = lists.iter().map(ListRow::from).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if lists.is_empty() {
        println!("No lists yet. Run `falimy sync` or `falimy list add <name>`.");
    } else {
        for line in format_list_lines(&lists) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_items(ctx: &CliContext, list: &str, as_json: bool) -> Result<(), CliError> {
    let auth = ctx.signed_in()?;
    let store = ctx.open_store()?;
    let list = resolve_list(&store, &auth, list).await?;
    let items = list_items(&store, &list).await?;

    if as_json {
        let rows = items.iter().map(ItemRow::from).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{} ({})", list.name, list.list_type.as_str());
    for line in format_item_lines(&items) {
        println!("  {line}");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct MemberRow {
    server_id: String,
    name: String,
    role: String,
    email: Option<String>,
    last_location_at: Option<i64>,
}

pub async fn run_members(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let auth = ctx.signed_in()?;
    let store = ctx.open_store()?;
    let members = family_members(&store, &auth).await?;
    let rows = members
        .iter()
        .map(|member| MemberRow {
            server_id: member.meta.server_id.to_string(),
            name: member.name.clone(),
            role: member.role.as_str().to_string(),
            email: member.email.clone(),
            last_location_at: member.last_location_at,
        })
        .collect::<Vec<_>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in rows {
        let me = if row.server_id == auth.identity.user_id.as_str() {
            "  (you)"
        } else {
            ""
        };
        println!("{:<15}  {:<24}  {}{me}", row.server_id, row.name, row.role);
    }
    Ok(())
}
