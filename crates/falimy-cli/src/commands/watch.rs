use std::time::Duration;

use falimy_core::models::List;
use falimy_core::store::SortOrder;
use falimy_core::Query;

use crate::commands::common::{format_list_lines, CliContext};
use crate::error::CliError;

pub async fn run_watch(ctx: &CliContext, seconds: Option<u64>) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let (session, auth) = ctx.start_session(store.clone(), true).await?;
    let mut lists = store.query::<List>(
        Query::new()
            .eq("family_id", auth.identity.family_id.as_str())
            .sort_by("name", SortOrder::Asc),
    )?;
    let mut expired = session.watch_auth_expired();

    let deadline = async {
        match seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    println!("Watching lists (Ctrl-C to stop)");
    let outcome = loop {
        tokio::select! {
            () = &mut deadline => break Ok(()),
            _ = tokio::signal::ctrl_c() => break Ok(()),
            _ = expired.wait_for(|expired| *expired) => break Err(CliError::SessionExpired),
            emission = lists.next() => match emission {
                Some(Ok(current)) => {
                    println!("--- {} lists, {:?}", current.len(), session.realtime_state().await);
                    for line in format_list_lines(&current) {
                        println!("{line}");
                    }
                }
                Some(Err(error)) => break Err(error.into()),
                None => break Ok(()),
            },
        }
    };

    lists.unsubscribe();
    session.close().await;
    outcome
}
