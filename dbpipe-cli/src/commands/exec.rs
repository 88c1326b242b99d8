//! `dbpipe exec` - run statements as one transaction

use anyhow::Result;
use clap::Args;
use dbpipe_core::Query;
use tracing::info;

use super::Settings;
use crate::ui;

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// SQL statements, executed in order; all or none take effect
    #[arg(required = true, value_name = "SQL")]
    pub statements: Vec<String>,
}

pub async fn run_exec(settings: &Settings, args: ExecArgs) -> Result<()> {
    let pipeline = settings.open_pipeline(None)?;
    let statements: Vec<Query> = args.statements.iter().map(|sql| Query::new(sql.as_str())).collect();

    let executed = ui::with_spinner(
        "Executing",
        |n: &usize| format!("{n} statements committed"),
        pipeline.execute_all(&statements),
    )
    .await?;

    info!(executed, "transaction committed");
    Ok(())
}
