//! `dbpipe average` - streaming mean of a numeric column

use anyhow::Result;
use clap::Args;
use dbpipe_core::{Condition, Query};
use serde_json::json;

use super::stream::row_filter;
use super::{write_ndjson, Settings};
use crate::ui;

#[derive(Args, Debug)]
pub struct AverageArgs {
    /// SQL query producing the column
    #[arg(value_name = "SQL")]
    pub query: String,

    /// Column to average; nulls are skipped
    #[arg(long, short = 'c')]
    pub column: String,

    /// Only include rows matching `column OP value`
    #[arg(long = "where", short = 'w', value_name = "COND")]
    pub condition: Option<Condition>,
}

pub async fn run_average(settings: &Settings, args: AverageArgs) -> Result<()> {
    let pipeline = settings.open_pipeline(None)?;
    let query = Query::new(args.query);

    let mean = ui::with_spinner(
        format!("Averaging {}", args.column),
        |mean: &Option<f64>| match mean {
            Some(mean) => format!("mean {mean}"),
            None => "no values".to_string(),
        },
        pipeline.mean(&query, &args.column, row_filter(args.condition)),
    )
    .await?;

    write_ndjson(
        &mut std::io::stdout().lock(),
        &json!({ "column": args.column, "mean": mean }),
    )
}
