//! `dbpipe fetch` - run read queries and print their rows as NDJSON

use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Args;
use dbpipe_core::{Query, RowSet, Value};

use super::{write_ndjson, Settings};
use crate::ui;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// SQL queries to run; more than one are fetched concurrently
    #[arg(required = true, value_name = "SQL")]
    pub queries: Vec<String>,

    /// Positional parameter bound to every query, in order (repeatable)
    #[arg(long = "param", short = 'p', value_name = "VALUE")]
    pub params: Vec<String>,
}

impl FetchArgs {
    fn to_queries(&self) -> Vec<Query> {
        let params: Vec<Value> = self.params.iter().map(|p| Value::parse_literal(p)).collect();
        self.queries
            .iter()
            .map(|sql| Query::with_params(sql.as_str(), params.iter().cloned()))
            .collect()
    }
}

pub async fn run_fetch(settings: &Settings, args: FetchArgs) -> Result<()> {
    let pipeline = settings.open_pipeline(None)?;
    let queries = args.to_queries();

    let results: Vec<RowSet> = match queries.as_slice() {
        [single] => vec![
            ui::with_spinner(
                "Fetching",
                |rows: &RowSet| format!("{} rows", rows.len()),
                pipeline.fetch_all(single),
            )
            .await?,
        ],
        many => {
            ui::with_spinner(
                format!("Fetching {} queries", many.len()),
                |sets: &Vec<RowSet>| {
                    format!("{} rows", sets.iter().map(|rows| rows.len()).sum::<usize>())
                },
                pipeline.fetch_concurrently(many),
            )
            .await?
        }
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for row in results.iter().flat_map(|rows| rows.iter()) {
        write_ndjson(&mut out, row)?;
    }
    out.flush().context("failed to write output")?;
    Ok(())
}
