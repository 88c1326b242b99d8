//! `dbpipe stream` - stream a query in batches, printing matching rows

use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Args;
use dbpipe_core::{filter_rows, BatchStream, Condition, DataError, Query, Row};
use futures::TryStreamExt;

use super::{write_ndjson, Settings};
use crate::ui;

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// SQL query to stream
    #[arg(value_name = "SQL")]
    pub query: String,

    /// Rows fetched per batch (defaults to the configured batch size)
    #[arg(long, short = 'b', value_parser = clap::value_parser!(usize))]
    pub batch_size: Option<usize>,

    /// Only print rows matching `column OP value`, e.g. `age > 25`
    #[arg(long = "where", short = 'w', value_name = "COND")]
    pub condition: Option<Condition>,
}

/// Predicate for an optional condition; no condition keeps every row.
pub fn row_filter(condition: Option<Condition>) -> impl FnMut(&Row) -> bool + Unpin {
    move |row: &Row| condition.as_ref().is_none_or(|c| c.matches(row))
}

pub async fn run_stream(settings: &Settings, args: StreamArgs) -> Result<()> {
    let pipeline = settings.open_pipeline(args.batch_size)?;
    let query = Query::new(args.query);
    let pb = ui::spinner("Streaming rows");

    let outcome = pipeline
        .stream(&query, async |batches: BatchStream<'_>| {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let mut rows = filter_rows(batches, row_filter(args.condition));
            let mut printed = 0usize;

            while let Some(row) = rows.try_next().await? {
                write_ndjson(&mut out, &row).map_err(DataError::operation)?;
                printed += 1;
                if let Some(pb) = &pb {
                    pb.set_message(format!("Streaming rows ({printed} printed)"));
                }
            }
            out.flush().map_err(DataError::operation)?;
            Ok(printed)
        })
        .await;

    match outcome {
        Ok(printed) => {
            ui::finish_success(pb, format!("{printed} rows"));
            Ok(())
        }
        Err(e) => {
            ui::finish_error(pb, e.to_string());
            Err(e).context("stream failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbpipe_core::Value;

    #[test]
    fn test_row_filter() {
        let row = Row::from_pairs([("age", Value::from(30))]);

        let mut all = row_filter(None);
        assert!(all(&row));

        let mut older = row_filter(Some("age > 40".parse().unwrap()));
        assert!(!older(&row));
    }
}
