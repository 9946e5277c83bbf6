//! `witr ps <pattern>`: batch analysis over every matching process.

use std::time::Instant;

use anyhow::Result;

use crate::batch::{self, DEFAULT_CONCURRENCY};
use crate::cli::SortKey;
use crate::output::{json, table::TableRenderer};
use crate::watch;

pub fn execute(pattern: &str, sort: Option<SortKey>, json_out: bool, watch_mode: bool) -> Result<i32> {
    if watch_mode {
        watch::run(pattern, sort)?;
        return Ok(0);
    }

    let start = Instant::now();

    let pids = match batch::discover_pids(pattern) {
        Ok(pids) => pids,
        Err(err) => {
            eprintln!("Error: {err}");
            return Ok(1);
        }
    };

    if pids.is_empty() {
        println!("No processes matching {pattern:?} found");
        return Ok(0);
    }

    // JSON always buffers; pick a deterministic order when none was asked.
    let effective_sort = if json_out && sort.is_none() { Some(SortKey::Pid) } else { sort };
    let streaming = sort.is_none() && !json_out;

    let mut table = TableRenderer::new(if streaming { None } else { effective_sort });
    if streaming {
        table.print_header();
    }

    let results = batch::analyze_async(pids, DEFAULT_CONCURRENCY);

    let mut total = 0usize;
    let mut errors = 0usize;
    for summary in results {
        if summary.error.is_some() {
            errors += 1;
            continue;
        }
        table.add_row(summary);
        total += 1;
    }

    if json_out {
        println!("{}", json::render_batch(table.rows()));
        return Ok(0);
    }

    table.flush();
    table.print_footer(total, errors, start.elapsed());
    Ok(0)
}
