// System status display: dedup file stats, oldest and newest forwards.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::dedup::{DedupStore, ForwardMap};

/// Display dedup store status to the terminal.
pub async fn show(dedup: &DedupStore) -> Result<()> {
    let path = dedup.path();
    if !path.exists() {
        println!("Dedup store: {} (not created yet)", path.display());
        println!(
            "{}",
            "  It is written after the first successful forward.".dimmed()
        );
        return Ok(());
    }

    let file_size = std::fs::metadata(path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Dedup store: {} ({})", path.display(), file_size);

    let map = dedup.load().await?;
    let summary = summarize(&map, Utc::now(), dedup.retention());
    println!(
        "Forwarded posts: {} recorded, retention {} days",
        summary.total,
        dedup.retention().num_days()
    );
    if summary.stale > 0 {
        println!(
            "{}",
            format!(
                "  {} past retention (purged on next save; run `mirrorbird prune`)",
                summary.stale
            )
            .yellow()
        );
    }

    match (&summary.oldest, &summary.newest) {
        (Some((old_id, old_at)), Some((new_id, new_at))) => {
            println!("Oldest: {} at {}", old_id, old_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!(
                "Newest: {} at {}",
                new_id.bold(),
                new_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        _ => println!("{}", "No forwards recorded yet.".dimmed()),
    }

    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    total: usize,
    stale: usize,
    oldest: Option<(String, DateTime<Utc>)>,
    newest: Option<(String, DateTime<Utc>)>,
}

fn summarize(map: &ForwardMap, now: DateTime<Utc>, retention: chrono::Duration) -> Summary {
    let by_age = || map.iter().map(|(id, r)| (id.clone(), r.recorded_at));
    Summary {
        total: map.len(),
        stale: map
            .values()
            .filter(|r| now - r.recorded_at >= retention)
            .count(),
        oldest: by_age().min_by_key(|(_, at)| *at),
        newest: by_age().max_by_key(|(_, at)| *at),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
