use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use super::Service;
use super::helpers::short_id;

#[derive(Serialize)]
struct StatusReport<'a> {
    remote: &'a str,
    online: bool,
    pending_count: usize,
    syncing: bool,
    pending_dates: &'a [NaiveDate],
}

pub(crate) fn cmd_status(service: &Service, json: bool) -> Result<()> {
    let banner = service.banner()?;
    let dates = service.pending_dates()?;

    if json {
        let report = StatusReport {
            remote: service.remote().base_url(),
            online: banner.online,
            pending_count: banner.pending_count,
            syncing: banner.syncing,
            pending_dates: &dates,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let state = if banner.online { "online" } else { "offline" };
    println!("Remote:  {} ({state})", service.remote().base_url());
    if banner.pending_count == 0 {
        println!("Pending: nothing queued");
    } else {
        let dates: Vec<String> = dates.iter().map(ToString::to_string).collect();
        println!(
            "Pending: {} operation(s) for {}",
            banner.pending_count,
            dates.join(", ")
        );
    }
    Ok(())
}

pub(crate) async fn cmd_sync(service: &Service, json: bool) -> Result<()> {
    if !service.is_online() {
        let pending = service.pending_count()?;
        bail!(
            "Remote unreachable at {}; {pending} operation(s) still queued",
            service.remote().base_url()
        );
    }

    let report = service.sync_now().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.succeeded == 0 && report.failed == 0 {
        println!("Nothing to sync");
    } else {
        println!(
            "Synced {} operation(s), {} failed",
            report.succeeded, report.failed
        );
        if report.failed > 0 {
            eprintln!("Failed operations stay queued and will be retried on the next sync");
        }
    }
    Ok(())
}

pub(crate) fn cmd_queue_list(service: &Service, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct QueueRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "Local ID")]
        local_id: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Exercises")]
        exercises: usize,
        #[tabled(rename = "Queued at")]
        enqueued_at: String,
    }

    let ops = service.pending_operations()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
        return Ok(());
    }

    if ops.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    let rows: Vec<QueueRow> = ops
        .iter()
        .enumerate()
        .map(|(i, op)| QueueRow {
            idx: i + 1,
            local_id: short_id(&op.local_id),
            date: op.payload.date.to_string(),
            exercises: op.payload.exercises.len(),
            enqueued_at: op
                .enqueued_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) async fn cmd_queue_clear(service: &Service, json: bool) -> Result<()> {
    let dropped = service.clear_pending().await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "discarded": dropped }))?
        );
    } else {
        println!("Discarded {dropped} queued operation(s)");
    }
    Ok(())
}

/// Stay running: probe the remote every `interval` and let the reconnect
/// dispatcher drain the queue whenever it comes back.
pub(crate) async fn cmd_watch(service: Arc<Service>, interval: u64) -> Result<()> {
    if interval == 0 {
        bail!("Interval must be at least 1 second");
    }

    service.on_connectivity_change(|online| {
        if online {
            eprintln!("Remote reachable, syncing queued writes");
        } else {
            eprintln!("Remote unreachable, new writes will be queued");
        }
    });
    let dispatcher = service.spawn_reconnect_dispatcher();

    eprintln!(
        "Watching {} every {interval}s (Ctrl-C to stop)",
        service.remote().base_url()
    );
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reachable = service.remote().probe().await;
                let changed = service.set_reachable(reachable);
                // Failures from an earlier pass get retried while we stay online.
                if reachable && !changed && service.pending_count()? > 0 {
                    let report = service.sync_now().await;
                    if report.succeeded > 0 {
                        eprintln!("Synced {} queued operation(s)", report.succeeded);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    dispatcher.abort();
    let pending = service.pending_count()?;
    if pending > 0 {
        eprintln!("Stopped with {pending} operation(s) still queued");
    }
    Ok(())
}
