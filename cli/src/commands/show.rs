use anyhow::Result;
use std::collections::BTreeMap;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use reps_core::models::{DayState, Exercise};

use super::Service;
use super::helpers::{no_neg_zero, parse_date, parse_month, print_exercise_table};

pub(crate) async fn cmd_show(service: &Service, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let record = if service.is_online() {
        match service.refresh_day(date).await {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Warning: {e:#}; showing local copy");
                service.get_day_record(date)
            }
        }
    } else {
        service.get_day_record(date)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    if record.exercises.is_empty() {
        eprintln!("No exercises for {date}");
        process::exit(2);
    }

    let status = match (record.state, record.has_pending_changes) {
        (_, true) => "pending sync",
        (DayState::RemoteConfirmed, false) => "synced",
        (_, false) => "local",
    };
    println!("=== {date} ({status}) ===\n");
    print_exercise_table(&record.exercises);

    let sets: usize = record.exercises.iter().map(|e| e.sets.len()).sum();
    let reps: u32 = record.exercises.iter().map(Exercise::total_reps).sum();
    let volume = no_neg_zero(record.exercises.iter().map(Exercise::total_volume).sum());
    println!("\n  TOTAL: {sets} sets | {reps} reps | {volume:.0} kg volume");

    Ok(())
}

pub(crate) async fn cmd_month(
    service: &Service,
    month: Option<String>,
    refresh: bool,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct MonthRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Logged")]
        logged: String,
        #[tabled(rename = "Pending")]
        pending: String,
    }

    let month = parse_month(month)?;
    let headers = service.month_headers(month, refresh).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&headers)?);
        return Ok(());
    }

    // Queued dates are shown alongside the remote listing.
    let mut days: BTreeMap<_, (bool, bool)> = headers
        .iter()
        .map(|h| (h.date, (h.has_record, false)))
        .collect();
    for date in service.pending_dates()? {
        if month.contains(date) {
            days.entry(date).or_default().1 = true;
        }
    }

    if days.is_empty() {
        eprintln!("No records in {month}");
        process::exit(2);
    }

    let rows: Vec<MonthRow> = days
        .into_iter()
        .map(|(date, (logged, pending))| MonthRow {
            date: date.format("%Y-%m-%d %a").to_string(),
            logged: if logged { "yes" } else { "-" }.to_string(),
            pending: if pending { "yes" } else { "-" }.to_string(),
        })
        .collect();

    println!("=== {month} ===\n");
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::center()))
        .to_string();
    println!("{table}");

    Ok(())
}
