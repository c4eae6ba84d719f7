use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use reps_core::models::{Exercise, ExerciseSet, Month, SaveOutcome};

/// Parse one set: "60x10" is 60 kg for 10 reps, a bare "10" is 10 reps with
/// no added weight.
pub(crate) fn parse_set(s: &str) -> Result<ExerciseSet> {
    let s = s.trim().to_lowercase();
    let (weight, reps) = match s.split_once('x') {
        Some((w, r)) => {
            let w = w.trim().trim_end_matches("kg");
            let weight: f64 = w
                .parse()
                .with_context(|| format!("Invalid weight in '{s}'. Use WEIGHTxREPS like 60x10"))?;
            (weight, r.trim())
        }
        None => (0.0, s.as_str()),
    };
    let reps: u32 = reps
        .parse()
        .with_context(|| format!("Invalid reps in '{s}'. Use WEIGHTxREPS like 60x10"))?;
    if reps == 0 {
        bail!("Reps must be at least 1 (got '{s}')");
    }
    if !weight.is_finite() || weight < 0.0 {
        bail!("Weight must be a non-negative number (got '{s}')");
    }
    Ok(ExerciseSet { weight, reps })
}

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

pub(crate) fn parse_month(month_str: Option<String>) -> Result<Month> {
    match month_str {
        None => Ok(Month::of(Local::now().date_naive())),
        Some(s) => s.parse(),
    }
}

/// One-line description of where a save went.
pub(crate) fn describe_outcome(outcome: &SaveOutcome) -> &'static str {
    match outcome {
        SaveOutcome::Synced { .. } => "synced",
        SaveOutcome::Queued { .. } => "queued, will sync when online",
    }
}

pub(crate) fn format_sets(exercise: &Exercise) -> String {
    if exercise.sets.is_empty() {
        return "-".to_string();
    }
    exercise
        .sets
        .iter()
        .map(|s| {
            if s.weight == 0.0 {
                format!("{}", s.reps)
            } else if s.weight.fract() == 0.0 {
                format!("{:.0}x{}", s.weight, s.reps)
            } else {
                format!("{}x{}", s.weight, s.reps)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn print_exercise_table(exercises: &[Exercise]) {
    #[derive(Tabled)]
    struct ExerciseRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Exercise")]
        name: String,
        #[tabled(rename = "Sets")]
        sets: String,
        #[tabled(rename = "Reps")]
        reps: u32,
        #[tabled(rename = "Volume")]
        volume: String,
        #[tabled(rename = "Min")]
        duration: String,
        #[tabled(rename = "Memo")]
        memo: String,
    }

    let rows: Vec<ExerciseRow> = exercises
        .iter()
        .enumerate()
        .map(|(i, e)| ExerciseRow {
            idx: i + 1,
            id: short_id(&e.id),
            name: truncate(&e.name, 30),
            sets: format_sets(e),
            reps: e.total_reps(),
            volume: {
                let volume = no_neg_zero(e.total_volume());
                format!("{volume:.0}")
            },
            duration: e.duration.map_or("-".into(), |d| d.to_string()),
            memo: e
                .memo
                .as_deref()
                .map(|m| truncate(m, 30))
                .unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

/// Leading characters of an id, enough to pick it out on the command line.
pub(crate) fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
