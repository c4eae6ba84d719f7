use anyhow::{Result, bail};
use chrono::NaiveDate;
use std::process;

use reps_core::cache::RemoteKnowledge;
use reps_core::models::{Exercise, ExerciseSet};

use super::Service;
use super::helpers::{describe_outcome, format_sets, parse_date, parse_set, short_id};

pub(crate) struct LogArgs {
    pub name: String,
    pub sets: Vec<String>,
    pub date: Option<String>,
    pub duration: Option<u32>,
    pub memo: Option<String>,
    pub images: Vec<String>,
}

/// Pull the remote copy of `date` into the cache before an edit. Saves
/// replace the whole day, so editing from an unseen day would drop whatever
/// is already stored remotely.
async fn prime_day(service: &Service, date: NaiveDate) {
    if service.is_online() {
        if let Err(e) = service.refresh_day(date).await {
            eprintln!("Warning: {e:#}");
        }
    }
    if service.remote_knowledge(date) == RemoteKnowledge::Unknown {
        eprintln!(
            "Note: the server's copy of {date} is unknown; this day's list will replace it on sync"
        );
    }
}

pub(crate) async fn cmd_log(service: &Service, args: LogArgs, json: bool) -> Result<()> {
    let date = parse_date(args.date)?;
    let sets = args
        .sets
        .iter()
        .map(|s| parse_set(s))
        .collect::<Result<Vec<ExerciseSet>>>()?;

    let mut exercise = Exercise::new(&args.name, sets);
    exercise.duration = args.duration;
    exercise.memo = args.memo;
    exercise.images = args.images;

    prime_day(service, date).await;
    let outcome = service.add_exercise(date, exercise.clone()).await?;

    if json {
        let value = serde_json::json!({
            "date": date,
            "exercise": exercise,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let id = short_id(&exercise.id);
        println!(
            "Logged [{id}] {} ({}) for {date}: {}",
            exercise.name,
            format_sets(&exercise),
            describe_outcome(&outcome)
        );
    }

    Ok(())
}

pub(crate) async fn cmd_remove(
    service: &Service,
    exercise_id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    prime_day(service, date).await;

    let record = service.get_day_record(date);
    let matches: Vec<&Exercise> = record
        .exercises
        .iter()
        .filter(|e| e.id.starts_with(exercise_id))
        .collect();
    let (id, name) = match matches.as_slice() {
        [one] => (one.id.clone(), one.name.clone()),
        [] => {
            eprintln!("No exercise '{exercise_id}' on {date}");
            process::exit(2);
        }
        _ => bail!("'{exercise_id}' matches more than one exercise on {date}; give more of the id"),
    };

    let Some(outcome) = service.remove_exercise(date, &id).await? else {
        eprintln!("No exercise '{exercise_id}' on {date}");
        process::exit(2);
    };

    if json {
        let value = serde_json::json!({
            "date": date,
            "removed": id,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "Removed {name} from {date}: {}",
            describe_outcome(&outcome)
        );
    }

    Ok(())
}
