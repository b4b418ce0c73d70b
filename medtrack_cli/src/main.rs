use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use clap::{Parser, Subcommand};
use medtrack_core::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "medtrack")]
#[command(about = "Medication scheduling and dose logging", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the configured IANA timezone
    #[arg(long, global = true)]
    zone: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a medication
    AddMed {
        name: String,
        /// Fallback dosage when no pattern is active
        #[arg(long)]
        dosage: f64,
        #[arg(long, default_value = "mg")]
        unit: String,
        /// As-needed (PRN) medication: no duplicate-per-day guard
        #[arg(long)]
        prn: bool,
    },

    /// Add a recurring schedule for a medication
    AddSchedule {
        med: String,
        /// Time of day, HH:MM
        #[arg(long)]
        at: String,
        /// Comma-separated weekdays (mon,tue,...) or "daily"
        #[arg(long, default_value = "daily")]
        days: String,
        /// Reminder lead time in minutes
        #[arg(long, default_value_t = 15)]
        lead: u32,
    },

    /// Set a cyclic dosage pattern, superseding the current one
    SetPattern {
        med: String,
        /// Comma-separated cycle amounts, e.g. 4.0,4.0,3.0
        #[arg(long)]
        cycle: String,
        /// First date the pattern applies, YYYY-MM-DD
        #[arg(long)]
        from: NaiveDate,
    },

    /// Show upcoming due doses
    Due {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Log a dose as taken
    Log {
        med: String,
        /// Attempt instant (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Actual amount taken; defaults to the expected dose
        #[arg(long)]
        dose: Option<f64>,
        /// Log even though the safety window has passed
        #[arg(long)]
        confirm_late: bool,
    },

    /// Skip the current scheduled dose
    Skip { med: String },

    /// Run the missed/unknown sweep over recent scheduled doses
    Sweep,

    /// Report adherence over a trailing window
    Adherence {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// Roll up WAL log entries to the CSV archive
    Rollup {
        /// Clean up processed WAL files after rollup
        #[arg(long)]
        cleanup: bool,
    },

    /// Merge dose log entries exported from another device
    Merge {
        /// Path to the remote device's WAL file
        remote: PathBuf,
    },
}

struct Paths {
    state: PathBuf,
    wal: PathBuf,
    wal_dir: PathBuf,
    csv: PathBuf,
}

fn paths(data_dir: &PathBuf) -> Paths {
    let wal_dir = data_dir.join("wal");
    Paths {
        state: data_dir.join("state.json"),
        wal: wal_dir.join("doses.wal"),
        wal_dir,
        csv: data_dir.join("doses.csv"),
    }
}

fn main() -> Result<()> {
    medtrack_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let zone_id = cli.zone.unwrap_or_else(|| config.user.zone_id.clone());
    // Fail here rather than deep inside a resolution call
    medtrack_core::timezone::parse_zone(&zone_id)?;

    let paths = paths(&data_dir);
    std::fs::create_dir_all(&paths.wal_dir)?;

    match cli.command {
        Commands::AddMed {
            name,
            dosage,
            unit,
            prn,
        } => cmd_add_med(&paths, &config, name, dosage, unit, prn),
        Commands::AddSchedule { med, at, days, lead } => {
            cmd_add_schedule(&paths, &config, &zone_id, med, at, days, lead)
        }
        Commands::SetPattern { med, cycle, from } => {
            cmd_set_pattern(&paths, &config, med, cycle, from)
        }
        Commands::Due { days } => cmd_due(&paths, &zone_id, days),
        Commands::Log {
            med,
            at,
            dose,
            confirm_late,
        } => cmd_log(&paths, &config, &zone_id, med, at, dose, confirm_late),
        Commands::Skip { med } => cmd_skip(&paths, &config, &zone_id, med),
        Commands::Sweep => cmd_sweep(&paths, &config, &zone_id),
        Commands::Adherence { days } => cmd_adherence(&paths, days),
        Commands::Rollup { cleanup } => cmd_rollup(&paths, cleanup),
        Commands::Merge { remote } => cmd_merge(&paths, remote),
    }
}

fn cmd_add_med(
    paths: &Paths,
    config: &Config,
    name: String,
    dosage: f64,
    unit: String,
    prn: bool,
) -> Result<()> {
    if dosage <= 0.0 || !dosage.is_finite() {
        return Err(Error::InvalidMedication(format!(
            "dosage must be positive, got {}",
            dosage
        )));
    }
    let now = Utc::now();
    let display = name.clone();

    UserMedState::update(&paths.state, |state| {
        if state.medication_by_name(&name).is_some() {
            return Err(Error::State(format!("medication '{}' already exists", name)));
        }
        let medication = Medication {
            id: uuid::Uuid::new_v4(),
            name: name.clone(),
            fixed_dosage: dosage,
            dosage_unit: unit.clone(),
            as_needed: prn,
            active: true,
            created_at: now,
            modified_at: now,
        };
        state.add_medication(medication, &config.user.device_id, now)
    })?;

    println!("✓ Added medication '{}'", display);
    Ok(())
}

fn cmd_add_schedule(
    paths: &Paths,
    config: &Config,
    zone_id: &str,
    med: String,
    at: String,
    days: String,
    lead: u32,
) -> Result<()> {
    let time = NaiveTime::parse_from_str(&at, "%H:%M")
        .map_err(|_| Error::InvalidSchedule(format!("time must be HH:MM, got '{}'", at)))?;
    let weekdays = parse_weekdays(&days)?;
    let now = Utc::now();

    UserMedState::update(&paths.state, |state| {
        let medication = state
            .medication_by_name(&med)
            .ok_or_else(|| Error::State(format!("unknown medication '{}'", med)))?;
        let schedule =
            MedicationSchedule::new(medication.id, time, weekdays.clone(), lead, zone_id, now)?;
        state.add_schedule(schedule, &config.user.device_id, now)
    })?;

    println!("✓ Scheduled '{}' at {} ({})", med, at, days);
    Ok(())
}

fn cmd_set_pattern(
    paths: &Paths,
    config: &Config,
    med: String,
    cycle: String,
    from: NaiveDate,
) -> Result<()> {
    let amounts = cycle
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|_| Error::InvalidPattern(format!("bad cycle amount '{}'", s)))
        })
        .collect::<Result<Vec<f64>>>()?;
    let now = Utc::now();
    let len = amounts.len();

    UserMedState::update(&paths.state, |state| {
        let medication = state
            .medication_by_name(&med)
            .ok_or_else(|| Error::State(format!("unknown medication '{}'", med)))?;
        let pattern = DosagePattern::new(medication.id, amounts.clone(), from, None, now)?;
        state.add_pattern(pattern, &config.user.device_id, now)
    })?;

    println!("✓ Pattern of {} day(s) active for '{}' from {}", len, med, from);
    Ok(())
}

fn cmd_due(paths: &Paths, zone_id: &str, days: u32) -> Result<()> {
    let state = UserMedState::load(&paths.state)?;
    let zone = medtrack_core::timezone::parse_zone(zone_id)?;
    let today = Utc::now().with_timezone(&zone).date_naive();
    let until = today + Duration::days(i64::from(days) - 1);

    let mut any = false;
    for medication in state.medications.iter().filter(|m| m.active) {
        let events = expand_due_events(
            medication,
            &state.schedules,
            state.patterns_for(medication.id),
            zone_id,
            today,
            until,
        )?;
        for event in events {
            any = true;
            println!(
                "{} {}  {}  {} {}{}",
                event.local_date,
                event.local_time.format("%H:%M"),
                medication.name,
                event.expected_dosage.amount(),
                medication.dosage_unit,
                if event.adjusted { "  (adjusted)" } else { "" }
            );
        }
    }

    if !any {
        println!("No doses due in the next {} day(s).", days);
    }
    Ok(())
}

/// Find the due event nearest to the attempt instant within a ±1 day span
fn nearest_event(
    state: &UserMedState,
    medication: &Medication,
    zone_id: &str,
    attempt_at: DateTime<Utc>,
) -> Result<Option<DoseEvent>> {
    let zone = medtrack_core::timezone::parse_zone(zone_id)?;
    let local_date = attempt_at.with_timezone(&zone).date_naive();

    let events = expand_due_events(
        medication,
        &state.schedules,
        state.patterns_for(medication.id),
        zone_id,
        local_date - Duration::days(1),
        local_date + Duration::days(1),
    )?;

    Ok(events.min_by_key(|e| (e.due - attempt_at).abs()))
}

fn cmd_log(
    paths: &Paths,
    config: &Config,
    zone_id: &str,
    med: String,
    at: Option<DateTime<Utc>>,
    dose: Option<f64>,
    confirm_late: bool,
) -> Result<()> {
    let state = UserMedState::load(&paths.state)?;
    let medication = state
        .medication_by_name(&med)
        .ok_or_else(|| Error::State(format!("unknown medication '{}'", med)))?;
    let attempt_at = at.unwrap_or_else(Utc::now);
    let device_id = &config.user.device_id;

    let history = load_recent_entries(&paths.wal, &paths.csv, 7)?;
    let due_event = nearest_event(&state, medication, zone_id, attempt_at)?;

    let attempt = LogAttempt {
        medication,
        due_event: due_event.as_ref(),
        attempt_at,
        confirm_late,
        history: &history,
        safety_window: Duration::hours(config.safety.window_hours),
    };

    match classify_attempt(&attempt) {
        LogOutcome::Taken { was_late } => {
            // Reuse the open scheduled entry for this event if one exists
            let mut entry = due_event
                .as_ref()
                .and_then(|ev| {
                    history
                        .iter()
                        .find(|e| {
                            !e.deleted
                                && e.status.is_open()
                                && e.medication_id == ev.medication_id
                                && e.due_at == Some(ev.due)
                        })
                        .cloned()
                })
                .or_else(|| due_event.as_ref().map(|ev| entry_for_event(ev, device_id, attempt_at)))
                .unwrap_or_else(|| prn_entry(medication, device_id, attempt_at));

            let amount = dose
                .or(entry.expected_dosage)
                .unwrap_or(medication.fixed_dosage);
            record_taken(&mut entry, attempt_at, amount, was_late, device_id);

            let mut sink = JsonlSink::new(&paths.wal);
            sink.append(&entry)?;

            if was_late {
                println!("✓ Dose logged late ({} {}).", amount, medication.dosage_unit);
            } else {
                println!("✓ Dose logged ({} {}).", amount, medication.dosage_unit);
            }

            if let Some(v) = compute_variance(&entry) {
                if v.has_variance {
                    println!(
                        "  ⚠ Dose variance: expected {}, took {} ({:+})",
                        v.expected, v.actual, v.delta
                    );
                }
            }
        }
        LogOutcome::LateWarning { elapsed } => {
            println!(
                "⚠ This dose was due {}h{:02}m ago; consider waiting for the next one.",
                elapsed.num_hours(),
                elapsed.num_minutes() % 60
            );
            println!("  Re-run with --confirm-late to log it anyway.");
        }
        LogOutcome::DuplicateDoseForDay => {
            println!("✗ A dose of '{}' is already logged for this day.", med);
        }
    }

    Ok(())
}

/// Entry for a PRN/unscheduled dose: no due instant, no window
fn prn_entry(medication: &Medication, device_id: &str, now: DateTime<Utc>) -> MedicationLogEntry {
    MedicationLogEntry {
        id: uuid::Uuid::new_v4(),
        medication_id: medication.id,
        due_at: None,
        due_date: None,
        taken_at: None,
        status: DoseStatus::Scheduled,
        expected_dosage: None,
        actual_dosage: None,
        was_late: false,
        device_id: device_id.to_string(),
        created_at: now,
        modified_at: now,
        deleted: false,
        status_history: vec![StatusChange {
            status: DoseStatus::Scheduled,
            at: now,
            device_id: device_id.to_string(),
        }],
    }
}

fn cmd_skip(paths: &Paths, config: &Config, zone_id: &str, med: String) -> Result<()> {
    let state = UserMedState::load(&paths.state)?;
    let medication = state
        .medication_by_name(&med)
        .ok_or_else(|| Error::State(format!("unknown medication '{}'", med)))?;
    let now = Utc::now();
    let device_id = &config.user.device_id;

    let history = load_recent_entries(&paths.wal, &paths.csv, 7)?;
    let open = history
        .iter()
        .filter(|e| !e.deleted && e.medication_id == medication.id && e.status.is_open())
        .max_by_key(|e| e.due_at)
        .cloned();

    let mut sink = JsonlSink::new(&paths.wal);

    if let Some(mut entry) = open {
        mark_skipped(&mut entry, now, device_id);
        sink.append(&entry)?;
        println!("✓ Skipped the current dose of '{}'.", med);
        return Ok(());
    }

    // No open entry yet. The nearest due event may still be unmaterialized;
    // skip it directly instead of demanding a sweep first.
    match nearest_event(&state, medication, zone_id, now)? {
        Some(event) => {
            let resolved = history.iter().any(|e| {
                !e.deleted && e.medication_id == event.medication_id && e.due_at == Some(event.due)
            });
            if resolved {
                println!("Nothing to skip: the dose is already resolved.");
            } else {
                let mut entry = entry_for_event(&event, device_id, now);
                mark_skipped(&mut entry, now, device_id);
                sink.append(&entry)?;
                println!("✓ Skipped the current dose of '{}'.", med);
            }
        }
        None => println!("No open scheduled dose for '{}'.", med),
    }
    Ok(())
}

fn cmd_sweep(paths: &Paths, config: &Config, zone_id: &str) -> Result<()> {
    let state = UserMedState::load(&paths.state)?;
    let now = Utc::now();
    let device_id = &config.user.device_id;

    let mut entries = load_recent_entries(&paths.wal, &paths.csv, 14)?;
    let before: Vec<(uuid::Uuid, DoseStatus)> =
        entries.iter().map(|e| (e.id, e.status)).collect();

    // Gather due events around the sweep window for the supersession check
    let zone = medtrack_core::timezone::parse_zone(zone_id)?;
    let today = now.with_timezone(&zone).date_naive();
    let mut events = Vec::new();
    for medication in state.medications.iter().filter(|m| m.active) {
        let iter = expand_due_events(
            medication,
            &state.schedules,
            state.patterns_for(medication.id),
            zone_id,
            today - Duration::days(14),
            today,
        )?;
        events.extend(iter);
    }

    // A due event that passed with nothing logged has no WAL entry yet.
    // Materialize it as Scheduled so the sweeps can resolve it and the
    // adherence denominator sees it.
    for event in &events {
        if event.due > now {
            continue;
        }
        let exists = entries.iter().any(|e| {
            !e.deleted && e.medication_id == event.medication_id && e.due_at == Some(event.due)
        });
        if !exists {
            entries.push(entry_for_event(event, device_id, now));
        }
    }

    let missed = sweep_missed(&mut entries, &events, now, device_id);
    let unknown = sweep_unknown(
        &mut entries,
        now,
        Duration::hours(config.safety.unknown_after_hours),
        device_id,
    );

    // Persist only what changed; revisions supersede by id on read
    let mut sink = JsonlSink::new(&paths.wal);
    for entry in &entries {
        let changed = before
            .iter()
            .find(|(id, _)| *id == entry.id)
            .map(|(_, status)| *status != entry.status)
            .unwrap_or(true);
        if changed {
            sink.append(entry)?;
        }
    }

    println!("✓ Sweep complete: {} missed, {} unknown.", missed, unknown);
    Ok(())
}

fn cmd_adherence(paths: &Paths, days: u32) -> Result<()> {
    let entries = load_recent_entries(&paths.wal, &paths.csv, i64::from(days))?;
    let to = Utc::now();
    let from = to - Duration::days(i64::from(days));

    match adherence_rate(&entries, from, to) {
        AdherenceRate::Rate(rate) => {
            println!("Adherence over last {} day(s): {:.0}%", days, rate * 100.0)
        }
        AdherenceRate::NoData => {
            println!("No scheduled doses in the last {} day(s).", days)
        }
    }
    Ok(())
}

fn cmd_rollup(paths: &Paths, cleanup: bool) -> Result<()> {
    if !paths.wal.exists() {
        println!("No WAL file found - nothing to roll up.");
        return Ok(());
    }

    let count = medtrack_core::csv_rollup::wal_to_csv_and_archive(&paths.wal, &paths.csv)?;

    println!("✓ Rolled up {} log entries to CSV", count);
    println!("  CSV: {}", paths.csv.display());

    if cleanup {
        let cleaned = medtrack_core::csv_rollup::cleanup_processed_wals(&paths.wal_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed WAL files", cleaned);
        }
    }

    Ok(())
}

fn cmd_merge(paths: &Paths, remote: PathBuf) -> Result<()> {
    let local_entries = medtrack_core::wal::read_entries(&paths.wal)?;
    let remote_entries = medtrack_core::wal::read_entries(&remote)?;

    let mut sink = JsonlSink::new(&paths.wal);
    let mut merged = 0;
    let mut conflicts = 0;

    for remote_entry in remote_entries {
        match local_entries.iter().find(|e| e.id == remote_entry.id) {
            Some(local_entry) => {
                let result = merge(synced(local_entry.clone())?, synced(remote_entry)?);
                if let Some(conflict) = &result.conflict {
                    conflicts += 1;
                    println!(
                        "⚠ Entry {} overwrote edits from device '{}':",
                        result.winner.entry.id, conflict.losing_device
                    );
                    for field in &conflict.fields {
                        println!("    {}: {} → {}", field.field, field.losing, field.winning);
                    }
                }
                sink.append(&result.winner.entry)?;
                merged += 1;
            }
            None => {
                sink.append(&remote_entry)?;
                merged += 1;
            }
        }
    }

    println!("✓ Merged {} entries ({} conflicts surfaced).", merged, conflicts);
    Ok(())
}

/// Wrap a log entry in its sync metadata, derived from the entry itself
fn synced(entry: MedicationLogEntry) -> Result<SyncedEntry> {
    let record = SyncRecord {
        device_id: entry.device_id.clone(),
        version: 1,
        last_modified: entry.modified_at,
        content_hash: content_hash(&entry)?,
    };
    Ok(SyncedEntry { entry, record })
}

fn parse_weekdays(spec: &str) -> Result<Vec<Weekday>> {
    if spec.eq_ignore_ascii_case("daily") {
        return Ok(vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]);
    }

    spec.split(',')
        .map(|day| match day.trim().to_lowercase().as_str() {
            "mon" => Ok(Weekday::Mon),
            "tue" => Ok(Weekday::Tue),
            "wed" => Ok(Weekday::Wed),
            "thu" => Ok(Weekday::Thu),
            "fri" => Ok(Weekday::Fri),
            "sat" => Ok(Weekday::Sat),
            "sun" => Ok(Weekday::Sun),
            other => Err(Error::InvalidSchedule(format!("unknown weekday '{}'", other))),
        })
        .collect()
}
