use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dose_core::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "medtrack")]
#[command(about = "Medication schedule and adherence tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show medications ordered by next due dose (default)
    List,

    /// Add a medication to the active profile
    Add {
        /// Display name
        name: String,

        /// Amount per dose
        #[arg(long, default_value_t = 1.0)]
        quantity: f64,

        /// Unit of the dose amount
        #[arg(long, default_value = "tablet")]
        unit: String,

        /// Time-of-day slots, comma separated (morning, noon, evening)
        #[arg(long, value_delimiter = ',', conflicts_with = "every")]
        times: Vec<Slot>,

        /// Take every N hours instead of at fixed slots
        #[arg(long)]
        every: Option<u32>,

        /// Hour of the first interval dose
        #[arg(long, default_value_t = 8)]
        start_hour: u32,

        /// Units currently on hand
        #[arg(long)]
        stock: Option<f64>,

        /// Warn when stock falls to this level
        #[arg(long)]
        low_stock: Option<f64>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Record a dose as taken now
    Take {
        /// Medication id (or unique prefix)
        medication: String,
    },

    /// Delete a medication from the active profile
    Remove {
        /// Medication id (or unique prefix)
        medication: String,
    },

    /// Show the adherence report for the trailing window
    Report {
        /// Window length in days
        #[arg(long)]
        days: Option<u32>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Poll for due doses and print reminders
    Watch {
        /// Run a single poll and exit
        #[arg(long)]
        once: bool,

        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Manage profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Create a profile
    Add {
        name: String,

        #[arg(long, default_value = "")]
        avatar: String,
    },
    /// Make a profile the active one
    Use { id: String },
    /// List profiles
    List,
    /// Delete a profile and its medications
    Remove { id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Slot {
    Morning,
    Noon,
    Evening,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The poll loop reports progress through logs; everything else stays quiet
    if matches!(cli.command, Some(Commands::Watch { .. })) {
        dose_core::logging::init_with_level("info");
    } else {
        dose_core::logging::init();
    }

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    tracing::debug!(data_dir = %data_dir.display(), "Using data directory");
    let paths = DataPaths::new(&data_dir);

    match cli.command {
        None | Some(Commands::List) => cmd_list(&paths),
        Some(Commands::Add {
            name,
            quantity,
            unit,
            times,
            every,
            start_hour,
            stock,
            low_stock,
            notes,
        }) => {
            let schedule = build_schedule(&times, every, start_hour)?;
            let mut medication = Medication::new(name, quantity, unit, schedule)?;
            medication.stock = stock;
            medication.low_stock_threshold = low_stock;
            medication.notes = notes;
            cmd_add(&paths, medication)
        }
        Some(Commands::Take { medication }) => cmd_take(&paths, &medication),
        Some(Commands::Remove { medication }) => cmd_remove(&paths, &medication),
        Some(Commands::Report { days, json }) => {
            cmd_report(&paths, days.unwrap_or(config.adherence.window_days), json)
        }
        Some(Commands::Watch { once, interval }) => cmd_watch(&paths, &config, once, interval),
        Some(Commands::Profile { command }) => cmd_profile(&paths, command),
    }
}

struct DataPaths {
    profiles: PathBuf,
    watermarks: PathBuf,
}

impl DataPaths {
    fn new(data_dir: &Path) -> Self {
        Self {
            profiles: data_dir.join("profiles.json"),
            watermarks: data_dir.join("watermarks.json"),
        }
    }
}

fn build_schedule(times: &[Slot], every: Option<u32>, start_hour: u32) -> Result<Schedule> {
    if let Some(hours) = every {
        return Ok(Schedule::Interval { hours, start_hour });
    }
    if times.is_empty() {
        return Err(Error::Other(
            "a schedule is required: pass --times or --every".into(),
        ));
    }
    Ok(Schedule::TimeOfDay {
        morning: times.contains(&Slot::Morning),
        noon: times.contains(&Slot::Noon),
        evening: times.contains(&Slot::Evening),
    })
}

fn cmd_list(paths: &DataPaths) -> Result<()> {
    let book = ProfileBook::load(&paths.profiles)?;
    let Some(profile) = book.active_profile() else {
        println!("No active profile.");
        return Ok(());
    };

    println!("{} {}", profile.avatar, profile.name);
    if profile.medications.is_empty() {
        println!("  No medications yet. Add one with `medtrack add`.");
        return Ok(());
    }

    let now = Local::now();
    let ranked = rank_by_next_dose(&profile.medications, &now)?;

    println!();
    for entry in &ranked {
        let med = &entry.medication;
        let next = match entry.next_dose {
            Some(due) if due <= now.with_timezone(&Utc) => {
                format!("{} (due)", format_time(due))
            }
            Some(due) => format_time(due),
            None => "-".to_string(),
        };
        print!(
            "  {:<20} {:<20} {:<12} {:<22} {}",
            next,
            med.name,
            med.dose_text(),
            med.schedule.to_string(),
            short_id(&med.id)
        );
        if med.is_stock_low() {
            if let Some(stock) = med.stock {
                print!("  ⚠ low stock: {} left", stock);
            }
        }
        println!();
    }
    println!();

    Ok(())
}

fn cmd_add(paths: &DataPaths, medication: Medication) -> Result<()> {
    let name = medication.name.clone();
    let schedule = medication.schedule.to_string();
    let id = ProfileBook::update(&paths.profiles, |book| book.add_medication(medication))?;

    println!("✓ Added {} ({})", name, schedule);
    println!("  id: {}", id);
    Ok(())
}

fn cmd_take(paths: &DataPaths, medication: &str) -> Result<()> {
    let taken_at = Utc::now();
    let med = ProfileBook::update(&paths.profiles, |book| {
        let id = book.resolve_medication_id(medication)?;
        Ok(book.take_dose(&id, taken_at)?.clone())
    })?;

    println!("✓ Took {} ({})", med.name, med.dose_text());

    if med.is_stock_low() {
        if let Some(stock) = med.stock {
            println!("  ⚠ Stock is low: {} {} left", stock, med.unit);
        }
    }

    if let Some(next) = next_dose(&med.schedule, &med.taken_history, &Local::now())? {
        println!("  Next dose: {}", format_time(next));
    }
    Ok(())
}

fn cmd_remove(paths: &DataPaths, medication: &str) -> Result<()> {
    let removed = ProfileBook::update(&paths.profiles, |book| {
        let id = book.resolve_medication_id(medication)?;
        book.delete_medication(&id)
    })?;

    println!("✓ Removed {}", removed.name);
    Ok(())
}

fn cmd_report(paths: &DataPaths, days: u32, json: bool) -> Result<()> {
    let book = ProfileBook::load(&paths.profiles)?;
    let medications = book
        .active_profile()
        .map(|p| p.medications.as_slice())
        .unwrap_or_default();

    let report = trailing_report(medications, &Local::now(), days)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Adherence {} → {}: {}%",
        report.window_start.with_timezone(&Local).format("%Y-%m-%d"),
        report.window_end.with_timezone(&Local).format("%Y-%m-%d"),
        report.overall_adherence
    );
    for entry in &report.medications {
        println!(
            "  {:<20} {:>3}/{:<3} doses  {:>3}%",
            entry.name, entry.taken_doses, entry.expected_doses, entry.adherence
        );
    }
    Ok(())
}

fn cmd_watch(paths: &DataPaths, config: &Config, once: bool, interval: Option<u64>) -> Result<()> {
    if !config.notifications.enabled {
        println!("Notifications are disabled in config.");
        return Ok(());
    }

    let secs = interval
        .unwrap_or(config.notifications.poll_interval_secs)
        .max(1);

    let poller = Poller::new(
        ProfileFile::new(&paths.profiles),
        FileWatermarkStore::new(&paths.watermarks),
        StdoutNotifier,
        SystemClock,
    )
    .with_interval(Duration::from_secs(secs));

    if once {
        let fired = poller.tick()?;
        if fired.is_empty() {
            println!("No doses due.");
        }
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let handle = poller.spawn();
        println!("Watching for due doses every {}s. Press Ctrl-C to stop.", secs);
        tokio::signal::ctrl_c().await?;
        handle.shutdown().await;
        Ok::<(), Error>(())
    })
}

fn cmd_profile(paths: &DataPaths, command: ProfileCommands) -> Result<()> {
    match command {
        ProfileCommands::Add { name, avatar } => {
            let id = ProfileBook::update(&paths.profiles, |book| Ok(book.add_profile(&name, &avatar)))?;
            println!("✓ Added profile {}", name);
            println!("  id: {}", id);
        }
        ProfileCommands::Use { id } => {
            let name = ProfileBook::update(&paths.profiles, |book| {
                book.switch_profile(&id)?;
                Ok(book.active_profile().map(|p| p.name.clone()).unwrap_or_default())
            })?;
            println!("✓ Active profile: {}", name);
        }
        ProfileCommands::List => {
            let book = ProfileBook::load(&paths.profiles)?;
            for profile in &book.profiles {
                let marker = if book.active_profile_id.as_deref() == Some(profile.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {} {:<20} {} medications  {}",
                    marker,
                    profile.avatar,
                    profile.name,
                    profile.medications.len(),
                    profile.id
                );
            }
        }
        ProfileCommands::Remove { id } => {
            let removed = ProfileBook::update(&paths.profiles, |book| book.delete_profile(&id))?;
            println!("✓ Removed profile {}", removed.name);
        }
    }
    Ok(())
}

/// Prints reminders to stdout
struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn deliver(&self, reminder: &Reminder) -> Result<()> {
        println!("🔔 {}", reminder.title);
        println!("   {} (due {})", reminder.body, format_time(reminder.due));
        Ok(())
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%a %d %b %H:%M").to_string()
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
