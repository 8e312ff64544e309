use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use dupsweep::core::distance::DistancePolicy;
use dupsweep::database::get_database_path;
use dupsweep::progress::AnalysisStage;
use dupsweep::{
    AnalysisConfig, AnalysisProgress, CancellationToken, Database, Deduplicator, Fingerprint,
    FsLibrary, Group, ProgressReporter,
};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "dupsweep", version, about = "Find and clean up duplicate photos")]
struct Cli {
    /// Database file (default: `<data dir>/dupsweep/dupsweep.db`)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a photo directory and group duplicates
    Scan {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Near-duplicate distance in bits (overrides config)
        #[arg(long)]
        threshold: Option<u32>,
        /// Drop existing groups before grouping
        #[arg(long)]
        fresh: bool,
        /// Fingerprint workers (overrides config)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List duplicate groups
    Groups,

    /// Mark a group as not duplicates
    Reject {
        #[arg(short, long, value_name = "ID")]
        group: String,
    },

    /// Delete every member of a group except the recommended keep
    Delete {
        #[arg(short, long, value_name = "ID")]
        group: String,
        /// Library directory the group was scanned from
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the latest analysis session
    Session {
        /// Show this many recent sessions instead
        #[arg(long, value_name = "N")]
        history: Option<usize>,
    },

    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the effective configuration
    Show,
    /// Store one setting
    Set { key: String, value: String },
}

/// Renders analysis progress on an `indicatif` bar.
struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Ok(Self { bar })
    }
}

impl ProgressReporter for BarReporter {
    fn on_progress(&self, progress: &AnalysisProgress) {
        self.bar.set_position(progress.percentage.round() as u64);
        self.bar.set_message(progress.message.clone());
        if progress.stage == AnalysisStage::Complete {
            self.bar.finish_with_message("Analysis complete");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let db_path = match cli.db {
        Some(path) => path,
        None => get_database_path()?,
    };
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    match cli.command {
        Commands::Scan {
            path,
            threshold,
            fresh,
            workers,
        } => {
            let config = db.config().get_config()?;
            let library = FsLibrary::new(&path, &config);
            println!("▶ Scanning for duplicates in: {}", library.root().display());
            let mut service = Deduplicator::with_stored_config(db, Box::new(library))?;
            if let Some(threshold) = threshold {
                service.config_mut().near_duplicate_threshold = threshold;
            }
            if let Some(workers) = workers {
                if workers == 0 {
                    bail!("--workers must be at least 1");
                }
                service.config_mut().parallel_workers = workers;
            }

            let reporter = BarReporter::new()?;
            let result = service
                .analyze_library(&reporter, fresh, &CancellationToken::new())
                .with_context(|| format!("Analysis of {} failed", path.display()))?;
            reporter.bar.finish_and_clear();

            println!(
                "Analyzed {} of {} photos in {} ms",
                result.analyzed_photos, result.total_photos, result.processing_time_ms
            );
            if result.groups.is_empty() {
                println!("No duplicates found.");
            } else {
                println!(
                    "Found {} group(s), {} duplicate(s), {} reclaimable",
                    result.groups.len(),
                    result.duplicates_found,
                    HumanBytes(result.potential_space_saved)
                );
                let policy = DistancePolicy::from(service.config());
                for group in &result.groups {
                    print_group(group, &policy);
                }
            }
            if result.degraded_fingerprints > 0 {
                println!(
                    "⚠️  {} photo(s) could not be decoded and were matched on metadata only",
                    result.degraded_fingerprints
                );
            }
            if !result.failures.is_empty() {
                println!("⚠️  {} item(s) failed:", result.failures.len());
                for failure in &result.failures {
                    println!("   {:?} {}: {}", failure.kind, failure.subject, failure.message);
                }
            }
        }

        Commands::Groups => {
            let policy = DistancePolicy::from(&db.config().get_config()?);
            let groups = db.groups().get_all_groups()?;
            if groups.is_empty() {
                println!("No duplicate groups.");
            }
            for group in &groups {
                print_group(group, &policy);
            }
        }

        Commands::Reject { group } => {
            let config = db.config().get_config()?;
            let service =
                Deduplicator::with_stored_config(db, Box::new(FsLibrary::new(".", &config)))?;
            service.reject_group(&group)?;
            println!("✅ Group {} marked as not duplicates", group);
        }

        Commands::Delete { group, path, yes } => {
            let config = db.config().get_config()?;
            let service = Deduplicator::with_stored_config(db, Box::new(FsLibrary::new(&path, &config)))?;

            let Some(target) = service.get_groups()?.into_iter().find(|g| g.id == group) else {
                bail!("Group {} not found", group);
            };
            let doomed: Vec<String> = target
                .members
                .iter()
                .filter(|m| !m.is_recommended)
                .map(|m| m.photo.library_id.clone())
                .collect();

            print_group(&target, &DistancePolicy::from(service.config()));
            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Permanently delete {} photo(s), freeing {}?",
                        doomed.len(),
                        HumanBytes(target.potential_savings())
                    ))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            let result = service.delete_group_members(&group, &doomed)?;
            println!("🗑️  Deleted {} photo(s)", result.deleted_count);
            for error in &result.errors {
                eprintln!("⚠️  {}: {}", error.photo_id, error.message);
            }
        }

        Commands::Session { history } => {
            let sessions = match history {
                Some(limit) => db.sessions().list_sessions(limit)?,
                None => db.sessions().get_latest_session()?.into_iter().collect(),
            };
            if sessions.is_empty() {
                println!("No analysis sessions yet.");
            }
            for session in sessions {
                println!(
                    "[{}] {} {}\n     photos: {}/{}  duplicates: {}  reclaimable: {}",
                    session.started_at,
                    session.id,
                    session.status.as_str(),
                    session.analyzed_photos,
                    session.total_photos,
                    session.duplicates_found,
                    HumanBytes(session.bytes_potentially_saved)
                );
                if let Some(message) = session.error_message {
                    println!("     error: {}", message);
                }
            }
        }

        Commands::Config { command } => match command {
            ConfigCmd::Show => {
                let config = db.config().get_config()?;
                for (key, value) in config.entries() {
                    println!("{} = {}", key, value);
                }
            }
            ConfigCmd::Set { key, value } => {
                let mut config = db.config().get_config()?;
                config
                    .apply(&key, &value)
                    .with_context(|| format!("Known keys: {}", AnalysisConfig::KEYS.join(", ")))?;
                db.config().save_config(&config)?;
                println!("✅ {} updated", key);
            }
        },
    }

    Ok(())
}

/// Print a group with each member's likeness to the recommended keep.
fn print_group(group: &Group, policy: &DistancePolicy) {
    println!(
        "\n✨ {} ({} photos, {} reclaimable)",
        group.id,
        group.member_count,
        HumanBytes(group.potential_savings())
    );

    let keep_fp = group
        .recommended_keep()
        .and_then(|p| p.fingerprint.as_deref())
        .and_then(|fp| fp.parse::<Fingerprint>().ok());

    for member in &group.members {
        let likeness = if member.is_recommended {
            "keep"
        } else {
            let fp = member
                .photo
                .fingerprint
                .as_deref()
                .and_then(|fp| fp.parse::<Fingerprint>().ok());
            match (keep_fp, fp) {
                (Some(a), Some(b)) if policy.is_identical(&a, &b) => "identical",
                (Some(a), Some(b)) if policy.is_near_duplicate(&a, &b) => "similar",
                _ => "related",
            }
        };
        let marker = if member.is_recommended { "🏆" } else { "  " };
        println!(
            "   {} {} ({}, {})",
            marker,
            member.photo.path,
            HumanBytes(member.photo.size),
            likeness
        );
    }
}
