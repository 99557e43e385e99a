mod codec;
mod config;
mod controller;
mod db;
mod filter;
mod http;
mod models;
mod server;
mod store;
mod tui;
mod wire;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use config::Config;
use controller::{NoticeLevel, ViewController};
use db::Database;
use http::HttpStore;
use models::{
    parse_time, score_factor, ApplicationRecord, FieldFilter, FieldType, FilterSpec, Scorecard, SortDirection,
    SortKey, SortSpec, Stage, SCORE_FACTORS,
};
use std::fs::{self, OpenOptions};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use store::RecordStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(about = "Job application tracker - record, filter, and review applications")]
struct Cli {
    /// Path to the SQLite database (overrides JOBTRACK_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Base URL of a running `jobtrack serve` to use instead of the local database
    #[arg(long, global = true)]
    api: Option<String>,

    /// Request timeout in seconds when using --api
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Add a job application
    Add {
        #[command(flatten)]
        fields: RecordArgs,
    },

    /// List applications
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show application details
    Show {
        /// Application ID
        id: i64,
    },

    /// Update an application (unspecified fields keep their values)
    Update {
        /// Application ID
        id: i64,

        #[command(flatten)]
        fields: RecordArgs,
    },

    /// Delete an application
    Delete {
        /// Application ID
        id: i64,
    },

    /// Manage saved filter presets
    Preset {
        #[command(subcommand)]
        command: PresetCommands,
    },

    /// Count applications by a field
    Stats {
        /// employer, role, level, stage, city or sector
        #[arg(long, default_value = "stage")]
        by: filter::StatField,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// List upcoming interviews
    Interviews,

    /// Show the values available to --filter
    Suggest {
        /// Only this field (Employer, City, JobTitle, GeneralRole, JobLevel, Sector)
        field: Option<FieldType>,
    },

    /// Manage interview scorecards
    Score {
        #[command(subcommand)]
        command: ScoreCommands,
    },

    /// Browse applications interactively
    Browse {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Serve the REST API over the local database
    Serve {
        /// Address to bind (overrides JOBTRACK_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[derive(Subcommand)]
enum PresetCommands {
    /// List saved presets
    List,

    /// Save the given filters under a name, replacing any preset of that name
    Save {
        /// Preset name
        name: String,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show a preset's filters
    Show {
        /// Preset name
        name: String,
    },

    /// Delete a preset
    Delete {
        /// Preset ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum ScoreCommands {
    /// Show an application's scorecard
    Show {
        /// Application ID
        id: i64,
    },

    /// Set one factor (0-10)
    Set {
        /// Application ID
        id: i64,

        /// Factor id (communication, skillMatch, friendliness, cultureFit,
        /// compensation, growthPotential, workplace, benefits)
        factor: String,

        /// Score
        value: u8,
    },

    /// Remove one factor
    Remove {
        /// Application ID
        id: i64,

        /// Factor id
        factor: String,
    },
}

#[derive(Args, Default)]
struct FilterArgs {
    /// Case-insensitive text search across all fields
    #[arg(short, long)]
    search: Option<String>,

    /// Field filter as Type=Value (Employer, City, JobTitle, GeneralRole, JobLevel, Sector); repeatable
    #[arg(short, long = "filter", value_parser = parse_field_filter)]
    filters: Vec<FieldFilter>,

    /// Only show this stage; repeatable
    #[arg(long = "stage")]
    stages: Vec<Stage>,

    /// Hide Ghosted, Rejected, Dropped Out and Offer Declined
    #[arg(long)]
    hide_negative: bool,

    /// Applied on or after (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Applied on or before (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Sort column (e.g. employer, lastUpdate, daNow)
    #[arg(long)]
    sort: Option<SortKey>,

    /// Sort descending
    #[arg(long)]
    desc: bool,

    /// Start from a URL query string, e.g. "search=acme&hideNegativeOutcomes=true"
    #[arg(long)]
    query: Option<String>,

    /// Start from a saved preset
    #[arg(long)]
    preset: Option<String>,
}

impl FilterArgs {
    /// Layers the explicit flags over `spec`.
    fn overlay(&self, mut spec: FilterSpec) -> FilterSpec {
        if let Some(search) = &self.search {
            spec.search_query = search.clone();
        }
        spec.filters.extend(self.filters.iter().cloned());
        for stage in &self.stages {
            if !spec.selected_stages.contains(stage) {
                spec.selected_stages.push(*stage);
            }
        }
        if self.hide_negative {
            spec.hide_negative_outcomes = true;
        }
        if self.from.is_some() {
            spec.date_range.start = self.from;
        }
        if self.to.is_some() {
            spec.date_range.end = self.to;
        }
        if let Some(key) = self.sort {
            let direction = if self.desc { SortDirection::Desc } else { SortDirection::Asc };
            spec.sort = Some(SortSpec { key, direction });
        } else if self.desc {
            if let Some(sort) = spec.sort.as_mut() {
                sort.direction = SortDirection::Desc;
            }
        }
        spec
    }
}

#[derive(Args)]
struct RecordArgs {
    #[arg(short, long)]
    employer: Option<String>,

    /// Job title
    #[arg(short, long)]
    title: Option<String>,

    #[arg(short, long)]
    city: Option<String>,

    #[arg(long)]
    year: Option<i32>,

    /// General role (e.g. Software Engineer)
    #[arg(long)]
    role: Option<String>,

    /// Job level (e.g. Senior)
    #[arg(long)]
    level: Option<String>,

    #[arg(long)]
    sector: Option<String>,

    /// Date applied or notified (YYYY-MM-DD)
    #[arg(long)]
    applied: Option<NaiveDate>,

    /// Date of last update (YYYY-MM-DD), defaults to today
    #[arg(long)]
    updated: Option<NaiveDate>,

    /// Upcoming interview date (YYYY-MM-DD)
    #[arg(long)]
    interview: Option<NaiveDate>,

    /// Upcoming interview time (HH:MM)
    #[arg(long, value_parser = parse_time_arg)]
    interview_time: Option<NaiveTime>,

    /// Last completed stage, e.g. "Interview 1"
    #[arg(long)]
    stage: Option<Stage>,

    #[arg(long)]
    notes: Option<String>,

    /// Applied through an external site (Yes/No)
    #[arg(long)]
    external: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    website: Option<String>,

    /// Link to the job posting
    #[arg(long)]
    link: Option<String>,
}

impl RecordArgs {
    fn apply(self, record: &mut ApplicationRecord, today: NaiveDate) {
        if let Some(v) = self.employer {
            record.employer = v;
        }
        if let Some(v) = self.title {
            record.job_title = v;
        }
        if let Some(v) = self.city {
            record.city_town = v;
        }
        if let Some(v) = self.year {
            record.year = v;
        }
        if let Some(v) = self.role {
            record.general_role = v;
        }
        if let Some(v) = self.level {
            record.job_level = v;
        }
        if let Some(v) = self.applied {
            record.applied_on = Some(v);
        }
        record.last_update = Some(self.updated.unwrap_or(today));
        if let Some(v) = self.interview {
            record.interview_date = Some(v);
            // An interview without a time is booked for the morning.
            if record.interview_time.is_none() {
                record.interview_time = NaiveTime::from_hms_opt(9, 0, 0);
            }
        }
        if let Some(v) = self.interview_time {
            record.interview_time = Some(v);
        }
        if let Some(v) = self.stage {
            record.stage = v;
        }
        if let Some(v) = self.external {
            record.external = v;
        }
        for (field, value) in [
            (&mut record.notes, self.notes),
            (&mut record.job_description, self.description),
            (&mut record.company_website, self.website),
            (&mut record.role_link, self.link),
            (&mut record.sector, self.sector),
        ] {
            if let Some(v) = value {
                *field = Some(v);
            }
        }
    }
}

fn parse_field_filter(raw: &str) -> std::result::Result<FieldFilter, String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected Type=Value, got '{}'", raw))?;
    let field: FieldType = field.trim().parse()?;
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("missing value for {}", field));
    }
    Ok(FieldFilter::new(field, value))
}

fn parse_time_arg(raw: &str) -> std::result::Result<NaiveTime, String> {
    parse_time(raw).ok_or_else(|| format!("expected HH:MM, got '{}'", raw))
}

/// Logs go to stderr, or to `log_file` while the terminal UI owns the screen.
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("jobtrack={level},tower_http={level}")))
        .unwrap_or_else(|_| EnvFilter::new("jobtrack=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

fn open_store(config: &Config) -> Result<Box<dyn RecordStore>> {
    if let Some(url) = &config.api_url {
        tracing::debug!("Using record store at {}", url);
        return Ok(Box::new(HttpStore::new(url, config.timeout)?));
    }
    let db = Database::open(&config.db_path)?;
    db.ensure_initialized()?;
    Ok(Box::new(db))
}

/// Prints success and info notices; turns the last error into a failure.
fn report(view: &mut ViewController) -> Result<()> {
    let mut failure = None;
    for notice in view.drain_notices() {
        match notice.level {
            NoticeLevel::Error => failure = Some(notice.message),
            _ => println!("{}", notice.message),
        }
    }
    match failure {
        Some(message) => Err(anyhow!(message)),
        None => Ok(()),
    }
}

/// Loads records and presets, then applies --query, --preset and the
/// explicit flags in that order.
fn load_view<'a>(store: &'a dyn RecordStore, args: &FilterArgs) -> Result<ViewController<'a>> {
    let mut view = ViewController::new(store);
    view.mount();
    report(&mut view)?;
    if let Some(query) = &args.query {
        view.apply_query(query);
        report(&mut view)?;
    }
    if let Some(name) = &args.preset {
        view.apply_preset_named(name);
        report(&mut view)?;
    }
    let spec = args.overlay(view.spec().clone());
    view.set_spec(spec);
    Ok(view)
}

fn print_records(records: &[&ApplicationRecord], today: NaiveDate) {
    println!(
        "{:<6} {:<22} {:<20} {:<26} {:<14} {:<10} {:>5}",
        "ID", "STAGE", "EMPLOYER", "TITLE", "CITY", "APPLIED", "DAYS"
    );
    println!("{}", "-".repeat(109));
    for record in records {
        let applied = record
            .applied_on
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        let days = record
            .day_counts(today)
            .da_now
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<22} {:<20} {:<26} {:<14} {:<10} {:>5}",
            record.id,
            truncate(record.stage.as_str(), 20),
            truncate(&record.employer, 18),
            truncate(&record.job_title, 24),
            truncate(&record.city_town, 12),
            applied,
            days
        );
    }
}

fn print_scorecard(card: &Scorecard) {
    println!("{:<18} {:>6}", "FACTOR", "SCORE");
    println!("{}", "-".repeat(25));
    for factor in &SCORE_FACTORS {
        let value = card
            .scores
            .get(factor.id)
            .map(|v| format!("{}/{}", v, factor.max))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<18} {:>6}", factor.name, value);
    }
    println!(
        "{:<18} {:>6}  ({:.0}%)",
        "TOTAL",
        format!("{}/{}", card.total(), Scorecard::max_total()),
        card.percentage()
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?.with_overrides(cli.db, cli.api, cli.timeout);
    let log_file = matches!(cli.command, Commands::Browse { .. }).then(|| config.log_path());
    init_tracing(&config.log_level, log_file.as_deref())?;
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Init => {
            if config.api_url.is_some() {
                bail!("'init' works on the local database; drop --api");
            }
            let db = Database::open(&config.db_path)?;
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Serve { bind } => {
            if config.api_url.is_some() {
                bail!("'serve' works on the local database; drop --api");
            }
            let db = Database::open(&config.db_path)?;
            db.init()?;
            let addr = bind.unwrap_or(config.bind);
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(server::serve(db, addr))?;
        }

        command => {
            let store = open_store(&config)?;
            run_command(store.as_ref(), command, today)?;
        }
    }

    Ok(())
}

fn run_command(store: &dyn RecordStore, command: Commands, today: NaiveDate) -> Result<()> {
    match command {
        Commands::Init | Commands::Serve { .. } => bail!("this command does not use the record store"),

        Commands::Add { fields } => {
            let mut draft = ApplicationRecord::draft(today);
            fields.apply(&mut draft, today);
            let mut view = load_view(store, &FilterArgs::default())?;
            let created = view.create(draft);
            report(&mut view)?;
            if created.is_none() {
                bail!("Application was not added");
            }
        }

        Commands::List { filter } => {
            let view = load_view(store, &filter)?;
            let visible = view.visible();
            if visible.is_empty() {
                println!("No applications found.");
            } else {
                print_records(&visible, today);
                println!("\n{} of {} application(s)", visible.len(), view.records().len());
            }
            let query = view.query();
            if !view.spec().is_empty() {
                println!("Query: ?{}", query);
            }
        }

        Commands::Show { id } => {
            let view = load_view(store, &FilterArgs::default())?;
            let Some(record) = view.record(id) else {
                println!("Application #{} not found.", id);
                return Ok(());
            };
            println!("Application #{}", record.id);
            println!("Employer: {}", record.employer);
            println!("Title: {}", record.job_title);
            if !record.city_town.is_empty() {
                println!("City: {}", record.city_town);
            }
            println!("Year: {}", record.year);
            if !record.general_role.is_empty() {
                println!("Role: {}", record.general_role);
            }
            if !record.job_level.is_empty() {
                println!("Level: {}", record.job_level);
            }
            if let Some(sector) = &record.sector {
                println!("Sector: {}", sector);
            }
            println!("Stage: {}", record.stage);
            let counts = record.day_counts(today);
            if let Some(applied) = record.applied_on {
                println!("Applied: {} ({} days ago)", applied, counts.da_now.unwrap_or_default());
            }
            if let Some(updated) = record.last_update {
                println!("Last update: {} ({} days ago)", updated, counts.lu_now.unwrap_or_default());
            }
            if let Some(days) = counts.da_lu {
                println!("Days from application to last update: {}", days);
            }
            if let Some(date) = record.interview_date {
                match record.interview_time {
                    Some(time) => println!("Interview: {} at {}", date, time.format("%H:%M")),
                    None => println!("Interview: {}", date),
                }
            }
            println!("External: {}", record.external);
            if let Some(url) = &record.company_website {
                println!("Website: {}", url);
            }
            if let Some(url) = &record.role_link {
                println!("Posting: {}", url);
            }
            if let Some(notes) = &record.notes {
                println!("\n--- Notes ---\n{}", notes);
            }
            if let Some(description) = &record.job_description {
                println!("\n--- Description ---\n{}", textwrap::fill(description, 80));
            }
            if record.stage.is_interviewing() {
                let card = store.list_scores(id)?;
                if !card.scores.is_empty() {
                    println!("\n--- Scorecard ---");
                    print_scorecard(&card);
                }
            }
        }

        Commands::Update { id, fields } => {
            let mut view = load_view(store, &FilterArgs::default())?;
            let mut record = view
                .record(id)
                .cloned()
                .ok_or_else(|| anyhow!("Application #{} not found", id))?;
            fields.apply(&mut record, today);
            view.update(record);
            report(&mut view)?;
        }

        Commands::Delete { id } => {
            let mut view = load_view(store, &FilterArgs::default())?;
            view.delete(id);
            report(&mut view)?;
        }

        Commands::Preset { command } => match command {
            PresetCommands::List => {
                let view = load_view(store, &FilterArgs::default())?;
                if view.presets().is_empty() {
                    println!("No filter presets saved.");
                } else {
                    println!("{:<6} {:<24} {}", "ID", "NAME", "QUERY");
                    println!("{}", "-".repeat(72));
                    for preset in view.presets() {
                        let query = match codec::from_preset(preset) {
                            Ok(spec) => codec::to_query(&spec),
                            Err(e) => format!("(unreadable: {})", e),
                        };
                        println!("{:<6} {:<24} {}", preset.id, truncate(&preset.name, 22), query);
                    }
                }
            }

            PresetCommands::Save { name, filter } => {
                let mut view = load_view(store, &filter)?;
                view.save_preset(&name);
                report(&mut view)?;
            }

            PresetCommands::Show { name } => {
                let view = load_view(store, &FilterArgs::default())?;
                let preset = view
                    .presets()
                    .iter()
                    .find(|p| p.name == name)
                    .ok_or_else(|| anyhow!("No filter preset named '{}'", name))?;
                println!("Preset '{}' (ID: {})", preset.name, preset.id);
                let spec = codec::from_preset(preset)
                    .with_context(|| format!("Filter preset '{}' could not be read", preset.name))?;
                println!("Query: ?{}", codec::to_query(&spec));
                let pretty = serde_json::from_str::<serde_json::Value>(&preset.config)
                    .and_then(|v| serde_json::to_string_pretty(&v))
                    .unwrap_or_else(|_| preset.config.clone());
                println!("\n--- Stored ---\n{}", pretty);
            }

            PresetCommands::Delete { id } => {
                let mut view = load_view(store, &FilterArgs::default())?;
                view.delete_preset(id);
                report(&mut view)?;
            }
        },

        Commands::Stats { by, filter } => {
            let view = load_view(store, &filter)?;
            let visible: Vec<ApplicationRecord> = view.visible().into_iter().cloned().collect();
            let counts = filter::statistics(&visible, by);
            if counts.is_empty() {
                println!("No applications found.");
            } else {
                println!("{:<36} {:>6} {:>7}", "VALUE", "COUNT", "SHARE");
                println!("{}", "-".repeat(51));
                for (label, count) in counts {
                    let share = count as f64 * 100.0 / visible.len() as f64;
                    println!("{:<36} {:>6} {:>6.1}%", truncate(&label, 34), count, share);
                }
            }
        }

        Commands::Interviews => {
            let view = load_view(store, &FilterArgs::default())?;
            let upcoming = filter::upcoming_interviews(view.records(), today);
            if upcoming.is_empty() {
                println!("No upcoming interviews.");
            } else {
                println!("{:<10} {:<6} {:<6} {:<20} {:<26} {:<16}", "DATE", "TIME", "ID", "EMPLOYER", "TITLE", "STAGE");
                println!("{}", "-".repeat(89));
                for record in upcoming {
                    let date = record
                        .interview_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_default();
                    let time = record
                        .interview_time
                        .map(|t| t.format("%H:%M").to_string())
                        .unwrap_or_else(|| "09:00".to_string());
                    println!(
                        "{:<10} {:<6} {:<6} {:<20} {:<26} {:<16}",
                        date,
                        time,
                        record.id,
                        truncate(&record.employer, 18),
                        truncate(&record.job_title, 24),
                        truncate(record.stage.as_str(), 16)
                    );
                }
            }
        }

        Commands::Suggest { field } => {
            let view = load_view(store, &FilterArgs::default())?;
            let suggestions: Vec<FieldFilter> = filter::filter_suggestions(view.records())
                .into_iter()
                .filter(|s| field.is_none_or(|f| s.field == f))
                .collect();
            if suggestions.is_empty() {
                println!("No filter values available.");
            }
            for suggestion in suggestions {
                println!("--filter \"{}={}\"", suggestion.field, suggestion.value);
            }
        }

        Commands::Score { command } => match command {
            ScoreCommands::Show { id } => {
                let card = store.list_scores(id)?;
                println!("Scorecard for application #{}", id);
                print_scorecard(&card);
            }

            ScoreCommands::Set { id, factor, value } => {
                store.set_score(id, &factor, value)?;
                let name = score_factor(&factor).map_or(factor.as_str(), |f| f.name);
                println!("Set {} to {} for application #{}", name, value, id);
            }

            ScoreCommands::Remove { id, factor } => {
                store.remove_score(id, &factor)?;
                println!("Removed {} from application #{}", factor, id);
            }
        },

        Commands::Browse { filter } => {
            let view = load_view(store, &filter)?;
            tui::run_browse(store, view)?;
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
