//! mpdfit - Main entry point
//!
//! `mpdfit build` searches the daemon's database, picks tracks whose total
//! length is close to the requested duration, loads them and starts any
//! followers in sync. `mpdfit trim` shortens the current queue instead.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mpdfit_common::config::{load_config, resolve_password, resolve_server, TomlConfig};
use mpdfit_common::time::minutes_to_seconds;
use mpdfit_common::{DaemonAddress, Error};
use mpdfit_ctl::catalog::{SearchField, SearchPredicate};
use mpdfit_ctl::commands::{self, BuildRequest};
use mpdfit_ctl::{SelectionEngine, SessionClient, SessionSettings, SyncController};

/// Command-line arguments for mpdfit
#[derive(Parser, Debug)]
#[command(name = "mpdfit")]
#[command(about = "Fit an MPD queue to a duration and play it in sync across daemons")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Reference daemon as [PASSWORD@]HOST[:PORT][/LATENCY]
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Password for daemons whose address carries none
    #[arg(long, global = true)]
    password: Option<String>,

    /// Follower daemon to start in sync with the reference (repeatable)
    #[arg(short = 'f', long = "follower", value_name = "ADDRESS", global = true)]
    followers: Vec<String>,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Acceptable distance from the target duration in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    tolerance: Option<i64>,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    timeout: Option<u64>,

    /// Seed the random source for a reproducible selection
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Be verbose, up to -vvv
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the database and replace the queue with matching tracks
    Build(BuildArgs),
    /// Remove random tracks until the queue fits a duration
    Trim(TrimArgs),
}

#[derive(ClapArgs, Debug)]
struct BuildArgs {
    /// Desired queue duration; omit to queue every match shuffled
    #[arg(short, long, value_name = "MINUTES")]
    duration: Option<i64>,

    /// Match any tag
    #[arg(short = 'A', long, num_args = 1.., value_name = "QUERY")]
    any: Vec<String>,

    #[arg(short = 'a', long = "artist", num_args = 1.., value_name = "QUERY")]
    artists: Vec<String>,

    #[arg(short = 'b', long = "album", num_args = 1.., value_name = "QUERY")]
    albums: Vec<String>,

    #[arg(short = 't', long = "title", num_args = 1.., value_name = "QUERY")]
    titles: Vec<String>,

    #[arg(short = 'g', long = "genre", num_args = 1.., value_name = "QUERY")]
    genres: Vec<String>,

    /// Print the chosen files instead of loading them
    #[arg(short, long)]
    print_filenames: bool,
}

impl BuildArgs {
    fn predicates(&self) -> Vec<SearchPredicate> {
        [
            (SearchField::Any, &self.any),
            (SearchField::Artist, &self.artists),
            (SearchField::Album, &self.albums),
            (SearchField::Title, &self.titles),
            (SearchField::Genre, &self.genres),
        ]
        .into_iter()
        .flat_map(|(field, queries)| {
            queries
                .iter()
                .map(move |query| SearchPredicate::new(field, query.clone()))
        })
        .collect()
    }

    fn request(&self) -> BuildRequest {
        BuildRequest {
            predicates: self.predicates(),
            target_secs: self.duration.map(minutes_to_seconds),
            print_only: self.print_filenames,
        }
    }
}

#[derive(ClapArgs, Debug)]
struct TrimArgs {
    /// Desired queue duration
    #[arg(value_name = "MINUTES")]
    minutes: i64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", describe_failure(&e));
            ExitCode::FAILURE
        }
    }
}

/// Map the three expected failures to distinct messages
fn describe_failure(error: &anyhow::Error) -> String {
    match error.downcast_ref::<Error>() {
        Some(e) if e.is_unreachable() => format!("Could not reach daemon: {:#}", error),
        Some(e) if e.is_no_tracks() => format!("No tracks matched: {:#}", error),
        Some(e) if e.is_target_unreachable() => {
            format!("Could not hit target duration: {:#}", error)
        }
        _ => format!("Error: {:#}", error),
    }
}

fn init_tracing(verbose: u8, config_level: Option<&str>) {
    let level = match (verbose, config_level) {
        (0, Some(level)) => level.to_string(),
        (0, None) => "warn".to_string(),
        (1, _) => "info".to_string(),
        (2, _) => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let default_filter = format!(
        "mpdfit={level},mpdfit_ctl={level},mpdfit_common={level}",
        level = level
    );

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(args.verbose, config.logging.level.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting mpdfit"
    );
    debug!(command = ?args.command, verbose = args.verbose, "Arguments");

    let tolerance = args.tolerance.unwrap_or_else(|| config.tolerance_secs());
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.timeout());

    // Bad arguments are reported before any daemon is contacted
    match &args.command {
        Command::Build(build) => build.request().validate()?,
        Command::Trim(trim) => commands::check_target(minutes_to_seconds(trim.minutes))?,
    }
    if tolerance < 0 {
        return Err(Error::InvalidInput(format!(
            "tolerance must not be negative, got {} seconds",
            tolerance
        ))
        .into());
    }

    let server = resolve_server(args.server.as_deref(), &config)?;
    let mut reference = SessionClient::new(session_settings(
        server,
        args.password.as_deref(),
        &config,
        timeout,
    ));
    reference
        .connect()
        .await
        .with_context(|| format!("Unable to connect to {}", reference.address()))?;

    let mut engine = match args.seed {
        Some(seed) => SelectionEngine::seeded(seed),
        None => SelectionEngine::from_entropy(),
    }
    .with_tolerance(tolerance);

    match &args.command {
        Command::Build(build) => {
            let request = build.request();
            let mut controller = SyncController::new(Arc::new(Mutex::new(reference)));
            if !request.print_only {
                for follower in connect_followers(&args, &config, timeout).await? {
                    controller.add_follower(follower);
                }
            }

            let report = commands::build(&mut engine, &controller, &request).await?;

            if request.print_only {
                for track in report.playlist.iter() {
                    println!("{}", track.path());
                }
            } else {
                for line in report.summary() {
                    println!("{}", line);
                }
                if let Some(sync) = &report.sync {
                    for (host, e) in sync.failures() {
                        eprintln!("Follower {} did not start: {}", host, e);
                    }
                }
            }

            let mut reference = controller.reference().lock().await;
            if let Err(e) = reference.disconnect().await {
                debug!(error = %e, "Disconnect failed");
            }
        }
        Command::Trim(trim) => {
            let report =
                commands::trim(&mut engine, &mut reference, minutes_to_seconds(trim.minutes))
                    .await?;
            for line in report.summary() {
                println!("{}", line);
            }
            if let Err(e) = reference.disconnect().await {
                debug!(error = %e, "Disconnect failed");
            }
        }
    }

    Ok(())
}

fn session_settings(
    address: DaemonAddress,
    cli_password: Option<&str>,
    config: &TomlConfig,
    timeout: Duration,
) -> SessionSettings {
    let password = resolve_password(&address, cli_password, config);
    SessionSettings::new(address)
        .with_password(password)
        .with_timeout(timeout)
}

/// Connect every follower; the ones that cannot be reached are skipped
async fn connect_followers(
    args: &Args,
    config: &TomlConfig,
    timeout: Duration,
) -> Result<Vec<SessionClient>> {
    let addresses: Vec<DaemonAddress> = if args.followers.is_empty() {
        config.follower_addresses()?
    } else {
        args.followers
            .iter()
            .map(|f| f.parse())
            .collect::<mpdfit_common::Result<_>>()?
    };

    let mut followers = Vec::new();
    for address in addresses {
        let mut client =
            SessionClient::new(session_settings(address, args.password.as_deref(), config, timeout));
        match client.connect().await {
            Ok(()) => followers.push(client),
            Err(e) => warn!(follower = %client.address(), error = %e, "Skipping unreachable follower"),
        }
    }
    Ok(followers)
}
