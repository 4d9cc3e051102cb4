use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

mod commands;

#[derive(Parser)]
#[command(name = "hm")]
#[command(about = "healthmon operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env overrides ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Raw report log utilities
    Raw {
        #[command(subcommand)]
        cmd: RawCmd,
    },

    /// Daily rollup utilities
    Rollup {
        #[command(subcommand)]
        cmd: RollupCmd,
    },

    /// Client-side helpers
    Report {
        #[command(subcommand)]
        cmd: ReportCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum RawCmd {
    /// Recompute the tamper stamp of every raw record of one machine-day.
    /// Exits non-zero on any mismatch.
    Verify {
        #[arg(long)]
        machine: String,

        /// YYYY-MM-DD (UTC)
        #[arg(long)]
        day: String,

        /// Layered config paths; only the secret env names are read.
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RollupCmd {
    /// Rebuild one daily summary from the raw log and diff it against the
    /// stored row.
    Reconcile {
        #[arg(long)]
        machine: String,

        /// YYYY-MM-DD (UTC)
        #[arg(long)]
        day: String,

        /// Replace the stored row when it differs.
        #[arg(long, default_value_t = false)]
        apply: bool,
    },
}

#[derive(Subcommand)]
enum ReportCmd {
    /// POST a report file (object or array) to a running daemon.
    Send {
        /// e.g. http://127.0.0.1:5000/api/report
        #[arg(long)]
        url: String,

        /// Path to the JSON payload
        #[arg(long)]
        file: String,

        /// Layered config paths; only the api key env name is read.
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        let reason = format!("{e:#}");
        error!(%reason, "hm command failed");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = hm_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = hm_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_raw_reports={} has_daily_summaries={}",
                        s.ok, s.has_raw_reports, s.has_daily_summaries
                    );
                }
                DbCmd::Migrate => {
                    hm_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = hm_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Raw { cmd } => match cmd {
            RawCmd::Verify {
                machine,
                day,
                config_paths,
            } => commands::raw::verify(&machine, &day, &config_paths).await?,
        },

        Commands::Rollup { cmd } => match cmd {
            RollupCmd::Reconcile {
                machine,
                day,
                apply,
            } => commands::rollup::reconcile(&machine, &day, apply).await?,
        },

        Commands::Report { cmd } => match cmd {
            ReportCmd::Send {
                url,
                file,
                config_paths,
            } => commands::report::send(&url, &file, &config_paths).await?,
        },
    }

    Ok(())
}

/// Logs go to stderr; stdout carries `key=value` output.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
