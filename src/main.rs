//! cookieconsent - cookie consent data layer and gateway
//!
//! Usage:
//!   cookieconsent                          → migrate, then serve the HTTP gateway
//!   cookieconsent normalize                → upgrade a legacy schema in place
//!   cookieconsent totals                   → print consent totals
//!   cookieconsent cookies list             → print the cookie registry
//!   cookieconsent config init              → write a default config file

use clap::{Parser, Subcommand};
use cookieconsent_core::{expand_tilde, BindMode, CookieCategory, CookieInput, Settings};
use cookieconsent_store::{
    install, uninstall, BannerConfigStore, ConsentCounter, CookieRegistry, Database,
    SchemaNormalizer,
};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_ENV: &str = "COOKIECONSENT_CONFIG";
const DB_ENV: &str = "COOKIECONSENT_DB";
const DEFAULT_CONFIG: &str = "cookieconsent.toml";

#[derive(Parser, Debug)]
#[command(
    name = "cookieconsent",
    about = "Cookie consent data layer: consent totals, cookie registry, banner config",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file (TOML). Or set COOKIECONSENT_CONFIG
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// SQLite database file, overrides the settings file. Or set COOKIECONSENT_DB
    #[arg(long, global = true)]
    db: Option<String>,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize and install the tables, then start the HTTP gateway
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        /// Bind mode: lan or loopback
        #[arg(short, long)]
        bind: Option<String>,
        /// Skip normalize/install at startup
        #[arg(long, default_value_t = false)]
        no_migrate: bool,
    },
    /// Upgrade a legacy schema to the canonical layout
    Normalize {
        /// Print the full report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Create the tables and seed the single-row tables
    Install,
    /// Drop all tables
    Uninstall {
        /// Confirm data loss
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Print consent totals
    Totals,
    /// Record one visitor response
    Record {
        #[arg(long, default_value_t = 0)]
        accepted: u64,
        #[arg(long, default_value_t = 0)]
        rejected: u64,
    },
    /// Manage the cookie registry
    Cookies {
        #[command(subcommand)]
        command: CookieCommands,
    },
    /// Print the banner configuration
    Banner,
    /// Manage the settings file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Show version
    Version,
}

#[derive(Subcommand, Debug)]
enum CookieCommands {
    /// List declared cookies
    List {
        #[arg(long)]
        category: Option<String>,
    },
    /// Declare a cookie
    Add {
        #[arg(long)]
        category: String,
        #[arg(long)]
        cookie_id: String,
        #[arg(long)]
        domain: String,
        #[arg(long)]
        duration: String,
        #[arg(long)]
        description: String,
    },
    /// Remove a declared cookie
    Remove { id: i64 },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Write the default settings to the config path
    Init {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print the resolved settings
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref().map(expand_tilde).as_deref())?;

    let config_path = resolve_config_path(cli.config.as_deref());
    let settings = resolve_settings(&config_path, cli.db.as_deref());

    match cli.command {
        None => serve(settings, None, None, false).await?,
        Some(Commands::Serve {
            port,
            bind,
            no_migrate,
        }) => serve(settings, port, bind, no_migrate).await?,
        Some(Commands::Normalize { json }) => {
            let db = Database::open_with_settings(&settings)?;
            let report = SchemaNormalizer::new(db).normalize()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.fresh_install {
                println!("No tables found; run `cookieconsent install`.");
            } else {
                for step in &report.steps {
                    println!(
                        "{:<32} {:<14} {}",
                        step.table,
                        format!("{:?}", step.step),
                        serde_json::to_string(&step.outcome)?
                    );
                }
                println!(
                    "{} applied, {} skipped",
                    report.applied().len(),
                    report.skipped().len()
                );
            }
        }
        Some(Commands::Install) => {
            let db = Database::open_with_settings(&settings)?;
            install(&db)?;
            println!("Installed tables in {}", settings.database.path.display());
        }
        Some(Commands::Uninstall { yes }) => {
            if !yes {
                anyhow::bail!("uninstall drops all consent data; pass --yes to confirm");
            }
            let db = Database::open_with_settings(&settings)?;
            uninstall(&db)?;
            println!("Dropped tables in {}", settings.database.path.display());
        }
        Some(Commands::Totals) => {
            let db = Database::open_with_settings(&settings)?;
            let totals = ConsentCounter::new(db).totals()?;
            println!("{}", serde_json::to_string_pretty(&totals)?);
        }
        Some(Commands::Record { accepted, rejected }) => {
            let db = Database::open_with_settings(&settings)?;
            let totals = ConsentCounter::new(db).record_response(accepted, rejected)?;
            println!("{}", serde_json::to_string_pretty(&totals)?);
        }
        Some(Commands::Cookies { command }) => {
            let db = Database::open_with_settings(&settings)?;
            run_cookies(CookieRegistry::new(db), command)?;
        }
        Some(Commands::Banner) => {
            let db = Database::open_with_settings(&settings)?;
            let config = BannerConfigStore::new(db).get()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists; pass --force to overwrite",
                        config_path.display()
                    );
                }
                if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&config_path, Settings::default().to_toml())?;
                println!("Wrote {}", config_path.display());
            }
            ConfigCommands::Show => print!("{}", settings.to_toml()),
        },
        Some(Commands::Version) => {
            println!("cookieconsent v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cookieconsent=info,tower_http=info".into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let Some(path) = log_file else {
        registry.init();
        return Ok(None);
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("--log-file must name a file: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    registry
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();
    Ok(Some(guard))
}

fn resolve_config_path(flag: Option<&str>) -> PathBuf {
    flag.map(str::to_string)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(|p| expand_tilde(&p))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

/// Settings file, then `--db` / `COOKIECONSENT_DB` on top.
fn resolve_settings(config_path: &Path, db_flag: Option<&str>) -> Settings {
    let mut settings = Settings::load(config_path);
    if let Some(db) = db_flag
        .map(str::to_string)
        .or_else(|| std::env::var(DB_ENV).ok())
    {
        settings.database.path = expand_tilde(&db);
    }
    settings
}

async fn serve(
    mut settings: Settings,
    port: Option<u16>,
    bind: Option<String>,
    no_migrate: bool,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        settings.gateway.port = port;
    }
    if let Some(bind) = bind {
        settings.gateway.bind = BindMode::parse_lenient(&bind);
    }
    let db = Database::open_with_settings(&settings)?;
    if !no_migrate {
        // Normalize first: install's seeding assumes canonical columns.
        let report = SchemaNormalizer::new(db.clone()).normalize()?;
        for step in report.skipped() {
            tracing::warn!(table = %step.table, step = ?step.step, "normalization step skipped");
        }
        install(&db)?;
    }
    cookieconsent_gateway::start_gateway(settings, db).await
}

fn run_cookies(registry: CookieRegistry, command: CookieCommands) -> anyhow::Result<()> {
    match command {
        CookieCommands::List { category } => {
            let category = category
                .as_deref()
                .map(str::parse::<CookieCategory>)
                .transpose()?;
            for cookie in registry.list(category)? {
                println!(
                    "{:>5}  {:<12} {:<24} {:<24} {}",
                    cookie.id, cookie.category, cookie.cookie_id, cookie.domain, cookie.duration
                );
            }
        }
        CookieCommands::Add {
            category,
            cookie_id,
            domain,
            duration,
            description,
        } => {
            let created = registry.create(&CookieInput::new(
                category,
                cookie_id,
                domain,
                duration,
                description,
            ))?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        CookieCommands::Remove { id } => {
            if !registry.delete(id)? {
                anyhow::bail!("no cookie with id {}", id);
            }
            println!("Removed cookie {}", id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_serves() {
        let cli = Cli::try_parse_from(["cookieconsent"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["cookieconsent", "totals", "--db", "/tmp/x.db"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Totals)));
        assert_eq!(cli.db.as_deref(), Some("/tmp/x.db"));
    }

    #[test]
    fn record_defaults_to_zero_deltas() {
        let cli = Cli::try_parse_from(["cookieconsent", "record", "--accepted", "1"]).unwrap();
        match cli.command {
            Some(Commands::Record { accepted, rejected }) => assert_eq!((accepted, rejected), (1, 0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn db_flag_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("c.toml");
        std::fs::write(&config, "[database]\npath = \"from-file.db\"\n").unwrap();
        let settings = resolve_settings(&config, Some("flag.db"));
        assert_eq!(settings.database.path, PathBuf::from("flag.db"));
    }
}
