//! Point d'entrée CLI pour fence-pg

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, EnvFilter};

use fence_pg::Settings;

// Charger .env au démarrage
fn load_env() {
    // Chercher .env dans le répertoire courant ou parent
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::{Commands, SettingsArgs};

/// Synchroniser les clôtures administratives entre PostGIS et des fichiers GeoJSON
#[derive(Parser)]
#[command(name = "fence-pg")]
#[command(author, version)]
#[command(about = "Synchroniser les clôtures administratives entre PostGIS et un répertoire GeoJSON")]
#[command(long_about = "Export parallèle des clôtures vers un fichier <adcode>.json par région, chargement atomique et idempotent, gestion du cycle de vie de la table.\n\nConnexion via PGURL ou PGHOST/PGPORT/PGUSER/PGPASSWORD/PGDATABASE (fichier .env supporté).")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();

    // Configurer le logging
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Usage => {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
        // Seul le répertoire de région compte: le reste de la config n'est pas validé
        Commands::Clean => return cli::cmd_clean(&cli.settings.region_dir()).await,
        _ => {}
    }

    let mut settings = Settings::from_env()?;
    cli.settings.apply(&mut settings)?;
    debug!(
        fence = %settings.tables.fence,
        adcode = %settings.tables.adcode,
        dir = %settings.region_dir.display(),
        srid = settings.srid,
        "Settings loaded"
    );

    cli::run(cli.command, &settings).await
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
