//! Définition et implémentation des commandes CLI
//!
//! Chaque sous-commande correspond à une opération du cœur:
//! - cycle de vie: `create`, `index`, `order`, `drop`, `trunc`, `check`
//! - données: `dump` (base -> fichiers), `load` (fichiers -> base), `clean`
//! - séquences: `reset`, `setup`, `reload`, `backup`, `restore`

use std::path::{Path, PathBuf};

use adcode::{Adcode, RegionDir};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use fence_pg::store::pool::test_connection;
use fence_pg::{
    create_pool, BackupCoordinator, ExportEngine, ExportReport, FenceError, Lifecycle,
    LoadEngine, PgFenceStore, Settings,
};
use tracing::info;

#[derive(Subcommand)]
pub enum Commands {
    /// Drop and recreate the (empty) fence table
    Create,

    /// Build the code, adcode and spatial indexes (slow, run after loading)
    Index,

    /// Rewrite the administrative-code table ordered by (rank, code)
    Order,

    /// Drop the fence table
    Drop,

    /// Truncate the fence table
    Trunc,

    /// Remove every region file from the region directory
    Clean,

    /// Export fences to region files (every aggregate fence when no code is given)
    Dump {
        /// 6-digit administrative codes to export (partial export)
        codes: Vec<Adcode>,

        /// Write the export report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Load region files into the fence table as one atomic upsert
    Load {
        /// 6-digit administrative codes to load (default: every file in the directory)
        codes: Vec<Adcode>,
    },

    /// Dump the fence table to the backup file (pg_dump)
    Backup,

    /// Drop the fence table and restore it from the backup file (pg_restore)
    Restore,

    /// Check key invariant, references and geometry validity
    Check,

    /// truncate + load + check
    Reload,

    /// drop + create
    Reset,

    /// create + load + index
    Setup,

    /// Print usage
    Usage,
}

/// Surcharges de configuration (prioritaires sur l'environnement)
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Region file directory (défaut : env FENCE_DIR / data/fence)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Backup artifact path (défaut : env FENCE_BACKUP / data/fence.dump)
    #[arg(long, global = true)]
    pub backup_file: Option<PathBuf>,

    /// Fence table, optionally schema-qualified (défaut : env FENCE_TABLE / fence)
    #[arg(long, global = true)]
    pub fence_table: Option<String>,

    /// Administrative-code table (défaut : env ADCODE_TABLE / adcode)
    #[arg(long, global = true)]
    pub adcode_table: Option<String>,

    /// Export workers for a full dump (défaut : env EXPORT_JOBS / 16)
    #[arg(long, global = true)]
    pub jobs: Option<usize>,

    /// SRID of the geometry column (défaut : env FENCE_SRID / 4326)
    #[arg(long, global = true)]
    pub srid: Option<i32>,
}

impl SettingsArgs {
    /// Répertoire de région seul: `--dir`, sinon `FENCE_DIR`, sinon le défaut
    pub fn region_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(fence_pg::config::region_dir_from_env)
    }

    /// Applique les surcharges CLI à la configuration
    pub fn apply(self, settings: &mut Settings) -> Result<()> {
        if let Some(dir) = self.dir {
            settings.region_dir = dir;
        }
        if let Some(path) = self.backup_file {
            settings.backup_file = path;
        }
        if let Some(table) = self.fence_table {
            settings.tables.fence = table.parse()?;
        }
        if let Some(table) = self.adcode_table {
            settings.tables.adcode = table.parse()?;
        }
        if let Some(jobs) = self.jobs {
            settings.export.jobs = jobs;
        }
        if let Some(srid) = self.srid {
            settings.srid = srid;
        }
        settings.normalize()?;
        Ok(())
    }
}

/// Exécute une sous-commande
pub async fn run(command: Commands, settings: &Settings) -> Result<()> {
    // Sans base de données
    if matches!(command, Commands::Clean | Commands::Usage) {
        return Ok(());
    }

    let store = connect(settings).await?;
    let dir = RegionDir::new(&settings.region_dir);
    let lifecycle = Lifecycle::new(&store, LoadEngine::new(&store, dir.clone()));
    let fence = &settings.tables.fence;

    match command {
        Commands::Create => {
            lifecycle.create().await?;
            println!("Created {}", fence);
        }
        Commands::Index => {
            lifecycle.index().await?;
            println!("Indexed {}", fence);
        }
        Commands::Order => {
            let rows = lifecycle.reorder().await?;
            println!("Reordered {} ({} rows)", settings.tables.adcode, rows);
        }
        Commands::Drop => {
            lifecycle.drop_table().await?;
            println!("Dropped {}", fence);
        }
        Commands::Trunc => {
            lifecycle.truncate().await?;
            println!("Truncated {}", fence);
        }
        Commands::Dump { codes, report } => {
            let engine = ExportEngine::new(&store, dir, settings.export);
            cmd_dump(&engine, &codes, report.as_deref()).await?;
        }
        Commands::Load { codes } => {
            let report = lifecycle.load(&codes).await?;
            println!("{}", report.summary());
        }
        Commands::Backup => {
            let path = coordinator(&store, settings)
                .backup(&settings.backup_file)
                .await?;
            println!("Backup written to {}", path.display());
        }
        Commands::Restore => {
            coordinator(&store, settings)
                .restore(&settings.backup_file)
                .await?;
            println!("Restored {} from {}", fence, settings.backup_file.display());
        }
        Commands::Check => {
            let report = print_check(lifecycle.check().await)?;
            info!(rows = report.rows, "Fence table is consistent");
        }
        Commands::Reload => {
            let (loaded, checked) = lifecycle.reload().await?;
            println!("{}", loaded.summary());
            println!("{}", checked.summary());
        }
        Commands::Reset => {
            lifecycle.reset().await?;
            println!("Reset {}", fence);
        }
        Commands::Setup => {
            let report = lifecycle.setup().await?;
            println!("{}", report.summary());
            println!("Setup of {} complete", fence);
        }
        Commands::Clean | Commands::Usage => {}
    }

    Ok(())
}

/// Connecte le pool et vérifie la base
async fn connect(settings: &Settings) -> Result<PgFenceStore> {
    println!("Database: {}", settings.database.describe());
    let pool = create_pool(&settings.database).await?;
    test_connection(&pool)
        .await
        .context("Storage unavailable")?;
    Ok(PgFenceStore::new(
        pool,
        settings.tables.clone(),
        settings.srid,
    ))
}

fn coordinator<'a>(
    store: &'a PgFenceStore,
    settings: &'a Settings,
) -> BackupCoordinator<'a, PgFenceStore> {
    BackupCoordinator::new(
        store,
        &settings.database,
        &settings.tables.fence,
        &settings.tools,
    )
}

/// Exécute la commande dump et affiche le rapport, même en échec partiel
async fn cmd_dump(
    engine: &ExportEngine<'_, PgFenceStore>,
    codes: &[Adcode],
    report_path: Option<&Path>,
) -> Result<()> {
    let (report, failed): (Box<ExportReport>, bool) = match engine.export(codes).await {
        Ok(report) => (Box::new(report), false),
        Err(FenceError::PartialExportFailure(report)) => (report, true),
        Err(e) => return Err(e.into()),
    };

    report.display();
    if let Some(path) = report_path {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if failed {
        return Err(anyhow!(
            "{} of {} regions failed to export",
            report.failures.len(),
            report.requested
        ));
    }
    Ok(())
}

/// Affiche le rapport de contrôle, qu'il soit propre ou non
fn print_check(
    result: Result<fence_pg::CheckReport, FenceError>,
) -> Result<fence_pg::CheckReport> {
    match result {
        Ok(report) => {
            println!("{}", report.summary());
            Ok(report)
        }
        Err(FenceError::CheckFailed(report)) => {
            println!("{}", report.summary());
            if !report.orphan_adcodes.is_empty() {
                let sample: Vec<String> = report
                    .orphan_adcodes
                    .iter()
                    .take(20)
                    .map(|c| c.to_string())
                    .collect();
                println!("Orphan adcodes: {}", sample.join(", "));
            }
            Err(FenceError::CheckFailed(report).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Supprime les fichiers de région
pub async fn cmd_clean(dir: &Path) -> Result<()> {
    let region_dir = RegionDir::new(dir);
    let removed = tokio::task::spawn_blocking(move || region_dir.clean()).await??;
    println!("Removed {} region files from {}", removed, dir.display());
    Ok(())
}
