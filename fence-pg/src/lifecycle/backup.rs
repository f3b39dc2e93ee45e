//! Sauvegarde et restauration de la table des clôtures (pg_dump / pg_restore)

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TableName;
use crate::lifecycle::{run_step, Step};
use crate::store::pool::DatabaseConfig;
use crate::store::FenceSchema;
use crate::FenceError;

/// Binaires externes de dump / restauration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpTools {
    pub pg_dump: String,
    pub pg_restore: String,
}

impl Default for DumpTools {
    fn default() -> Self {
        Self {
            pg_dump: "pg_dump".into(),
            pg_restore: "pg_restore".into(),
        }
    }
}

/// Chaîne `--dbname=` sans mot de passe
fn dbname_arg(database: &DatabaseConfig) -> Result<OsString, FenceError> {
    let conninfo = database
        .conninfo()
        .map_err(|e| FenceError::Config(format!("Invalid PGURL: {}", e)))?;
    Ok(format!("--dbname={}", conninfo).into())
}

/// Arguments de `pg_dump`: format custom, limité à la table des clôtures
pub fn dump_args(
    database: &DatabaseConfig,
    table: &TableName,
    path: &Path,
) -> Result<Vec<OsString>, FenceError> {
    let mut file = OsString::from("--file=");
    file.push(path);
    Ok(vec![
        "--format=custom".into(),
        "--no-owner".into(),
        format!("--table={}", table).into(),
        dbname_arg(database)?,
        file,
    ])
}

/// Arguments de `pg_restore`, en une seule transaction
pub fn restore_args(database: &DatabaseConfig, path: &Path) -> Result<Vec<OsString>, FenceError> {
    Ok(vec![
        "--no-owner".into(),
        "--single-transaction".into(),
        dbname_arg(database)?,
        path.as_os_str().to_owned(),
    ])
}

/// Coordinateur de sauvegarde / restauration
pub struct BackupCoordinator<'a, S: ?Sized> {
    schema: &'a S,
    database: &'a DatabaseConfig,
    table: &'a TableName,
    tools: &'a DumpTools,
}

impl<'a, S: FenceSchema + ?Sized> BackupCoordinator<'a, S> {
    pub fn new(
        schema: &'a S,
        database: &'a DatabaseConfig,
        table: &'a TableName,
        tools: &'a DumpTools,
    ) -> Self {
        Self {
            schema,
            database,
            table,
            tools,
        }
    }

    /// Sauvegarde la table dans un artefact unique
    pub async fn backup(&self, path: &Path) -> Result<PathBuf, FenceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(table = %self.table, path = %path.display(), "Backing up fence table");
        self.run(&self.tools.pg_dump, dump_args(self.database, self.table, path)?)
            .await?;
        info!(path = %path.display(), "Backup complete");
        Ok(path.to_path_buf())
    }

    /// `restore = drop + pg_restore`
    pub async fn restore(&self, path: &Path) -> Result<(), FenceError> {
        if !tokio::fs::try_exists(path).await? {
            return Err(FenceError::MissingBackup(path.to_path_buf()));
        }

        let args = restore_args(self.database, path)?;
        run_step(Step::Drop, self.schema.drop_table()).await?;
        run_step(Step::Restore, self.run(&self.tools.pg_restore, args)).await?;

        info!(table = %self.table, path = %path.display(), "Restore complete");
        Ok(())
    }

    /// Lance un outil externe; le mot de passe passe par l'environnement
    async fn run(&self, program: &str, args: Vec<OsString>) -> Result<(), FenceError> {
        debug!(program = program, "Spawning external tool");
        let mut command = Command::new(program);
        command.args(&args).kill_on_drop(true);
        if let Some(password) = self.database.password() {
            command.env("PGPASSWORD", password);
        }

        let output = command.output().await.map_err(|e| FenceError::ExternalTool {
            tool: program.to_string(),
            status: "spawn failed".into(),
            stderr: e.to_string(),
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(FenceError::ExternalTool {
                tool: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
