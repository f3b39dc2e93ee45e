//! Configuration du système
//!
//! Une seule structure `Settings`, construite au démarrage et passée
//! explicitement à chaque composant.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::lifecycle::backup::DumpTools;
use crate::store::pool::DatabaseConfig;
use crate::sync::export::ExportConfig;
use crate::FenceError;

/// SRID par défaut des clôtures (WGS84)
pub const DEFAULT_SRID: i32 = 4326;

/// Répertoire de région par défaut
pub const DEFAULT_REGION_DIR: &str = "data/fence";

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:([A-Za-z_][A-Za-z0-9_]{0,62})\.)?([A-Za-z_][A-Za-z0-9_]{0,62})$")
            .expect("valid identifier regex")
    })
}

/// Nom de table SQL validé, éventuellement qualifié par un schéma.
///
/// Les identifiants ne pouvant pas être paramétrés, seuls les noms
/// `[A-Za-z_][A-Za-z0-9_]*` sont acceptés avant d'être interpolés.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    /// Nom sans schéma (sert aux noms d'index)
    pub fn bare(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Table voisine dans le même schéma, nom préfixé
    pub fn with_prefix(&self, prefix: &str) -> TableName {
        TableName {
            schema: self.schema.clone(),
            name: format!("{}{}", prefix, self.name),
        }
    }
}

impl FromStr for TableName {
    type Err = FenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = identifier_pattern()
            .captures(s)
            .ok_or_else(|| FenceError::Config(format!("Invalid table name: {:?}", s)))?;
        Ok(Self {
            schema: caps.get(1).map(|m| m.as_str().to_string()),
            name: caps[2].to_string(),
        })
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Tables gérées
#[derive(Debug, Clone)]
pub struct Tables {
    /// Table des clôtures (`code`, `adcode`, `geometry`)
    pub fence: TableName,
    /// Table des codes administratifs (`code`, `rank`, ...)
    pub adcode: TableName,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            fence: TableName {
                schema: None,
                name: "fence".into(),
            },
            adcode: TableName {
                schema: None,
                name: "adcode".into(),
            },
        }
    }
}

/// Configuration complète
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub tables: Tables,
    /// Répertoire des fichiers de région
    pub region_dir: PathBuf,
    /// Artefact de sauvegarde
    pub backup_file: PathBuf,
    /// SRID de la colonne geometry
    pub srid: i32,
    pub export: ExportConfig,
    pub tools: DumpTools,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            tables: Tables::default(),
            region_dir: PathBuf::from(DEFAULT_REGION_DIR),
            backup_file: PathBuf::from("data/fence.dump"),
            srid: DEFAULT_SRID,
            export: ExportConfig::default(),
            tools: DumpTools::default(),
        }
    }
}

impl Settings {
    /// Charge la configuration depuis les variables d'environnement
    pub fn from_env() -> Result<Self, FenceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Charge la configuration depuis une source clé/valeur quelconque
    ///
    /// # Errors
    /// `Config` si un nom de table ou une valeur numérique est invalide
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FenceError> {
        let defaults = Self::default();

        let mut settings = Self {
            database: DatabaseConfig::from_lookup(&lookup),
            tables: Tables {
                fence: parse_or(&lookup, "FENCE_TABLE", defaults.tables.fence)?,
                adcode: parse_or(&lookup, "ADCODE_TABLE", defaults.tables.adcode)?,
            },
            region_dir: region_dir_from_lookup(&lookup),
            backup_file: lookup("FENCE_BACKUP")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_file),
            srid: parse_or(&lookup, "FENCE_SRID", defaults.srid)?,
            export: ExportConfig {
                jobs: parse_or(&lookup, "EXPORT_JOBS", defaults.export.jobs)?,
                ..defaults.export
            },
            tools: DumpTools {
                pg_dump: lookup("PG_DUMP").unwrap_or(defaults.tools.pg_dump),
                pg_restore: lookup("PG_RESTORE").unwrap_or(defaults.tools.pg_restore),
            },
        };
        settings.normalize()?;
        Ok(settings)
    }

    /// Vérifie les invariants et ajuste la taille du pool à la largeur d'export
    pub fn normalize(&mut self) -> Result<(), FenceError> {
        if self.export.jobs == 0 {
            return Err(FenceError::Config("EXPORT_JOBS must be at least 1".into()));
        }
        if self.srid <= 0 {
            return Err(FenceError::Config(format!("Invalid SRID: {}", self.srid)));
        }
        self.database.pool_size = self
            .database
            .pool_size
            .max(self.export.jobs)
            .max(self.export.partial_jobs);
        Ok(())
    }
}

/// Répertoire de région seul (`FENCE_DIR`), sans valider le reste de la
/// configuration: suffit aux commandes qui ne touchent pas la base.
pub fn region_dir_from_env() -> PathBuf {
    region_dir_from_lookup(&|key: &str| std::env::var(key).ok())
}

fn region_dir_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("FENCE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REGION_DIR))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, FenceError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| FenceError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
