//! # fence-pg
//!
//! Synchronisation bidirectionnelle entre une table PostGIS de clôtures
//! administratives et un répertoire de fichiers GeoJSON par région.
//!
//! ## Features
//!
//! - Export parallèle borné (un fichier `<adcode>.json` par région)
//! - Chargement en un seul upsert atomique et idempotent
//! - Cycle de vie de la table (create/index/drop/truncate/reorder/check)
//! - Sauvegarde / restauration via pg_dump / pg_restore
//!
//! ## Usage CLI
//!
//! ```bash
//! # Créer la table, charger data/fence/*.json, indexer
//! fence-pg setup
//!
//! # Exporter toutes les clôtures agrégées, ou seulement quelques codes
//! fence-pg dump
//! fence-pg dump 110000 120000
//!
//! # Recharger après modification des fichiers
//! fence-pg load 110000
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod report;
pub mod store;
pub mod sync;

pub use config::{Settings, TableName, Tables};
pub use error::FenceError;
pub use lifecycle::backup::BackupCoordinator;
pub use lifecycle::{Lifecycle, Step};
pub use report::{CheckReport, ExportReport, ExportStatus, LoadReport};
pub use store::pool::{create_pool, DatabaseConfig};
pub use store::{FenceRow, FenceSchema, FenceStore, LoadBatch, PgFenceStore};
pub use sync::{ExportConfig, ExportEngine, LoadEngine};
