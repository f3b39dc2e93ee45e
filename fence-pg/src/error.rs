//! Taxonomie des erreurs du moteur de synchronisation

use std::path::PathBuf;

use adcode::{Adcode, CodeError};
use thiserror::Error;

use crate::lifecycle::Step;
use crate::report::{CheckReport, ExportReport};

/// Erreur boxée d'un backend de stockage (pool, connexion, protocole)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Erreurs du moteur de synchronisation des clôtures
#[derive(Debug, Error)]
pub enum FenceError {
    /// Code mal formé, fichier de région absent ou illisible
    #[error(transparent)]
    Code(#[from] CodeError),

    /// Échec de connexion ou de protocole avec la base: fatal, pas de retry
    #[error("Storage unavailable ({context}): {source}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Une ou plusieurs régions n'ont pas pu être exportées.
    /// Les fichiers des régions réussies sont conservés.
    #[error(
        "Export failed for {} of {} regions",
        .0.failures.len(),
        .0.requested
    )]
    PartialExportFailure(Box<ExportReport>),

    /// L'upsert groupé a été rejeté: la table est inchangée
    #[error("Load batch of {rows} rows rejected: {source}")]
    LoadBatchFailure {
        rows: usize,
        #[source]
        source: BoxError,
    },

    /// Une séquence composite a échoué à l'étape `step`, sans rollback des étapes précédentes
    #[error("Sequence failed at step '{step}': {source}")]
    LifecycleSequenceFailure {
        step: Step,
        #[source]
        source: Box<FenceError>,
    },

    /// Aucune clôture stockée pour ce code
    #[error("No fence stored for {0}")]
    MissingFence(Adcode),

    /// La base a renvoyé autre chose qu'un Polygon / MultiPolygon GeoJSON
    #[error("Unexpected geometry for {code}: {reason}")]
    UnexpectedGeometry { code: Adcode, reason: String },

    /// Le contrôle de cohérence de la table a trouvé des violations
    #[error("Fence table check failed: {}", .0.summary())]
    CheckFailed(Box<CheckReport>),

    /// Artefact de sauvegarde introuvable
    #[error("Backup artifact not found: {}", .0.display())]
    MissingBackup(PathBuf),

    /// Outil externe (pg_dump / pg_restore) en échec
    #[error("{tool} failed ({status}): {stderr}")]
    ExternalTool {
        tool: String,
        status: String,
        stderr: String,
    },

    /// Configuration invalide
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tâche bloquante interrompue (panic ou annulation)
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl FenceError {
    /// Erreur de stockage avec contexte
    pub fn storage(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::StorageUnavailable {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Rejet d'un batch d'upsert
    pub fn load_batch(rows: usize, source: impl Into<BoxError>) -> Self {
        Self::LoadBatchFailure {
            rows,
            source: source.into(),
        }
    }

    /// Échec d'une étape de séquence composite
    pub fn at_step(step: Step, source: FenceError) -> Self {
        Self::LifecycleSequenceFailure {
            step,
            source: Box::new(source),
        }
    }

    /// Étape en échec si l'erreur provient d'une séquence composite
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            Self::LifecycleSequenceFailure { step, .. } => Some(*step),
            _ => None,
        }
    }
}
