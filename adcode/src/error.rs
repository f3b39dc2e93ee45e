//! Types d'erreurs pour le crate adcode

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Erreurs pouvant survenir lors de la résolution des codes ou de l'accès aux fichiers de région
#[derive(Debug, Error)]
pub enum CodeError {
    /// Code administratif ou clé de clôture mal formé
    #[error("Invalid code format: {0:?}")]
    InvalidCodeFormat(String),

    /// Fichier de région absent du répertoire
    #[error("Missing region file: {}", .0.display())]
    MissingRegionFile(PathBuf),

    /// Erreur d'I/O sur un fichier ou un répertoire de région
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CodeError {
    /// Crée une erreur de format avec la valeur rejetée
    pub fn invalid(input: impl Into<String>) -> Self {
        Self::InvalidCodeFormat(input.into())
    }

    /// Crée une erreur d'I/O rattachée à un chemin
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
