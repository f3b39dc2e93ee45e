//! Répertoire des fichiers de région (`<adcode>.json`)
//!
//! Zone de transit entre la base et le pipeline: rien ici n'est source de vérité.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::{Adcode, CodeError};

/// Répertoire contenant un fichier GeoJSON par région
#[derive(Debug, Clone)]
pub struct RegionDir {
    root: PathBuf,
}

impl RegionDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Chemin du fichier de région d'un code
    pub fn file_path(&self, code: Adcode) -> PathBuf {
        self.root.join(code.file_name())
    }

    /// Liste les codes présents, triés et sans doublon.
    /// Les fichiers qui ne sont pas des fichiers de région sont ignorés.
    pub fn list(&self) -> Result<Vec<Adcode>, CodeError> {
        let entries = fs::read_dir(&self.root).map_err(|e| CodeError::io(&self.root, e))?;

        let mut codes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CodeError::io(&self.root, e))?;
            let name = entry.file_name();
            match name.to_str().and_then(Adcode::from_file_name) {
                Some(code) => codes.push(code),
                None => trace!(file = ?name, "Skipping non-region file"),
            }
        }

        codes.sort_unstable();
        codes.dedup();
        Ok(codes)
    }

    /// Lit le contenu brut d'un fichier de région (non parsé)
    pub fn read(&self, code: Adcode) -> Result<String, CodeError> {
        let path = self.file_path(code);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CodeError::MissingRegionFile(path.clone()),
            _ => CodeError::io(&path, e),
        })
    }

    /// Écrit un fichier de région.
    ///
    /// Écriture dans un fichier temporaire voisin puis renommage: un lecteur
    /// ne voit jamais de fichier à moitié écrit.
    pub fn write(&self, code: Adcode, contents: &str) -> Result<PathBuf, CodeError> {
        let path = self.file_path(code);
        let tmp = self.root.join(format!("{}.tmp", code.file_name()));

        fs::write(&tmp, contents).map_err(|e| CodeError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(CodeError::io(&path, e));
        }

        trace!(code = %code, path = %path.display(), bytes = contents.len(), "Region file written");
        Ok(path)
    }

    /// Crée le répertoire s'il n'existe pas
    pub fn ensure(&self) -> Result<(), CodeError> {
        fs::create_dir_all(&self.root).map_err(|e| CodeError::io(&self.root, e))
    }

    /// Supprime puis recrée le répertoire (rafraîchissement complet)
    pub fn reset(&self) -> Result<(), CodeError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(dir = %self.root.display(), "Region directory cleared"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CodeError::io(&self.root, e)),
        }
        self.ensure()
    }

    /// Supprime les fichiers de région, laisse les autres fichiers en place.
    /// Retourne le nombre de fichiers supprimés.
    pub fn clean(&self) -> Result<usize, CodeError> {
        let codes = match self.list() {
            Ok(codes) => codes,
            Err(CodeError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Ok(0)
            }
            Err(e) => return Err(e),
        };

        for &code in &codes {
            let path = self.file_path(code);
            fs::remove_file(&path).map_err(|e| CodeError::io(&path, e))?;
        }

        debug!(dir = %self.root.display(), removed = codes.len(), "Region files removed");
        Ok(codes.len())
    }
}
