//! Chargement des fichiers de région dans la table des clôtures
//!
//! Tous les fichiers sont lus puis appliqués en un seul upsert atomique:
//! après un chargement, la table est soit inchangée, soit à jour pour
//! l'ensemble des codes. Le chargement n'est jamais découpé par code.

use std::time::Instant;

use adcode::{dedup_codes, Adcode, CodeError, RegionDir};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::report::LoadReport;
use crate::store::{FenceStore, LoadBatch};
use crate::FenceError;

/// Moteur de chargement: répertoire de région -> stockage
pub struct LoadEngine<'a, S: ?Sized> {
    store: &'a S,
    dir: RegionDir,
}

impl<'a, S: FenceStore + ?Sized> LoadEngine<'a, S> {
    pub fn new(store: &'a S, dir: RegionDir) -> Self {
        Self { store, dir }
    }

    pub fn dir(&self) -> &RegionDir {
        &self.dir
    }

    /// Charge les codes donnés, ou tous les fichiers du répertoire si `codes` est vide.
    ///
    /// # Errors
    /// `MissingRegionFile` / I/O si un fichier manque (aucun appel au stockage),
    /// `LoadBatchFailure` si l'upsert est rejeté (table inchangée).
    pub async fn load(&self, codes: &[Adcode]) -> Result<LoadReport, FenceError> {
        let started_at = Instant::now();

        let codes = if codes.is_empty() {
            let dir = self.dir.clone();
            tokio::task::spawn_blocking(move || dir.list()).await??
        } else {
            dedup_codes(codes)
        };

        if codes.is_empty() {
            info!(dir = %self.dir.path().display(), "No region files to load");
            return Ok(LoadReport::default());
        }

        let dir = self.dir.clone();
        let batch = tokio::task::spawn_blocking(move || read_batch(&dir, &codes)).await??;
        let rows = batch.len();

        info!(dir = %self.dir.path().display(), rows = rows, "Upserting fence batch");
        let upserted = self.store.upsert_batch(&batch).await?;

        let report = LoadReport {
            rows,
            upserted,
            duration_secs: started_at.elapsed().as_secs_f64(),
        };
        info!("{}", report.summary());
        Ok(report)
    }
}

/// Lit les fichiers de région en parallèle et construit le batch.
/// La géométrie est passée telle quelle, sans parsing.
pub fn read_batch(dir: &RegionDir, codes: &[Adcode]) -> Result<LoadBatch, CodeError> {
    let payloads = codes
        .par_iter()
        .map(|&code| dir.read(code).map(|geojson| (code, geojson)))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        files = payloads.len(),
        bytes = payloads.iter().map(|(_, g)| g.len()).sum::<usize>(),
        "Region files read"
    );
    Ok(payloads.into_iter().collect())
}
