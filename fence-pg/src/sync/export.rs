//! Export des clôtures vers les fichiers de région
//!
//! Une unité de travail par région: lecture de la géométrie, écriture de
//! `<adcode>.json`. Les unités sont indépendantes et tournent en parallèle,
//! bornées par la largeur du pool.

use std::time::Instant;

use adcode::{dedup_codes, Adcode, RegionDir};
use futures::stream::{self, StreamExt};
use geojson::{Geometry, Value};
use tracing::{debug, info, warn};

use crate::report::ExportReport;
use crate::store::FenceStore;
use crate::FenceError;

/// Largeur par défaut d'un export complet
pub const DEFAULT_EXPORT_JOBS: usize = 16;

/// Largeur d'un export partiel (liste explicite, souvent courte et interactive)
pub const PARTIAL_EXPORT_JOBS: usize = 4;

/// Paramètres de parallélisme de l'export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportConfig {
    /// Workers pour un export complet
    pub jobs: usize,
    /// Workers pour un export partiel
    pub partial_jobs: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_EXPORT_JOBS,
            partial_jobs: PARTIAL_EXPORT_JOBS,
        }
    }
}

/// Moteur d'export: stockage -> répertoire de région
pub struct ExportEngine<'a, S: ?Sized> {
    store: &'a S,
    dir: RegionDir,
    config: ExportConfig,
}

impl<'a, S: FenceStore + ?Sized> ExportEngine<'a, S> {
    pub fn new(store: &'a S, dir: RegionDir, config: ExportConfig) -> Self {
        Self { store, dir, config }
    }

    /// Exporte les régions demandées, ou toutes les clôtures agrégées si `codes` est vide.
    ///
    /// L'export complet vide et recrée le répertoire; l'export partiel ne touche
    /// qu'aux fichiers des codes donnés.
    ///
    /// # Errors
    /// `PartialExportFailure` si au moins une région a échoué (les autres
    /// fichiers sont conservés); erreur de stockage ou d'I/O si l'énumération
    /// ou la préparation du répertoire échoue, avant tout worker.
    pub async fn export(&self, codes: &[Adcode]) -> Result<ExportReport, FenceError> {
        let started_at = Instant::now();

        let (targets, jobs, cleared) = if codes.is_empty() {
            let targets = self.store.aggregate_codes().await?;
            let dir = self.dir.clone();
            tokio::task::spawn_blocking(move || dir.reset()).await??;
            (targets, self.config.jobs, true)
        } else {
            let dir = self.dir.clone();
            tokio::task::spawn_blocking(move || dir.ensure()).await??;
            (dedup_codes(codes), self.config.partial_jobs, false)
        };
        let jobs = jobs.max(1);

        info!(
            dir = %self.dir.path().display(),
            regions = targets.len(),
            jobs = jobs,
            full = cleared,
            "Starting fence export"
        );

        let outcomes: Vec<(Adcode, Result<(), FenceError>)> = stream::iter(targets.iter().copied())
            .map(|code| async move { (code, self.export_one(code).await) })
            .buffer_unordered(jobs)
            .collect()
            .await;

        let mut report = ExportReport::new(targets.len(), jobs, cleared);
        for (code, outcome) in outcomes {
            match outcome {
                Ok(()) => report.record_written(code),
                Err(e) => {
                    warn!(code = %code, error = %e, "Region export failed");
                    report.record_failure(code, e.to_string());
                }
            }
        }
        report.finalize(started_at.elapsed());

        if report.has_failures() {
            warn!("{}", report.summary());
            return Err(FenceError::PartialExportFailure(Box::new(report)));
        }

        info!("{}", report.summary());
        Ok(report)
    }

    /// Unité de travail: une région
    async fn export_one(&self, code: Adcode) -> Result<(), FenceError> {
        let raw = self
            .store
            .fetch_geojson(code.fence_key())
            .await?
            .ok_or(FenceError::MissingFence(code))?;

        let contents = normalize_geometry(code, &raw)?;

        let dir = self.dir.clone();
        let path = tokio::task::spawn_blocking(move || dir.write(code, &contents)).await??;

        debug!(code = %code, path = %path.display(), "Region exported");
        Ok(())
    }
}

/// Vérifie que la base a renvoyé un Polygon / MultiPolygon GeoJSON
/// et le resérialise sous forme compacte.
pub fn normalize_geometry(code: Adcode, raw: &str) -> Result<String, FenceError> {
    let geometry: Geometry =
        serde_json::from_str(raw).map_err(|e| FenceError::UnexpectedGeometry {
            code,
            reason: e.to_string(),
        })?;

    match &geometry.value {
        Value::Polygon(_) | Value::MultiPolygon(_) => {}
        other => {
            return Err(FenceError::UnexpectedGeometry {
                code,
                reason: format!("expected Polygon or MultiPolygon, got {}", kind_name(other)),
            })
        }
    }

    Ok(serde_json::to_string(&geometry)?)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}
