//! Rapports d'export, de chargement et de contrôle
//!
//! Ces structures collectent les résultats des opérations pour les afficher
//! et, si besoin, les sauvegarder en JSON.

use std::path::Path;
use std::time::Duration;

use adcode::Adcode;
use anyhow::Result;
use serde::Serialize;

/// Statut global d'un export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportStatus {
    /// Toutes les régions exportées
    Success,
    /// Certaines régions en échec, les autres écrites
    PartialSuccess,
    /// Aucune région écrite
    Failed,
}

/// Échec d'une unité d'export (une région)
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub code: Adcode,
    pub message: String,
}

/// Rapport d'un export
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    /// Nombre de régions demandées (après dédoublonnage)
    pub requested: usize,
    /// Le répertoire a été vidé avant l'export (export complet)
    pub cleared: bool,
    /// Largeur du pool de workers
    pub jobs: usize,
    /// Régions écrites
    pub written: Vec<Adcode>,
    /// Régions en échec
    pub failures: Vec<UnitFailure>,
    pub duration_secs: f64,
    pub status: ExportStatus,
}

impl ExportReport {
    pub fn new(requested: usize, jobs: usize, cleared: bool) -> Self {
        Self {
            requested,
            cleared,
            jobs,
            written: Vec::with_capacity(requested),
            failures: Vec::new(),
            duration_secs: 0.0,
            status: ExportStatus::Success,
        }
    }

    /// Enregistre une région écrite
    pub fn record_written(&mut self, code: Adcode) {
        self.written.push(code);
    }

    /// Enregistre une région en échec
    pub fn record_failure(&mut self, code: Adcode, message: impl Into<String>) {
        self.failures.push(UnitFailure {
            code,
            message: message.into(),
        });
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Trie les résultats et détermine le statut final
    pub fn finalize(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
        self.written.sort_unstable();
        self.failures.sort_by_key(|f| f.code);

        self.status = match (self.written.is_empty(), self.failures.is_empty()) {
            (_, true) => ExportStatus::Success,
            (false, false) => ExportStatus::PartialSuccess,
            (true, false) => ExportStatus::Failed,
        };
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("{}", self.summary());
        if !self.failures.is_empty() {
            println!("--- FAILURES ({}) ---", self.failures.len());
            for f in self.failures.iter().take(20) {
                println!("  [{}] {}", f.code, f.message);
            }
            if self.failures.len() > 20 {
                println!("  ... and {} more", self.failures.len() - 20);
            }
        }
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact
    pub fn summary(&self) -> String {
        format!(
            "export {:?}: {}/{} regions written, {} failed, {} jobs{} in {:.2}s",
            self.status,
            self.written.len(),
            self.requested,
            self.failures.len(),
            self.jobs,
            if self.cleared { ", directory refreshed" } else { "" },
            self.duration_secs
        )
    }
}

/// Rapport d'un chargement
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Lignes envoyées dans le batch
    pub rows: usize,
    /// Lignes insérées ou mises à jour d'après la base
    pub upserted: u64,
    pub duration_secs: f64,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        format!(
            "load: {} rows sent, {} upserted in {:.2}s",
            self.rows, self.upserted, self.duration_secs
        )
    }
}

/// Rapport de contrôle de la table des clôtures
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    /// Nombre total de lignes
    pub rows: u64,
    /// Lignes où `code <> adcode * 1_000_000`
    pub bad_keys: u64,
    /// Géométries invalides (`ST_IsValid`)
    pub invalid_geometries: u64,
    /// Adcodes absents de la table des codes administratifs
    pub orphan_adcodes: Vec<Adcode>,
    /// La table des codes administratifs existait et a été consultée
    pub reference_checked: bool,
}

impl CheckReport {
    /// Aucune violation détectée
    pub fn is_clean(&self) -> bool {
        self.bad_keys == 0 && self.invalid_geometries == 0 && self.orphan_adcodes.is_empty()
    }

    pub fn summary(&self) -> String {
        let reference = if self.reference_checked {
            format!("{} orphan adcodes", self.orphan_adcodes.len())
        } else {
            "reference table not checked".to_string()
        };
        format!(
            "check: {} rows, {} bad keys, {} invalid geometries, {}",
            self.rows, self.bad_keys, self.invalid_geometries, reference
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(value: u32) -> Adcode {
        Adcode::new(value).unwrap()
    }

    #[test]
    fn test_finalize_success() {
        let mut report = ExportReport::new(2, 16, true);
        report.record_written(code(120_000));
        report.record_written(code(110_000));
        report.finalize(Duration::from_millis(10));

        assert_eq!(report.status, ExportStatus::Success);
        assert_eq!(report.written, vec![code(110_000), code(120_000)]);
    }

    #[test]
    fn test_finalize_partial_success() {
        let mut report = ExportReport::new(2, 4, false);
        report.record_written(code(110_000));
        report.record_failure(code(120_000), "fetch failed");
        report.finalize(Duration::ZERO);

        assert!(report.has_failures());
        assert_eq!(report.status, ExportStatus::PartialSuccess);
    }

    #[test]
    fn test_finalize_failed() {
        let mut report = ExportReport::new(1, 4, false);
        report.record_failure(code(120_000), "fetch failed");
        report.finalize(Duration::ZERO);

        assert_eq!(report.status, ExportStatus::Failed);
    }

    #[test]
    fn test_export_summary() {
        let mut report = ExportReport::new(3, 16, true);
        report.record_written(code(110_000));
        report.finalize(Duration::ZERO);
        let summary = report.summary();
        assert!(summary.contains("1/3 regions written"));
        assert!(summary.contains("directory refreshed"));
    }

    #[test]
    fn test_check_report_clean() {
        let mut report = CheckReport {
            rows: 10,
            reference_checked: true,
            ..Default::default()
        };
        assert!(report.is_clean());

        report.orphan_adcodes.push(code(990_000));
        assert!(!report.is_clean());
        assert!(report.summary().contains("1 orphan adcodes"));
    }

    #[test]
    fn test_save_to_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("export.json");
        let mut report = ExportReport::new(1, 4, false);
        report.record_written(code(110_000));
        report.finalize(Duration::ZERO);
        report.save_to_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("110000"));
        assert!(content.contains("Success"));
    }
}
