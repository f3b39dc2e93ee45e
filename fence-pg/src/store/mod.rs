//! Accès au stockage des clôtures
//!
//! Deux traits séparent le plan de données (lecture / upsert) du plan de
//! cycle de vie (DDL, maintenance). `postgres::PgFenceStore` implémente les deux.

pub mod pool;
pub mod postgres;

use std::collections::BTreeMap;

use adcode::{Adcode, FenceKey};
use async_trait::async_trait;

use crate::report::CheckReport;
use crate::FenceError;

pub use postgres::PgFenceStore;

/// Une ligne de la table des clôtures, géométrie encore opaque (texte GeoJSON)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceRow {
    pub key: FenceKey,
    pub adcode: Adcode,
    pub geojson: String,
}

/// Lignes d'un upsert groupé, une seule par code.
///
/// Les clés sont toujours dérivées de l'adcode: aucune ligne ne peut violer
/// `code = adcode * 1_000_000`.
#[derive(Debug, Clone, Default)]
pub struct LoadBatch {
    payloads: BTreeMap<Adcode, String>,
}

impl LoadBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute (ou remplace) la géométrie d'un code
    pub fn insert(&mut self, code: Adcode, geojson: String) {
        self.payloads.insert(code, geojson);
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = Adcode> + '_ {
        self.payloads.keys().copied()
    }

    /// Lignes triées par code
    pub fn rows(&self) -> impl Iterator<Item = FenceRow> + '_ {
        self.payloads.iter().map(|(&code, geojson)| FenceRow {
            key: code.fence_key(),
            adcode: code,
            geojson: geojson.clone(),
        })
    }
}

impl FromIterator<(Adcode, String)> for LoadBatch {
    fn from_iter<I: IntoIterator<Item = (Adcode, String)>>(iter: I) -> Self {
        Self {
            payloads: iter.into_iter().collect(),
        }
    }
}

/// Plan de données: lecture des clôtures et upsert groupé
#[async_trait]
pub trait FenceStore: Send + Sync {
    /// Adcodes des clôtures agrégées (clé multiple de 1 000 000), triés
    async fn aggregate_codes(&self) -> Result<Vec<Adcode>, FenceError>;

    /// Géométrie d'une clôture sérialisée en GeoJSON, `None` si absente
    async fn fetch_geojson(&self, key: FenceKey) -> Result<Option<String>, FenceError>;

    /// Applique le batch en une seule transaction: tout ou rien.
    /// Retourne le nombre de lignes insérées ou mises à jour.
    async fn upsert_batch(&self, batch: &LoadBatch) -> Result<u64, FenceError>;
}

/// Plan de cycle de vie: DDL et maintenance
#[async_trait]
pub trait FenceSchema: Send + Sync {
    /// Supprime puis recrée la table des clôtures (vide)
    async fn create_table(&self) -> Result<(), FenceError>;

    /// Index texte sur `code`, index sur `adcode`, index spatial sur `geometry`
    async fn create_indexes(&self) -> Result<(), FenceError>;

    async fn drop_table(&self) -> Result<(), FenceError>;

    async fn truncate_table(&self) -> Result<(), FenceError>;

    /// Réécrit la table des codes administratifs triée par `(rank, code)`.
    /// Retourne le nombre de lignes réécrites.
    async fn reorder_adcodes(&self) -> Result<u64, FenceError>;

    /// Contrôle de cohérence de la table des clôtures
    async fn check_table(&self) -> Result<CheckReport, FenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(value: u32) -> Adcode {
        Adcode::new(value).unwrap()
    }

    #[test]
    fn test_batch_rows_respect_key_invariant() {
        let batch: LoadBatch = [
            (code(120_000), "g2".to_string()),
            (code(110_000), "g1".to_string()),
        ]
        .into_iter()
        .collect();

        let rows: Vec<FenceRow> = batch.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key.get(), 110_000_000_000);
        assert_eq!(rows[0].adcode, code(110_000));
        assert_eq!(rows[0].geojson, "g1");
        for row in &rows {
            assert_eq!(row.key, row.adcode.fence_key());
        }
    }

    #[test]
    fn test_batch_one_row_per_code() {
        let mut batch = LoadBatch::new();
        batch.insert(code(110_000), "old".into());
        batch.insert(code(110_000), "new".into());

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows().next().unwrap().geojson, "new");
    }
}
