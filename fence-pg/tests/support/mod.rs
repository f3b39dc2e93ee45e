//! Stockage en mémoire pour les tests des moteurs

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use adcode::{Adcode, FenceKey, KEY_MULTIPLIER};
use async_trait::async_trait;
use fence_pg::{CheckReport, FenceError, FenceSchema, FenceStore, LoadBatch};

/// Ligne stockée: `key -> (adcode, geojson)`
type Rows = BTreeMap<i64, (u32, String)>;

/// Table de clôtures en mémoire, avec injection de pannes
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Rows>,
    failing_keys: Mutex<BTreeSet<i64>>,
    failing_op: Mutex<Option<&'static str>>,
    reference: Mutex<Option<BTreeSet<u32>>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère une ligne brute, sans contrôle de l'invariant
    pub fn insert_raw(&self, key: i64, adcode: u32, geojson: &str) {
        self.rows
            .lock()
            .unwrap()
            .insert(key, (adcode, geojson.to_string()));
    }

    pub fn fail_fetch(&self, code: Adcode) {
        self.failing_keys
            .lock()
            .unwrap()
            .insert(code.fence_key().get());
    }

    /// Fait échouer l'opération de schéma nommée
    pub fn fail_op(&self, op: &'static str) {
        *self.failing_op.lock().unwrap() = Some(op);
    }

    pub fn set_reference(&self, codes: &[u32]) {
        *self.reference.lock().unwrap() = Some(codes.iter().copied().collect());
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn snapshot(&self) -> Rows {
        self.rows.lock().unwrap().clone()
    }

    pub fn row(&self, code: Adcode) -> Option<(u32, String)> {
        self.rows
            .lock()
            .unwrap()
            .get(&code.fence_key().get())
            .cloned()
    }

    fn enter(&self, op: &'static str) -> Result<(), FenceError> {
        self.calls.lock().unwrap().push(op);
        if *self.failing_op.lock().unwrap() == Some(op) {
            return Err(FenceError::storage(op, "injected failure"));
        }
        Ok(())
    }
}

fn is_fence_geometry(raw: &str) -> bool {
    matches!(
        serde_json::from_str::<geojson::Geometry>(raw).map(|g| g.value),
        Ok(geojson::Value::Polygon(_)) | Ok(geojson::Value::MultiPolygon(_))
    )
}

#[async_trait]
impl FenceStore for MemoryStore {
    async fn aggregate_codes(&self) -> Result<Vec<Adcode>, FenceError> {
        self.enter("aggregate_codes")?;
        let rows = self.rows.lock().unwrap();
        let mut codes = Vec::new();
        for key in rows.keys().copied().filter(|k| k % KEY_MULTIPLIER == 0) {
            codes.push(FenceKey::new(key)?.adcode());
        }
        codes.dedup();
        Ok(codes)
    }

    async fn fetch_geojson(&self, key: FenceKey) -> Result<Option<String>, FenceError> {
        self.enter("fetch_geojson")?;
        if self.failing_keys.lock().unwrap().contains(&key.get()) {
            return Err(FenceError::storage(
                format!("fetch {}", key),
                "connection reset",
            ));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&key.get())
            .map(|(_, g)| g.clone()))
    }

    async fn upsert_batch(&self, batch: &LoadBatch) -> Result<u64, FenceError> {
        self.enter("upsert_batch")?;
        // Tout ou rien: on valide l'ensemble avant d'écrire
        if let Some(bad) = batch.rows().find(|row| !is_fence_geometry(&row.geojson)) {
            return Err(FenceError::load_batch(
                batch.len(),
                format!("invalid GeoJSON geometry for {}", bad.adcode),
            ));
        }

        let mut rows = self.rows.lock().unwrap();
        for row in batch.rows() {
            rows.insert(row.key.get(), (row.adcode.get(), row.geojson));
        }
        Ok(batch.len() as u64)
    }
}

#[async_trait]
impl FenceSchema for MemoryStore {
    async fn create_table(&self) -> Result<(), FenceError> {
        self.enter("create_table")?;
        self.rows.lock().unwrap().clear();
        Ok(())
    }

    async fn create_indexes(&self) -> Result<(), FenceError> {
        self.enter("create_indexes")
    }

    async fn drop_table(&self) -> Result<(), FenceError> {
        self.enter("drop_table")?;
        self.rows.lock().unwrap().clear();
        Ok(())
    }

    async fn truncate_table(&self) -> Result<(), FenceError> {
        self.enter("truncate_table")?;
        self.rows.lock().unwrap().clear();
        Ok(())
    }

    async fn reorder_adcodes(&self) -> Result<u64, FenceError> {
        self.enter("reorder_adcodes")?;
        Ok(self
            .reference
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |r| r.len() as u64))
    }

    async fn check_table(&self) -> Result<CheckReport, FenceError> {
        self.enter("check_table")?;
        let rows = self.rows.lock().unwrap();
        let reference = self.reference.lock().unwrap();

        let mut report = CheckReport {
            rows: rows.len() as u64,
            reference_checked: reference.is_some(),
            ..Default::default()
        };
        for (key, (adcode, geojson)) in rows.iter() {
            if *key != i64::from(*adcode) * KEY_MULTIPLIER {
                report.bad_keys += 1;
            }
            if !is_fence_geometry(geojson) {
                report.invalid_geometries += 1;
            }
            if let Some(known) = reference.as_ref() {
                if *key % KEY_MULTIPLIER == 0 && !known.contains(&((*key / KEY_MULTIPLIER) as u32)) {
                    report.orphan_adcodes.push(FenceKey::new(*key)?.adcode());
                }
            }
        }
        Ok(report)
    }
}

/// Polygone GeoJSON minimal, décalé de `offset`
pub fn polygon(offset: f64) -> String {
    format!(
        r#"{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y0}]]]}}"#,
        x0 = 100.0 + offset,
        x1 = 101.0 + offset,
        y0 = 30.0 + offset,
        y1 = 31.0 + offset,
    )
}

pub fn code(value: u32) -> Adcode {
    Adcode::new(value).unwrap()
}
