//! Cycle de vie de la table des clôtures
//!
//! Primitives (create, index, drop, truncate, reorder, check) et séquences
//! composites. Une séquence s'arrête à la première étape en échec, sans
//! rollback des étapes précédentes: l'erreur identifie l'étape.

pub mod backup;

use std::fmt;
use std::future::Future;

use adcode::Adcode;
use serde::Serialize;
use tracing::info;

use crate::report::{CheckReport, LoadReport};
use crate::store::{FenceSchema, FenceStore};
use crate::sync::LoadEngine;
use crate::FenceError;

/// Étape d'une séquence composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    Drop,
    Create,
    Truncate,
    Load,
    Index,
    Check,
    Restore,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Drop => "drop",
            Step::Create => "create",
            Step::Truncate => "truncate",
            Step::Load => "load",
            Step::Index => "index",
            Step::Check => "check",
            Step::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Exécute une étape et rattache l'éventuelle erreur à cette étape
pub(crate) async fn run_step<T, F>(step: Step, fut: F) -> Result<T, FenceError>
where
    F: Future<Output = Result<T, FenceError>>,
{
    info!(step = %step, "Running step");
    fut.await.map_err(|e| FenceError::at_step(step, e))
}

/// Gestionnaire du cycle de vie de la table
pub struct Lifecycle<'a, S: ?Sized> {
    store: &'a S,
    loader: LoadEngine<'a, S>,
}

impl<'a, S: FenceStore + FenceSchema + ?Sized> Lifecycle<'a, S> {
    pub fn new(store: &'a S, loader: LoadEngine<'a, S>) -> Self {
        Self { store, loader }
    }

    pub async fn create(&self) -> Result<(), FenceError> {
        self.store.create_table().await
    }

    pub async fn index(&self) -> Result<(), FenceError> {
        self.store.create_indexes().await
    }

    pub async fn drop_table(&self) -> Result<(), FenceError> {
        self.store.drop_table().await
    }

    pub async fn truncate(&self) -> Result<(), FenceError> {
        self.store.truncate_table().await
    }

    /// Réordonne la table des codes administratifs par `(rank, code)`
    pub async fn reorder(&self) -> Result<u64, FenceError> {
        self.store.reorder_adcodes().await
    }

    pub async fn load(&self, codes: &[Adcode]) -> Result<LoadReport, FenceError> {
        self.loader.load(codes).await
    }

    /// Contrôle la table; `CheckFailed` si une violation est trouvée
    pub async fn check(&self) -> Result<CheckReport, FenceError> {
        let report = self.store.check_table().await?;
        info!("{}", report.summary());
        if report.is_clean() {
            Ok(report)
        } else {
            Err(FenceError::CheckFailed(Box::new(report)))
        }
    }

    /// `reset = drop + create`
    pub async fn reset(&self) -> Result<(), FenceError> {
        run_step(Step::Drop, self.drop_table()).await?;
        run_step(Step::Create, self.create()).await
    }

    /// `setup = create + load + index`
    pub async fn setup(&self) -> Result<LoadReport, FenceError> {
        run_step(Step::Create, self.create()).await?;
        let report = run_step(Step::Load, self.load(&[])).await?;
        run_step(Step::Index, self.index()).await?;
        Ok(report)
    }

    /// `reload = truncate + load + check`
    pub async fn reload(&self) -> Result<(LoadReport, CheckReport), FenceError> {
        run_step(Step::Truncate, self.truncate()).await?;
        let loaded = run_step(Step::Load, self.load(&[])).await?;
        let checked = run_step(Step::Check, self.check()).await?;
        Ok((loaded, checked))
    }
}
