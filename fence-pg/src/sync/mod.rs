//! Moteurs de synchronisation (stockage <-> répertoire de région)

pub mod export;
pub mod load;

pub use export::{ExportConfig, ExportEngine};
pub use load::LoadEngine;
