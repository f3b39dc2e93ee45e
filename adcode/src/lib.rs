//! # adcode
//!
//! Codes administratifs à 6 chiffres et clés de clôture à 12 chiffres.
//!
//! ## Features
//!
//! - Validation des codes avant toute I/O
//! - Conversion `adcode <-> clé` (`clé = adcode * 1_000_000`)
//! - Répertoire de fichiers de région `<adcode>.json`
//!
//! ## Usage
//!
//! ```rust
//! use adcode::Adcode;
//!
//! let code: Adcode = "110000".parse().unwrap();
//! assert_eq!(code.fence_key().get(), 110_000_000_000);
//! assert_eq!(code.file_name(), "110000.json");
//! ```

pub mod code;
pub mod error;
pub mod region;

pub use code::{dedup_codes, parse_codes, Adcode, FenceKey, KEY_MULTIPLIER};
pub use error::CodeError;
pub use region::RegionDir;
