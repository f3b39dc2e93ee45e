//! Résolution des codes: adcode (6 chiffres) <-> clé de clôture (12 chiffres)
//!
//! Seul endroit où la convention `clé = adcode * 1_000_000` est définie.
//! Toute conversion entre fichiers de région et stockage passe par ces types.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::CodeError;

/// Multiplicateur entre un adcode et sa clé de clôture
pub const KEY_MULTIPLIER: i64 = 1_000_000;

/// Extension des fichiers de région
pub const REGION_EXTENSION: &str = "json";

fn adcode_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[1-9][0-9]{5}$").expect("valid adcode regex"))
}

fn fence_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[1-9][0-9]{11}$").expect("valid fence key regex"))
}

/// Code administratif à 6 chiffres (100000..=999999)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Adcode(u32);

impl Adcode {
    pub const MIN: u32 = 100_000;
    pub const MAX: u32 = 999_999;

    /// Valide un entier comme adcode
    ///
    /// # Errors
    /// `InvalidCodeFormat` si la valeur n'a pas exactement 6 chiffres
    pub fn new(value: u32) -> Result<Self, CodeError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CodeError::invalid(value.to_string()))
        }
    }

    /// Valeur brute
    pub fn get(self) -> u32 {
        self.0
    }

    /// Clé de clôture correspondante (`adcode * 1_000_000`)
    pub fn fence_key(self) -> FenceKey {
        FenceKey(i64::from(self.0) * KEY_MULTIPLIER)
    }

    /// Nom du fichier de région: `<adcode>.json`
    pub fn file_name(self) -> String {
        format!("{}.{}", self.0, REGION_EXTENSION)
    }

    /// Inverse de [`Adcode::file_name`]. `None` si le nom n'est pas celui d'un fichier de région.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(REGION_EXTENSION)?.strip_suffix('.')?;
        stem.parse().ok()
    }
}

impl FromStr for Adcode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !adcode_pattern().is_match(s) {
            return Err(CodeError::invalid(s));
        }
        let value: u32 = s.parse().map_err(|_| CodeError::invalid(s))?;
        Self::new(value)
    }
}

impl TryFrom<i32> for Adcode {
    type Error = CodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let value = u32::try_from(value).map_err(|_| CodeError::invalid(value.to_string()))?;
        Self::new(value)
    }
}

impl From<Adcode> for i32 {
    fn from(code: Adcode) -> Self {
        // 999_999 < i32::MAX
        code.0 as i32
    }
}

impl fmt::Display for Adcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clé primaire de la table des clôtures (12 chiffres)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FenceKey(i64);

impl FenceKey {
    pub const MIN: i64 = 100_000_000_000;
    pub const MAX: i64 = 999_999_999_999;

    /// Valide un entier comme clé de clôture
    ///
    /// # Errors
    /// `InvalidCodeFormat` si la valeur n'a pas exactement 12 chiffres
    pub fn new(value: i64) -> Result<Self, CodeError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CodeError::invalid(value.to_string()))
        }
    }

    /// Valeur brute
    pub fn get(self) -> i64 {
        self.0
    }

    /// Adcode par division entière
    pub fn adcode(self) -> Adcode {
        // MIN / 1e6 = 100_000 et MAX / 1e6 = 999_999: toujours dans l'intervalle
        Adcode((self.0 / KEY_MULTIPLIER) as u32)
    }

    /// Vrai pour les clôtures de niveau district ou plus grossier
    pub fn is_aggregate(self) -> bool {
        self.0 % KEY_MULTIPLIER == 0
    }
}

impl FromStr for FenceKey {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !fence_key_pattern().is_match(s) {
            return Err(CodeError::invalid(s));
        }
        let value: i64 = s.parse().map_err(|_| CodeError::invalid(s))?;
        Self::new(value)
    }
}

impl From<Adcode> for FenceKey {
    fn from(code: Adcode) -> Self {
        code.fence_key()
    }
}

impl fmt::Display for FenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse une liste de codes (arguments CLI) en adcodes validés
///
/// # Errors
/// Échoue sur le premier code mal formé, avant toute I/O
pub fn parse_codes<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Adcode>, CodeError> {
    raw.iter().map(|s| s.as_ref().trim().parse()).collect()
}

/// Trie et supprime les doublons
pub fn dedup_codes(codes: &[Adcode]) -> Vec<Adcode> {
    let mut codes = codes.to_vec();
    codes.sort_unstable();
    codes.dedup();
    codes
}
