//! First-author gender inference boundary.
//!
//! The detector itself is an external dependency: a lookup from a bare
//! given-name fragment to one of six labels. It is injected as a trait so
//! the normalization stage can be exercised without the real dictionary.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// The detector's taxonomy. `Andy` denotes an androgynous/ambiguous name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    MostlyMale,
    MostlyFemale,
    Unknown,
    Andy,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::MostlyMale => "mostly_male",
            Gender::MostlyFemale => "mostly_female",
            Gender::Unknown => "unknown",
            Gender::Andy => "andy",
        }
    }

    pub fn parse_label(label: &str) -> Option<Gender> {
        match label {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "mostly_male" => Some(Gender::MostlyMale),
            "mostly_female" => Some(Gender::MostlyFemale),
            "unknown" => Some(Gender::Unknown),
            "andy" => Some(Gender::Andy),
            _ => None,
        }
    }

    /// Fold the `mostly_*` labels into their base category.
    pub fn folded(self) -> Gender {
        match self {
            Gender::MostlyMale => Gender::Male,
            Gender::MostlyFemale => Gender::Female,
            g => g,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait GenderDetector {
    /// Guess from a bare given-name fragment (no spaces).
    fn guess(&self, given_name: &str) -> Gender;
}

/// Detector backed by a two-column `name<TAB>label` dictionary file.
/// Lookups are case-insensitive.
pub struct NameListDetector {
    names: HashMap<String, Gender>,
}

impl NameListDetector {
    /// An empty dictionary: every lookup is `unknown`.
    pub fn empty() -> Self {
        Self {
            names: HashMap::new(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut names = HashMap::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, label)) = line.split_once('\t') else {
                warn!(path = %path.display(), lineno = lineno + 1, "skipping malformed dictionary line");
                continue;
            };
            let Some(gender) = Gender::parse_label(label.trim()) else {
                warn!(path = %path.display(), lineno = lineno + 1, label, "unknown gender label");
                continue;
            };
            names.insert(name.trim().to_lowercase(), gender);
        }
        Ok(Self { names })
    }
}

impl GenderDetector for NameListDetector {
    fn guess(&self, given_name: &str) -> Gender {
        self.names
            .get(&given_name.to_lowercase())
            .copied()
            .unwrap_or(Gender::Unknown)
    }
}

/// Infer the gender label for a raw author name. Only the leading token
/// (before the first space) is shown to the detector. Surname-first strings
/// (containing a comma) are not guessable from the leading token and are
/// forced to `unknown` rather than mis-parsing a surname as a given name.
pub fn infer(name: &str, detector: &dyn GenderDetector) -> Gender {
    if name.contains(',') {
        return Gender::Unknown;
    }
    let given = name.split(' ').next().unwrap_or("");
    detector.guess(given)
}

/// Deterministically resolve ambiguous rows: in input order, the first
/// `floor(n/2)` `andy` labels become `male` and the remainder `female`.
pub fn assign_andy(genders: &mut [Gender]) {
    let n = genders.iter().filter(|g| **g == Gender::Andy).count();
    let mut assigned = 0;
    for g in genders.iter_mut() {
        if *g == Gender::Andy {
            *g = if assigned < n / 2 {
                Gender::Male
            } else {
                Gender::Female
            };
            assigned += 1;
        }
    }
}
