//! Access verification against the plate registry

use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, info};

use super::normalize::{collapse_zero_letter_o, normalize_plate, NormalizedPlate};
use super::similarity::similarity;
use crate::storage::registry::{PlateRegistry, RegistryEntry, RegistryError};

/// Default minimum similarity for a registry match
pub const DEFAULT_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Copy, Error)]
#[error("similarity threshold {0} is outside 0..=100")]
pub struct InvalidThreshold(pub f64);

/// One registry entry that scored at or above the threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Plate as stored in the registry
    pub plate: String,
    /// Similarity to the normalized input, 0-100
    pub similarity: f64,
    /// Owner display name ("last first patronymic")
    pub owner: String,
}

/// Outcome of one verification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    /// Raw recognized text, `None` when no plate was found
    pub input: Option<String>,
    /// Normalized form of the input (empty when no plate was found)
    pub normalized: NormalizedPlate,
    /// Matches in descending similarity, registry order on ties
    pub matches: Vec<MatchResult>,
    pub access_granted: bool,
}

impl Verdict {
    fn no_plate() -> Self {
        Self {
            input: None,
            normalized: NormalizedPlate::default(),
            matches: Vec::new(),
            access_granted: false,
        }
    }

    /// Best-scoring match, if any
    pub fn best_match(&self) -> Option<&MatchResult> {
        self.matches.first()
    }
}

/// Scores normalized input against every registry entry.
#[derive(Debug, Clone)]
pub struct VerificationEngine {
    threshold: f64,
    fold_zero_letter_o: bool,
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            fold_zero_letter_o: true,
        }
    }
}

impl VerificationEngine {
    pub fn new(threshold: f64) -> Result<Self, InvalidThreshold> {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(InvalidThreshold(threshold));
        }
        Ok(Self {
            threshold,
            ..Self::default()
        })
    }

    /// Compare with 0 and О treated as the same symbol on both sides.
    ///
    /// Disabling this compares the remapped input against stored plates
    /// verbatim, so a registry "О" never matches an input read as "О".
    pub fn with_zero_letter_o_folding(mut self, enabled: bool) -> Self {
        self.fold_zero_letter_o = enabled;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Verify raw text against the registry.
    ///
    /// An absent input returns an empty verdict without reading the registry.
    /// A failed registry read is returned as an error, never as a denial.
    pub fn verify<R>(&self, raw: Option<&str>, registry: &R) -> Result<Verdict, RegistryError>
    where
        R: PlateRegistry + ?Sized,
    {
        let Some(raw) = raw else {
            debug!("No plate text, skipping registry lookup");
            return Ok(Verdict::no_plate());
        };

        let entries = registry.list_all()?;
        Ok(self.verify_snapshot(Some(raw), &entries))
    }

    /// Verify raw text against an already loaded registry snapshot
    pub fn verify_snapshot(&self, raw: Option<&str>, entries: &[RegistryEntry]) -> Verdict {
        let Some(raw) = raw else {
            return Verdict::no_plate();
        };

        let normalized = normalize_plate(raw);
        let key = self.comparison_key(normalized.as_str());

        let mut matches: Vec<MatchResult> = entries
            .iter()
            .filter_map(|entry| {
                let score = similarity(&key, &self.comparison_key(&entry.plate));
                (score >= self.threshold).then(|| MatchResult {
                    plate: entry.plate.clone(),
                    similarity: score,
                    owner: entry.owner_display(),
                })
            })
            .collect();

        // Stable: equal scores keep registry order
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });

        let access_granted = !matches.is_empty();
        info!(
            "Verified '{}' as '{}': {} match(es) at >= {:.1}, access {}",
            raw.trim(),
            normalized,
            matches.len(),
            self.threshold,
            if access_granted { "granted" } else { "denied" }
        );

        Verdict {
            input: Some(raw.to_string()),
            normalized,
            matches,
            access_granted,
        }
    }

    fn comparison_key(&self, text: &str) -> String {
        if self.fold_zero_letter_o {
            collapse_zero_letter_o(text)
        } else {
            text.to_string()
        }
    }
}
