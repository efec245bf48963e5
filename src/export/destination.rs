//! Destination registry
//!
//! A destination is one output CSV file: a stable key, a file name, and the
//! ordered attribute columns that route a record into it. The registry is
//! plain configuration handed to the coordinator at construction.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::writer::TEMP_SUFFIX;

/// Stable identity of a destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationKey(String);

impl DestinationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One output target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub key: DestinationKey,
    /// Final file name inside the output directory
    #[serde(alias = "file")]
    pub filename: String,
    /// Attribute columns in output order
    #[serde(alias = "cols")]
    pub columns: Vec<String>,
}

impl Destination {
    pub fn new(key: &str, filename: &str, columns: &[&str]) -> Self {
        Self {
            key: DestinationKey::new(key),
            filename: filename.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Validated, ordered set of destinations
#[derive(Debug, Clone)]
pub struct DestinationRegistry {
    destinations: Vec<Destination>,
}

impl DestinationRegistry {
    /// Build a registry, rejecting unusable or colliding destinations
    ///
    /// # Arguments
    /// * `destinations` - Destinations in output order
    ///
    /// # Returns
    /// * `Result<Self, ConfigError>` - Registry or the first problem found
    pub fn new(destinations: Vec<Destination>) -> Result<Self, ConfigError> {
        if destinations.is_empty() {
            return Err(ConfigError::InvalidDestination(
                "at least one destination is required".to_string(),
            ));
        }

        let mut keys = HashSet::new();
        let mut filenames = HashSet::new();

        for dest in &destinations {
            if dest.key.as_str().trim().is_empty() {
                return Err(ConfigError::InvalidDestination(
                    "destination key must not be empty".to_string(),
                ));
            }
            validate_filename(dest)?;
            validate_columns(dest)?;

            if !keys.insert(dest.key.clone()) {
                return Err(ConfigError::InvalidDestination(format!(
                    "duplicate destination key '{}'",
                    dest.key
                )));
            }
            if !filenames.insert(dest.filename.to_lowercase()) {
                return Err(ConfigError::InvalidDestination(format!(
                    "'{}' reuses file name '{}'",
                    dest.key, dest.filename
                )));
            }
        }

        Ok(Self { destinations })
    }

    /// The QC assay destinations exported by default
    pub fn qc_assays() -> Self {
        Self {
            destinations: vec![
                Destination::new("Endotoxin", "endotoxin.csv", &["spikeRecovery", "endotoxin"]),
                Destination::new(
                    "NTA",
                    "nta.csv",
                    &[
                        "particleSizeMeanNanoparticleTrackingAnalysis",
                        "particleSizeModeNanoparticleTrackingAnalysis",
                        "d90NanoparticleTrackingAnalysis",
                        "d50NanoparticleTrackingAnalysis",
                        "d10NanoparticleTrackingAnalysis",
                        "spanNanoparticleTrackingAnalysis",
                    ],
                ),
                Destination::new(
                    "TNS",
                    "tns.csv",
                    &[
                        "apparentPkaTNSAssay",
                        "lowerConfidenceInterval",
                        "upperConfidenceInterval",
                    ],
                ),
                Destination::new(
                    "AEX_Accessible_mRNA",
                    "aex_accessible_mrna.csv",
                    &[
                        "enantiomericExcessPercentAEX",
                        "accessibleMRNAEnantiomericExcessEnzymeDigestPositive",
                        "accessibleMRNAEnantiomericExcessEnzymeDigestNegative",
                    ],
                ),
                Destination::new("Ribostar", "ribostar.csv", &["enantiomericExcessRiboSTAR"]),
                Destination::new(
                    "Sticky_Heparin_Sepharose_Binding",
                    "sticky_heparin_sepharose_binding.csv",
                    &[
                        "relativePercentAreaOfBoundLNPsStickyAssay",
                        "relativePercentAreaOfBoundLNPsStickyAssayEnzymeDigestPositive",
                        "relativePercentAreaOfBoundLNPsStickyAssayEnzymeDigestNegative",
                    ],
                ),
                Destination::new(
                    "Circular_Dichroism",
                    "circular_dichroism.csv",
                    &["circularDichroismLambdaMax", "circularDichroismSignalMax"],
                ),
                Destination::new(
                    "BEEFI",
                    "beefi.csv",
                    &[
                        "serumPercentEnantiomericExcessBEEFI",
                        "mRNAReleasePercentBEEFI",
                        "serumPercentEnantiomericExcessBEEFIEnzymeDigestPositive",
                        "serumPercentEnantiomericExcessBEEFIDigestNegative",
                    ],
                ),
                Destination::new(
                    "Generalized_Polarity",
                    "generalized_polarity.csv",
                    &[
                        "fluorescenceGeneralizedPolarizationValue",
                        "fluorescenceGeneralizedPolarizationValueStandardDeviation",
                    ],
                ),
                Destination::new(
                    "Peg_Shedding",
                    "peg_shedding.csv",
                    &[
                        "percentPEGat8hoursPEGShedding",
                        "timeAt50percentPEGShedPEGShedding",
                    ],
                ),
                Destination::new(
                    "Zeta_Potential",
                    "zeta_potential.csv",
                    &["zetaPotential", "zetaPotentialStandardDeviation"],
                ),
            ],
        }
    }

    /// All destinations in declared order
    pub fn all(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn get(&self, key: &DestinationKey) -> Option<&Destination> {
        self.destinations.iter().find(|d| &d.key == key)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Union of every destination's columns, first occurrence wins
    pub fn columns(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.destinations
            .iter()
            .flat_map(|d| d.columns.iter())
            .filter(|c| seen.insert(c.as_str()))
            .map(String::as_str)
            .collect()
    }
}

impl Default for DestinationRegistry {
    fn default() -> Self {
        Self::qc_assays()
    }
}

fn validate_filename(dest: &Destination) -> Result<(), ConfigError> {
    let name = dest.filename.as_str();
    let path = Path::new(name);
    let is_plain = path.file_name().is_some_and(|f| f == path.as_os_str());

    if name.trim().is_empty() || !is_plain || name.contains(['/', '\\']) {
        return Err(ConfigError::InvalidDestination(format!(
            "'{}' has an invalid file name '{}'",
            dest.key, name
        )));
    }
    // Would collide with another destination's temp artifact
    if name.to_lowercase().ends_with(TEMP_SUFFIX) {
        return Err(ConfigError::InvalidDestination(format!(
            "'{}' uses reserved temp suffix '{}' in '{}'",
            dest.key, TEMP_SUFFIX, name
        )));
    }
    Ok(())
}

fn validate_columns(dest: &Destination) -> Result<(), ConfigError> {
    if dest.columns.is_empty() {
        return Err(ConfigError::InvalidDestination(format!(
            "'{}' has no columns",
            dest.key
        )));
    }

    let mut seen = HashSet::new();
    for column in &dest.columns {
        if column.trim().is_empty() || column.contains([',', '"', '\n', '\r']) {
            return Err(ConfigError::InvalidDestination(format!(
                "'{}' has an invalid column name '{}'",
                dest.key, column
            )));
        }
        if !seen.insert(column.as_str()) {
            return Err(ConfigError::InvalidDestination(format!(
                "'{}' lists column '{}' twice",
                dest.key, column
            )));
        }
    }
    Ok(())
}
