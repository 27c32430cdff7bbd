//! Code for supporting the sample index configuration.
//!
//! A configuration is study scoped and versioned.  Changing the configuration
//! of a study creates a new version; rows written with an older version stay
//! valid for that version.

use serde::{Deserialize, Serialize};

/// Default thresholds for population frequency buckets.
pub const DEFAULT_POP_FREQ_THRESHOLDS: &[f64] = &[0.001, 0.005, 0.01];
/// Default thresholds for the file QUAL ranges.
pub const DEFAULT_QUAL_THRESHOLDS: &[f64] = &[10.0, 20.0, 30.0];
/// Default thresholds for the sample DP ranges.
pub const DEFAULT_DP_THRESHOLDS: &[f64] = &[5.0, 10.0, 15.0, 20.0, 30.0, 50.0];
/// Default number of bits to store the file position in multi-file samples.
pub const DEFAULT_FILE_POSITION_BITS: u32 = 3;
/// Name of the sample data field used for depth by default.
pub const DEFAULT_DEPTH_KEY: &str = "DP";
/// Frequency below which a variant counts as "rare" for the summary bit.
pub const POP_FREQ_THRESHOLD_001: f64 = 0.001;

/// Supporting code for `SampleIndexConfiguration`.
pub mod error {
    /// Error type for configuration validation.
    #[derive(thiserror::Error, Debug, Clone, PartialEq)]
    pub enum Error {
        #[error("thresholds of {0} must be strictly ascending: {1:?}")]
        UnsortedThresholds(String, Vec<f64>),
        #[error("file index needs {0} bits but at most 16 are available")]
        FileIndexTooWide(u32),
        #[error("too many population frequency thresholds ({0}), at most 255 allowed")]
        TooManyPopFreqThresholds(usize),
        #[error("population {0} is configured more than once")]
        DuplicatePopulation(String),
    }
}

pub use error::Error;

/// A population for which frequencies are indexed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Population {
    /// The study providing the frequencies, e.g., `GNOMAD_GENOMES`.
    pub study: String,
    /// The population within the study, e.g., `ALL`.
    pub population: String,
}

impl Population {
    /// Construct new population.
    pub fn new(study: &str, population: &str) -> Self {
        Self {
            study: study.to_string(),
            population: population.to_string(),
        }
    }

    /// Key as used in textual filters, e.g., `GNOMAD_GENOMES:ALL`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.study, self.population)
    }
}

/// Configuration of the population frequency index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PopulationFrequencyConfiguration {
    /// Indexed populations, the order defines the byte position in the index.
    pub populations: Vec<Population>,
    /// Ascending frequency thresholds defining the buckets.
    pub thresholds: Vec<f64>,
}

impl Default for PopulationFrequencyConfiguration {
    fn default() -> Self {
        Self {
            populations: vec![
                Population::new("1kG_phase3", "ALL"),
                Population::new("GNOMAD_GENOMES", "ALL"),
            ],
            thresholds: DEFAULT_POP_FREQ_THRESHOLDS.to_vec(),
        }
    }
}

/// Configuration of the file index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileIndexConfiguration {
    /// Number of bits for the position of the file within a multi-file sample.
    pub file_position_bits: u32,
    /// Ascending thresholds for the file's QUAL value.
    pub qual_thresholds: Vec<f64>,
    /// Ascending thresholds for the sample's depth value.
    pub dp_thresholds: Vec<f64>,
    /// Name of the sample data field holding the depth.
    pub dp_key: String,
}

impl Default for FileIndexConfiguration {
    fn default() -> Self {
        Self {
            file_position_bits: DEFAULT_FILE_POSITION_BITS,
            qual_thresholds: DEFAULT_QUAL_THRESHOLDS.to_vec(),
            dp_thresholds: DEFAULT_DP_THRESHOLDS.to_vec(),
            dp_key: DEFAULT_DEPTH_KEY.to_string(),
        }
    }
}

/// Sample index configuration of one study in one version.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SampleIndexConfiguration {
    /// File index settings.
    #[serde(default)]
    pub file_index: FileIndexConfiguration,
    /// Population frequency settings.
    #[serde(default)]
    pub population_frequency: PopulationFrequencyConfiguration,
}

impl SampleIndexConfiguration {
    /// Add a population to index.
    pub fn add_population(mut self, population: Population) -> Self {
        self.population_frequency.populations.push(population);
        self
    }

    /// Replace population frequency thresholds.
    pub fn with_pop_freq_thresholds(mut self, thresholds: &[f64]) -> Self {
        self.population_frequency.thresholds = thresholds.to_vec();
        self
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), Error> {
        check_ascending("QUAL", &self.file_index.qual_thresholds)?;
        check_ascending(&self.file_index.dp_key, &self.file_index.dp_thresholds)?;
        check_ascending(
            "population frequency",
            &self.population_frequency.thresholds,
        )?;
        if self.population_frequency.thresholds.len() >= u8::MAX as usize {
            return Err(Error::TooManyPopFreqThresholds(
                self.population_frequency.thresholds.len(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for population in &self.population_frequency.populations {
            if !seen.insert(population) {
                return Err(Error::DuplicatePopulation(population.key()));
            }
        }
        Ok(())
    }
}

fn check_ascending(name: &str, thresholds: &[f64]) -> Result<(), Error> {
    if thresholds.windows(2).any(|w| w[0] >= w[1]) {
        Err(Error::UnsortedThresholds(
            name.to_string(),
            thresholds.to_vec(),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_is_valid() -> Result<(), anyhow::Error> {
        let conf = SampleIndexConfiguration::default();
        conf.validate()?;
        assert_eq!(conf.population_frequency.populations.len(), 2);
        assert_eq!(conf.file_index.dp_key, "DP");

        Ok(())
    }

    #[test]
    fn unsorted_thresholds() {
        let conf = SampleIndexConfiguration::default().with_pop_freq_thresholds(&[0.01, 0.001]);
        assert!(matches!(
            conf.validate(),
            Err(Error::UnsortedThresholds(_, _))
        ));
    }

    #[test]
    fn duplicate_population() {
        let conf =
            SampleIndexConfiguration::default().add_population(Population::new("GNOMAD_GENOMES", "ALL"));
        assert_eq!(
            conf.validate(),
            Err(Error::DuplicatePopulation("GNOMAD_GENOMES:ALL".to_string()))
        );
    }

    #[test]
    fn json_round_trip() -> Result<(), anyhow::Error> {
        let conf = SampleIndexConfiguration::default().add_population(Population::new("s1", "ALL"));
        let json = serde_json::to_string(&conf)?;
        let conf2: SampleIndexConfiguration = serde_json::from_str(&json)?;
        assert_eq!(conf, conf2);

        let empty: SampleIndexConfiguration = serde_json::from_str("{}")?;
        assert_eq!(empty, SampleIndexConfiguration::default());

        Ok(())
    }
}
