//! Study and sample metadata, tracking configuration versions per sample.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::conf::{self, SampleIndexConfiguration};
use super::schema::SampleIndexSchema;

/// Supporting code for `StudyMetadata`.
pub mod error {
    /// Error type for metadata lookups.
    #[derive(thiserror::Error, Debug, Clone, PartialEq)]
    pub enum Error {
        #[error("unknown sample {0:?}")]
        UnknownSample(String),
        #[error("unknown sample index version {0}")]
        UnknownVersion(u32),
        #[error("study has no sample index configuration")]
        NoConfiguration,
        #[error(
            "no common sample index version for the queried samples, please (re)index samples {0:?}"
        )]
        NoCommonVersion(Vec<String>),
        #[error("invalid configuration: {0}")]
        Configuration(#[from] super::conf::Error),
    }
}

pub use error::Error;

/// Per sample metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SampleMetadata {
    /// Numeric identifier, used in row keys.
    pub id: u32,
    /// Files the sample was loaded from, in load order.
    #[serde(default)]
    pub files: Vec<String>,
    /// Name of the father, if in the study.
    #[serde(default)]
    pub father: Option<String>,
    /// Name of the mother, if in the study.
    #[serde(default)]
    pub mother: Option<String>,
    /// Versions for which the index is completely built.
    #[serde(default)]
    pub built_versions: BTreeSet<u32>,
    /// Versions for which annotation columns were written.
    #[serde(default)]
    pub annotated_versions: BTreeSet<u32>,
    /// Versions for which the family index was written.
    #[serde(default)]
    pub family_versions: BTreeSet<u32>,
}

impl SampleMetadata {
    /// Position of `file` among the sample's files.
    pub fn file_position(&self, file: &str) -> Option<usize> {
        self.files.iter().position(|f| f == file)
    }

    /// Whether the sample was loaded from more than one file.
    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1
    }
}

/// Metadata of one study.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StudyMetadata {
    /// Name of the study.
    #[serde(default)]
    pub name: String,
    /// Sample index configurations by version.
    #[serde(default)]
    pub configurations: BTreeMap<u32, SampleIndexConfiguration>,
    /// Samples by name.
    #[serde(default)]
    pub samples: IndexMap<String, SampleMetadata>,
}

/// Intersection of all version sets, empty if there is none.
pub fn intersect_versions<'a, I>(sets: I) -> BTreeSet<u32>
where
    I: IntoIterator<Item = &'a BTreeSet<u32>>,
{
    let mut sets = sets.into_iter();
    let Some(first) = sets.next() else {
        return BTreeSet::new();
    };
    sets.fold(first.clone(), |acc, set| {
        acc.intersection(set).copied().collect()
    })
}

impl StudyMetadata {
    /// New study with the default configuration as version 1.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            configurations: [(1, SampleIndexConfiguration::default())]
                .into_iter()
                .collect(),
            samples: IndexMap::new(),
        }
    }

    /// The most recent configuration version.
    pub fn latest_version(&self) -> Option<u32> {
        self.configurations.keys().next_back().copied()
    }

    /// Register a new configuration, returning its version.
    pub fn add_configuration(&mut self, configuration: SampleIndexConfiguration) -> Result<u32, conf::Error> {
        configuration.validate()?;
        let version = self.latest_version().map(|v| v + 1).unwrap_or(1);
        self.configurations.insert(version, configuration);
        Ok(version)
    }

    /// Schema of the given version.
    pub fn schema(&self, version: u32) -> Result<SampleIndexSchema, Error> {
        let configuration = self
            .configurations
            .get(&version)
            .ok_or(Error::UnknownVersion(version))?;
        Ok(SampleIndexSchema::new(version, configuration.clone())?)
    }

    /// Schema of the latest version.
    pub fn latest_schema(&self) -> Result<SampleIndexSchema, Error> {
        self.schema(self.latest_version().ok_or(Error::NoConfiguration)?)
    }

    /// Look up a sample.
    pub fn sample(&self, name: &str) -> Result<&SampleMetadata, Error> {
        self.samples
            .get(name)
            .ok_or_else(|| Error::UnknownSample(name.to_string()))
    }

    /// Look up a sample for modification.
    pub fn sample_mut(&mut self, name: &str) -> Result<&mut SampleMetadata, Error> {
        self.samples
            .get_mut(name)
            .ok_or_else(|| Error::UnknownSample(name.to_string()))
    }

    /// Name of the sample with the given identifier.
    pub fn sample_name(&self, id: u32) -> Option<&str> {
        self.samples
            .iter()
            .find(|(_, sample)| sample.id == id)
            .map(|(name, _)| name.as_str())
    }

    /// Register `file` for `sample`, creating the sample if needed.
    ///
    /// Returns the sample's identifier and the file's position.
    pub fn register_file(&mut self, sample: &str, file: &str) -> (u32, usize) {
        let next_id = self.samples.values().map(|s| s.id + 1).max().unwrap_or(1);
        let entry = self
            .samples
            .entry(sample.to_string())
            .or_insert_with(|| SampleMetadata {
                id: next_id,
                ..Default::default()
            });
        let position = match entry.file_position(file) {
            Some(position) => position,
            None => {
                entry.files.push(file.to_string());
                entry.files.len() - 1
            }
        };
        (entry.id, position)
    }

    /// Highest version built for all of `samples`.
    pub fn common_version(&self, samples: &[&str]) -> Result<u32, Error> {
        let metas = samples
            .iter()
            .map(|name| self.sample(name))
            .collect::<Result<Vec<_>, _>>()?;
        let common = intersect_versions(metas.iter().map(|m| &m.built_versions));
        if let Some(version) = common.last() {
            return Ok(*version);
        }
        let latest = self.latest_version();
        let lacking = samples
            .iter()
            .zip(metas.iter())
            .filter(|(_, meta)| latest.map(|v| !meta.built_versions.contains(&v)).unwrap_or(true))
            .map(|(name, _)| name.to_string())
            .collect::<Vec<_>>();
        Err(Error::NoCommonVersion(lacking))
    }

    /// Whether all `samples` are annotated in `version`.
    pub fn all_annotated(&self, samples: &[&str], version: u32) -> bool {
        samples.iter().all(|name| {
            self.samples
                .get(*name)
                .map(|s| s.annotated_versions.contains(&version))
                .unwrap_or(false)
        })
    }

    /// Whether the family index of `sample` is available in `version`.
    pub fn family_indexed(&self, sample: &str, version: u32) -> bool {
        self.samples
            .get(sample)
            .map(|s| s.family_versions.contains(&version))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn study() -> StudyMetadata {
        let mut study = StudyMetadata::new("study");
        let v2 = study
            .add_configuration(SampleIndexConfiguration::default())
            .expect("valid");
        assert_eq!(v2, 2);
        for (name, versions) in [("s1", vec![1, 2]), ("s2", vec![1, 2]), ("s3", vec![1])] {
            study.register_file(name, "f1.vcf");
            study.sample_mut(name).expect("exists").built_versions = versions.into_iter().collect();
        }
        study
    }

    #[test]
    fn intersect() {
        let a = [1, 2, 3].into_iter().collect::<BTreeSet<_>>();
        let b = [2, 3, 4].into_iter().collect::<BTreeSet<_>>();
        assert_eq!(
            intersect_versions([&a, &b]),
            [2, 3].into_iter().collect::<BTreeSet<_>>()
        );
        assert!(intersect_versions(Vec::<&BTreeSet<u32>>::new()).is_empty());
    }

    #[rstest::rstest]
    #[case(vec!["s1"], 2)]
    #[case(vec!["s1", "s2"], 2)]
    #[case(vec!["s1", "s3"], 1)]
    fn common_version(#[case] samples: Vec<&str>, #[case] expected: u32) -> Result<(), anyhow::Error> {
        assert_eq!(study().common_version(&samples)?, expected);

        Ok(())
    }

    #[test]
    fn no_common_version() {
        let mut study = study();
        study.sample_mut("s3").expect("exists").built_versions = [3].into_iter().collect();
        study.register_file("s4", "f2.vcf");
        assert_eq!(
            study.common_version(&["s1", "s3", "s4"]),
            Err(Error::NoCommonVersion(vec!["s3".to_string(), "s4".to_string()]))
        );
        assert_eq!(
            study.common_version(&["s5"]),
            Err(Error::UnknownSample("s5".to_string()))
        );
    }

    #[test]
    fn register_files() {
        let mut study = StudyMetadata::new("study");
        assert_eq!(study.register_file("s1", "a.vcf"), (1, 0));
        assert_eq!(study.register_file("s1", "b.vcf"), (1, 1));
        assert_eq!(study.register_file("s2", "a.vcf"), (2, 0));
        assert_eq!(study.register_file("s1", "a.vcf"), (1, 0));
        assert!(study.sample("s1").expect("exists").is_multi_file());
        assert_eq!(study.sample_name(2), Some("s2"));
    }

    #[test]
    fn schema_versions() -> Result<(), anyhow::Error> {
        let study = study();
        assert_eq!(study.latest_schema()?.version, 2);
        assert_eq!(study.schema(5), Err(Error::UnknownVersion(5)));
        assert_eq!(
            StudyMetadata::default().latest_schema(),
            Err(Error::NoConfiguration)
        );

        Ok(())
    }
}
