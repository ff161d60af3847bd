use anyhow::{anyhow, ensure, Context};
use clap::ArgMatches;
use pcq_core::annotation::AnnotationColumn;
use pcq_core::ingest::{Builder, SecondaryAccessions, Settings};
use pcq_core::psm::PsmRecord;
use pcq_core::ratio::{IonCounts, QuantCondition, QuantRatio, RatioOrigin};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
/// Actual run parameters - may include overrides or default values not set by user
pub struct Search {
    pub version: String,
    pub parser: Settings,
    pub fasta: Option<String>,
    pub psm_paths: Vec<String>,
    pub condition_pairs: Vec<(String, String)>,
    pub consensus_by_replicate: bool,
    pub uniprot_xml: Option<String>,
    pub annotation_columns: Vec<String>,
    pub secondary_accessions: Option<String>,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,

    #[serde(skip_serializing)]
    pub columns: Vec<AnnotationColumn>,
}

#[derive(Deserialize)]
/// Input parameters deserialized from JSON file
pub struct Input {
    parser: Option<Builder>,
    fasta: Option<String>,
    psm_paths: Option<Vec<String>>,
    output_directory: Option<String>,
    condition_pairs: Option<Vec<(String, String)>>,
    consensus_by_replicate: Option<bool>,
    uniprot_xml: Option<String>,
    annotation_columns: Option<Vec<String>>,
    secondary_accessions: Option<String>,
}

pub fn read_json<S: AsRef<Path>, T: for<'de> Deserialize<'de>>(path: S) -> anyhow::Result<T> {
    let bytes = std::fs::read(path.as_ref())?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .expect("required parameters");
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(fasta) = matches.get_one::<String>("fasta") {
            log::trace!("overriding `fasta` parameter.");
            input.fasta = Some(fasta.into());
        }
        if let Some(psm_paths) = matches.get_many::<String>("psm_paths") {
            log::trace!("overriding `psm_paths` parameter.");
            input.psm_paths = Some(psm_paths.into_iter().map(|p| p.into()).collect());
        }

        ensure!(
            input.psm_paths.is_some(),
            "`psm_paths` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<Path>>(path: S) -> anyhow::Result<Self> {
        read_json(path)
    }

    pub fn build(self) -> anyhow::Result<Search> {
        let mut parser = self.parser.unwrap_or_default().make_settings()?;

        if parser.ignore_not_found_peptides && self.fasta.is_none() {
            log::warn!("`ignore_not_found_peptides` has no effect without a `fasta` database");
        }
        if parser.retrieve_fasta_isoforms && !parser.ignore_acc_format {
            log::warn!(
                "`retrieve_fasta_isoforms` only applies together with `ignore_acc_format: true`"
            );
        }

        if let Some(path) = &self.secondary_accessions {
            let accessions: SecondaryAccessions = read_json(path)
                .with_context(|| format!("Failed to read secondary accessions from `{path}`"))?;
            parser.enable_protein_merging_by_secondary_accessions(accessions);
        }

        let annotation_columns = self.annotation_columns.unwrap_or_default();
        let columns = annotation_columns
            .iter()
            .map(|triplet| triplet.parse::<AnnotationColumn>())
            .collect::<Result<Vec<_>, _>>()?;
        if !columns.is_empty() && self.uniprot_xml.is_none() {
            log::warn!("annotation columns are set but no `uniprot_xml` is given, they will be empty");
        }

        let condition_pairs = self.condition_pairs.unwrap_or_default();
        let consensus_by_replicate = self.consensus_by_replicate.unwrap_or(false);
        if consensus_by_replicate && condition_pairs.len() > 1 {
            log::warn!(
                "replicate consensus ratios are only computed for the first condition pair ({}/{})",
                condition_pairs[0].0,
                condition_pairs[0].1
            );
        }

        let psm_paths = self
            .psm_paths
            .ok_or_else(|| anyhow!("'psm_paths' must be provided!"))?;

        let output_directory = match self.output_directory {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()?,
        };

        Ok(Search {
            version: clap::crate_version!().into(),
            parser,
            fasta: self.fasta,
            psm_paths,
            condition_pairs,
            consensus_by_replicate,
            uniprot_xml: self.uniprot_xml,
            annotation_columns,
            secondary_accessions: self.secondary_accessions,
            output_paths: Vec::new(),
            output_directory,
            columns,
        })
    }
}

/// One row of a PSM table
#[derive(Deserialize, Debug)]
struct PsmRow {
    raw_file: String,
    scan: String,
    charge: Option<u8>,
    sequence: String,
    #[serde(default)]
    full_sequence: Option<String>,
    /// `;` separated accessions
    #[serde(default)]
    proteins: Option<String>,
    /// `;` separated `condition1/condition2=log2` entries
    #[serde(default)]
    ratios: Option<String>,
    /// Peptide-level ratios, same format as `ratios`
    #[serde(default)]
    peptide_ratios: Option<String>,
    /// `;` separated `condition=intensity` entries
    #[serde(default)]
    ion_counts: Option<String>,
}

fn parse_ratios(field: &str, origin: RatioOrigin) -> anyhow::Result<Vec<QuantRatio>> {
    field
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (conditions, value) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid ratio `{entry}`, expected `A/B=log2`"))?;
            let (a, b) = conditions
                .split_once('/')
                .ok_or_else(|| anyhow!("invalid ratio `{entry}`, expected `A/B=log2`"))?;
            let log2 = value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid ratio value in `{entry}`"))?;
            Ok(QuantRatio::new(
                QuantCondition::new(a),
                QuantCondition::new(b),
                log2,
                origin,
            ))
        })
        .collect()
}

fn parse_ion_counts(field: &str) -> anyhow::Result<Option<IonCounts>> {
    let mut counts = IonCounts::default();
    for entry in field.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (condition, intensity) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid ion count `{entry}`, expected `A=intensity`"))?;
        let intensity = intensity
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid intensity in `{entry}`"))?;
        counts.push(QuantCondition::new(condition), intensity);
    }
    Ok((!counts.is_empty()).then_some(counts))
}

impl PsmRow {
    fn into_record(self, input_file: &str) -> anyhow::Result<PsmRecord> {
        let accessions = self
            .proteins
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Ok(PsmRecord {
            ratios: parse_ratios(self.ratios.as_deref().unwrap_or_default(), RatioOrigin::Psm)?,
            peptide_ratios: parse_ratios(
                self.peptide_ratios.as_deref().unwrap_or_default(),
                RatioOrigin::Peptide,
            )?,
            ion_counts: parse_ion_counts(self.ion_counts.as_deref().unwrap_or_default())?,
            full_sequence: self.full_sequence.unwrap_or_else(|| self.sequence.clone()),
            raw_file: self.raw_file,
            scan: self.scan,
            charge: self.charge,
            sequence: self.sequence,
            accessions,
            input_files: vec![input_file.to_string()],
        })
    }
}

/// Stream the PSMs of a tab separated table. Malformed rows surface as
/// errors of the iterator.
pub fn read_psms<P: AsRef<Path>>(
    path: P,
) -> anyhow::Result<impl Iterator<Item = anyhow::Result<PsmRecord>>> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Failed to open PSM table `{}`", path.display()))?;
    Ok(reader
        .into_deserialize::<PsmRow>()
        .enumerate()
        .map(move |(line, row)| {
            row.map_err(anyhow::Error::from)
                .and_then(|row| row.into_record(&name))
                .with_context(|| format!("{}: invalid row {}", name, line + 1))
        }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ratio_fields() {
        let ratios = parse_ratios("light/heavy=1.5; light/medium=-inf;", RatioOrigin::Psm).unwrap();
        assert_eq!(ratios.len(), 2);
        assert_eq!(ratios[0].condition1().name(), "light");
        assert_eq!(ratios[0].log2(), 1.5);
        assert_eq!(ratios[1].log2(), f64::NEG_INFINITY);
        assert_eq!(ratios[1].origin(), RatioOrigin::Psm);
        assert!(parse_ratios("", RatioOrigin::Psm).unwrap().is_empty());
        assert!(parse_ratios("light=1.0", RatioOrigin::Psm).is_err());
        assert!(parse_ratios("light/heavy=abc", RatioOrigin::Peptide).is_err());

        let peptide = parse_ratios("light/heavy=0.5", RatioOrigin::Peptide).unwrap();
        assert_eq!(peptide[0].origin(), RatioOrigin::Peptide);
    }

    #[test]
    fn ion_count_fields() {
        let counts = parse_ion_counts("126=100.0;127=50").unwrap().unwrap();
        assert_eq!(counts.intensity(&QuantCondition::new("126")), 100.0);
        assert!(parse_ion_counts(" ").unwrap().is_none());
        assert!(parse_ion_counts("126").is_err());
    }

    #[test]
    fn defaults() {
        let input: Input = serde_json::from_str(r#"{ "psm_paths": ["a.tsv"] }"#).unwrap();
        let search = input.build().unwrap();
        assert!(search.parser.distinguish_modified_sequences);
        assert!(!search.consensus_by_replicate);
        assert!(search.columns.is_empty());

        let input: Input = serde_json::from_str(
            r#"{ "psm_paths": ["a.tsv"], "annotation_columns": ["/entry/name,Name"] }"#,
        )
        .unwrap();
        assert!(input.build().is_err());

        let input: Input = serde_json::from_str(
            r#"{ "psm_paths": ["a.tsv"], "parser": { "decoy_pattern": "(" } }"#,
        )
        .unwrap();
        assert!(input.build().is_err());
    }
}
