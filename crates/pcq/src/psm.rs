use crate::ratio::{IonCounts, QuantRatio};
use crate::registry::{PeptideIx, ProteinIx};
use fnv::FnvHashSet;
use std::sync::Arc;

/// A peptide-spectrum match as handed over by an upstream search-engine
/// reader (DTASelect, Census, ...)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PsmRecord {
    /// Raw data file (replicate/experiment) the spectrum was acquired in
    pub raw_file: String,
    pub scan: String,
    pub charge: Option<u8>,
    /// Plain sequence, possibly with flanking residues (`K.PEPTIDE.R`)
    pub sequence: String,
    /// Sequence annotated with modifications
    pub full_sequence: String,
    /// Protein accessions reported by the search engine
    pub accessions: Vec<String>,
    pub ratios: Vec<QuantRatio>,
    /// Ratios the quantification software reports for the whole peptide
    pub peptide_ratios: Vec<QuantRatio>,
    pub ion_counts: Option<IonCounts>,
    /// Input files this record was read from
    pub input_files: Vec<String>,
}

impl PsmRecord {
    pub fn is_quantified(&self) -> bool {
        !self.ratios.is_empty() || self.ion_counts.as_ref().map_or(false, |c| !c.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Quantification {
    NonQuantified,
    Quantified {
        ratios: Vec<QuantRatio>,
        ion_counts: Option<IonCounts>,
    },
}

impl From<&PsmRecord> for Quantification {
    fn from(record: &PsmRecord) -> Self {
        if record.is_quantified() {
            Quantification::Quantified {
                ratios: record.ratios.clone(),
                ion_counts: record.ion_counts.clone().filter(|c| !c.is_empty()),
            }
        } else {
            Quantification::NonQuantified
        }
    }
}

#[derive(Clone, Debug)]
pub struct Psm {
    pub key: Arc<str>,
    pub raw_file: String,
    pub scan: String,
    pub charge: Option<u8>,
    pub sequence: String,
    pub full_sequence: String,
    pub quant: Quantification,
    pub file_names: FnvHashSet<String>,
    pub(crate) peptide: Option<PeptideIx>,
    pub(crate) proteins: FnvHashSet<ProteinIx>,
}

impl Psm {
    pub fn new(key: Arc<str>, record: &PsmRecord, sequence: String) -> Self {
        Psm {
            key,
            raw_file: record.raw_file.clone(),
            scan: record.scan.clone(),
            charge: record.charge,
            sequence,
            full_sequence: record.full_sequence.clone(),
            quant: record.into(),
            file_names: record.input_files.iter().cloned().collect(),
            peptide: None,
            proteins: FnvHashSet::default(),
        }
    }

    /// The same spectrum may be seen again through a second channel (e.g. a
    /// quantified parser after a non-quantified one). Quantitative data
    /// upgrades a non-quantified PSM, but never replaces existing values.
    pub fn merge(&mut self, record: &PsmRecord) {
        self.file_names.extend(record.input_files.iter().cloned());
        if matches!(self.quant, Quantification::NonQuantified) && record.is_quantified() {
            self.quant = record.into();
        }
    }

    pub fn peptide(&self) -> Option<PeptideIx> {
        self.peptide
    }

    pub fn proteins(&self) -> &FnvHashSet<ProteinIx> {
        &self.proteins
    }

    pub fn is_quantified(&self) -> bool {
        matches!(self.quant, Quantification::Quantified { .. })
    }

    pub fn ratios(&self) -> &[QuantRatio] {
        match &self.quant {
            Quantification::Quantified { ratios, .. } => ratios,
            Quantification::NonQuantified => &[],
        }
    }

    pub fn non_infinity_ratios(&self) -> impl Iterator<Item = &QuantRatio> {
        self.ratios().iter().filter(|r| !r.is_infinite())
    }

    pub fn ion_counts(&self) -> Option<&IonCounts> {
        match &self.quant {
            Quantification::Quantified { ion_counts, .. } => ion_counts.as_ref(),
            Quantification::NonQuantified => None,
        }
    }
}
