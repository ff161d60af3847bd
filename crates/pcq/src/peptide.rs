use crate::ratio::QuantRatio;
use crate::registry::{ProteinIx, PsmIx};
use fnv::FnvHashSet;
use std::sync::Arc;

/// A distinct peptide, identified by its sequence key
#[derive(Clone, Debug)]
pub struct Peptide {
    pub key: Arc<str>,
    /// Plain sequence, without modifications
    pub sequence: String,
    /// Sequence annotated with modifications, as first observed
    pub full_sequence: String,
    /// Peptide-level ratios reported by the quantification software
    pub ratios: Vec<QuantRatio>,
    pub(crate) psms: FnvHashSet<PsmIx>,
    pub(crate) proteins: FnvHashSet<ProteinIx>,
    pub(crate) raw_files: FnvHashSet<String>,
}

impl Peptide {
    pub fn new(key: Arc<str>, sequence: String, full_sequence: String) -> Self {
        Peptide {
            key,
            sequence,
            full_sequence,
            ratios: Vec::new(),
            psms: FnvHashSet::default(),
            proteins: FnvHashSet::default(),
            raw_files: FnvHashSet::default(),
        }
    }

    pub fn psms(&self) -> &FnvHashSet<PsmIx> {
        &self.psms
    }

    pub fn proteins(&self) -> &FnvHashSet<ProteinIx> {
        &self.proteins
    }

    /// Raw files (replicates) this peptide was identified in
    pub fn raw_files(&self) -> &FnvHashSet<String> {
        &self.raw_files
    }

    pub fn add_ratio(&mut self, ratio: QuantRatio) -> bool {
        if self.ratios.contains(&ratio) {
            return false;
        }
        self.ratios.push(ratio);
        true
    }
}
