use crate::registry::{PeptideIx, PsmIx};
use fnv::FnvHashSet;
use std::sync::Arc;

/// A distinct protein accession
#[derive(Clone, Debug)]
pub struct Protein {
    pub key: Arc<str>,
    /// Accession as reported by the search engine or the FASTA header
    pub accession: String,
    pub description: String,
    pub taxonomies: FnvHashSet<String>,
    /// Tombstone: excluded from reporting, but still part of the graph
    pub(crate) discarded: bool,
    pub(crate) peptides: FnvHashSet<PeptideIx>,
    pub(crate) psms: FnvHashSet<PsmIx>,
}

impl Protein {
    pub fn new(key: Arc<str>, accession: String, description: String) -> Self {
        Protein {
            key,
            accession,
            description,
            taxonomies: FnvHashSet::default(),
            discarded: false,
            peptides: FnvHashSet::default(),
            psms: FnvHashSet::default(),
        }
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    pub fn peptides(&self) -> &FnvHashSet<PeptideIx> {
        &self.peptides
    }

    pub fn psms(&self) -> &FnvHashSet<PsmIx> {
        &self.psms
    }
}
