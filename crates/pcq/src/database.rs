//! Peptide to protein lookup against a reference sequence database

use std::sync::Arc;

/// A protein returned by a reference database lookup
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexedProtein {
    pub accession: Arc<str>,
    pub description: String,
    pub taxonomy: Option<String>,
}

/// Sequence database index. Implementations return every protein whose
/// sequence contains the (cleaned) peptide, possibly none.
pub trait ProteinIndex {
    fn proteins(&self, sequence: &str) -> Vec<IndexedProtein>;
}

/// Outcome of looking a peptide up in the reference database
#[derive(Clone, Debug, PartialEq)]
pub enum IndexLookup {
    Found(Vec<IndexedProtein>),
    /// No protein contains the peptide, and missing peptides are tolerated
    NotFoundTolerated,
    /// No protein contains the peptide, and the caller asked to be strict
    NotFoundFatal,
}

impl IndexLookup {
    pub fn resolve<I: ProteinIndex + ?Sized>(index: &I, sequence: &str, tolerate: bool) -> Self {
        let proteins = index.proteins(sequence);
        match (proteins.is_empty(), tolerate) {
            (false, _) => IndexLookup::Found(proteins),
            (true, true) => IndexLookup::NotFoundTolerated,
            (true, false) => IndexLookup::NotFoundFatal,
        }
    }
}
