pub mod annotation;
pub mod database;
pub mod fasta;
pub mod ingest;
pub mod key;
pub mod node;
pub mod peptide;
pub mod protein;
pub mod psm;
pub mod ratio;
pub mod registry;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "The peptide {sequence} is not found in Fasta DB.\n\
         Review the default indexing parameters such as the number of allowed misscleavages, \
         or set `ignore_not_found_peptides` to skip it"
    )]
    PeptideNotFound { sequence: String },
    #[error("invalid decoy pattern `{pattern}`: {source}")]
    InvalidDecoyPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid annotation column `{column}`: {reason}")]
    InvalidAnnotationColumn { column: String, reason: &'static str },
    #[error("invalid protein accession `{0}`")]
    InvalidAccession(String),
    #[error("empty peptide sequence in spectrum `{0}`")]
    EmptySequence(String),
    #[error("malformed XML: {0}")]
    MalformedXml(&'static str),
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
}
