//! Stable identity keys for PSMs, peptides and proteins.
//!
//! Keys only depend on the semantic content of a record, so that the same
//! spectrum read from two different sources collapses onto the same entities.

use crate::psm::PsmRecord;
use crate::Error;
use regex::Regex;
use std::sync::OnceLock;

fn uniprot_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:[OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9](?:[A-Z][A-Z0-9]{2}[0-9]){1,2})(?:-[0-9]+)?\b",
        )
        .expect("valid UniProt accession regex")
    })
}

/// Extract a UniProt accession (including isoform suffix) from a FASTA-style
/// identifier such as `sp|P12345-2|NAME_HUMAN`
pub fn uniprot_accession(text: &str) -> Option<&str> {
    uniprot_regex().find(text).map(|m| m.as_str())
}

/// Remove flanking residues: `K.PEPTIDE.R` -> `PEPTIDE`
pub fn strip_flanks(sequence: &str) -> &str {
    let s = sequence.trim();
    let bytes = s.as_bytes();
    if bytes.len() > 4 && bytes[1] == b'.' && bytes[bytes.len() - 2] == b'.' {
        &s[2..s.len() - 2]
    } else {
        s
    }
}

/// Plain amino acid sequence: no flanking residues, no modification
/// annotations, upper case
pub fn clean_sequence(sequence: &str) -> String {
    let mut out = String::with_capacity(sequence.len());
    let mut depth = 0usize;
    for c in strip_flanks(sequence).chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if depth == 0 && c.is_ascii_alphabetic() => out.push(c.to_ascii_uppercase()),
            _ => {}
        }
    }
    out
}

/// Peptide identity. With `distinguish_mods`, differently modified forms of
/// a sequence are separate peptides.
pub fn sequence_key(record: &PsmRecord, distinguish_mods: bool) -> Result<String, Error> {
    let key = if distinguish_mods && !record.full_sequence.trim().is_empty() {
        strip_flanks(&record.full_sequence).to_string()
    } else {
        clean_sequence(&record.sequence)
    };
    if clean_sequence(&key).is_empty() {
        return Err(Error::EmptySequence(format!(
            "{}-{}",
            record.raw_file, record.scan
        )));
    }
    Ok(key)
}

/// Spectrum identity: raw file, scan, sequence and charge
pub fn spectrum_key(record: &PsmRecord, distinguish_mods: bool) -> Result<String, Error> {
    let sequence = sequence_key(record, distinguish_mods)?;
    let mut key = format!("{}-{}-{}", record.raw_file.trim(), record.scan.trim(), sequence);
    if let Some(charge) = record.charge {
        key.push('-');
        key.push_str(itoa::Buffer::new().format(charge));
    }
    Ok(key)
}

/// Protein identity.
///
/// When `ignore_acc_format` is set, accession variants collapse onto the
/// bare UniProt accession, and isoform suffixes are dropped unless
/// `keep_isoforms` is set. Accessions without a recognizable UniProt
/// accession are used verbatim.
pub fn protein_key(
    accession: &str,
    ignore_acc_format: bool,
    keep_isoforms: bool,
) -> Result<String, Error> {
    let accession = accession.trim();
    if accession.is_empty() || accession.chars().any(char::is_whitespace) {
        return Err(Error::InvalidAccession(accession.into()));
    }
    if !ignore_acc_format {
        return Ok(accession.into());
    }
    match uniprot_accession(accession) {
        Some(acc) if keep_isoforms => Ok(acc.into()),
        Some(acc) => Ok(acc.split('-').next().unwrap_or(acc).into()),
        None => Ok(accession.into()),
    }
}
