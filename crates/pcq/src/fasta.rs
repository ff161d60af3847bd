use crate::database::{IndexedProtein, ProteinIndex};
use rayon::prelude::*;
use regex::Regex;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Debug, PartialEq)]
pub struct FastaEntry {
    pub accession: Arc<str>,
    pub description: String,
    pub sequence: String,
}

pub struct Fasta {
    pub targets: Vec<FastaEntry>,
    // Accessions matching this pattern are never reported by lookups
    decoy_pattern: Option<Regex>,
}

fn organism_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"OS=(.+?)(?:\s+[A-Z]{2}=|$)").expect("valid organism regex"))
}

/// Organism name from a UniProt style FASTA description (`OS=Homo sapiens OX=9606`)
pub fn taxonomy_from_description(description: &str) -> Option<String> {
    organism_regex()
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Fasta {
    // Parse a string into a fasta database
    pub fn parse(contents: String, decoy_pattern: Option<Regex>) -> Fasta {
        let mut targets = Vec::new();
        let mut last_id = "";
        let mut s = String::new();

        let mut push = |header: &str, sequence: String| {
            let mut split = header.splitn(2, char::is_whitespace);
            let accession = split.next().unwrap_or_default();
            if accession.is_empty() || sequence.is_empty() {
                return;
            }
            targets.push(FastaEntry {
                accession: Arc::from(accession),
                description: split.next().unwrap_or_default().trim().to_string(),
                sequence: sequence.to_ascii_uppercase(),
            });
        };

        for line in contents.as_str().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(id) = line.strip_prefix('>') {
                if !s.is_empty() {
                    push(last_id, std::mem::take(&mut s));
                }
                last_id = id;
            } else {
                s.push_str(line);
            }
        }

        if !s.is_empty() {
            push(last_id, s);
        }

        log::trace!("parsed {} fasta entries", targets.len());
        Fasta {
            targets,
            decoy_pattern,
        }
    }

    fn is_decoy(&self, accession: &str) -> bool {
        self.decoy_pattern
            .as_ref()
            .map_or(false, |re| re.is_match(accession))
    }
}

impl ProteinIndex for Fasta {
    fn proteins(&self, sequence: &str) -> Vec<IndexedProtein> {
        if sequence.is_empty() {
            return Vec::new();
        }
        let mut proteins = self
            .targets
            .par_iter()
            .filter(|entry| entry.sequence.contains(sequence) && !self.is_decoy(&entry.accession))
            .map(|entry| IndexedProtein {
                accession: entry.accession.clone(),
                description: entry.description.clone(),
                taxonomy: taxonomy_from_description(&entry.description),
            })
            .collect::<Vec<_>>();
        proteins.sort_unstable();
        proteins.dedup();
        proteins
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FASTA: &str = r#"
    >sp|P0AAA1|AAA_HUMAN Alpha protein OS=Homo sapiens OX=9606 GN=AAA PE=1 SV=2
    MEWKLEQSMREQALLK
    AQLTQLK
    >sp|P0BBB2|BBB_MOUSE Beta protein OS=Mus musculus OX=10090
    RMEWKLEQSMREQALLKAQLTQLK
    >rev_sp|P0AAA1|AAA_HUMAN
    KLQTLQAKLLAQERMSQELKWEM
    "#;

    #[test]
    fn parse_and_lookup() {
        let decoy = Regex::new("^rev_").unwrap();
        let fasta = Fasta::parse(FASTA.into(), Some(decoy));
        assert_eq!(fasta.targets.len(), 3);
        assert_eq!(&*fasta.targets[0].accession, "sp|P0AAA1|AAA_HUMAN");
        assert_eq!(fasta.targets[0].sequence, "MEWKLEQSMREQALLKAQLTQLK");

        let hits = fasta.proteins("EQALLK");
        assert_eq!(hits.len(), 2);
        assert_eq!(&*hits[0].accession, "sp|P0AAA1|AAA_HUMAN");
        assert_eq!(hits[0].taxonomy.as_deref(), Some("Homo sapiens"));
        assert_eq!(hits[1].taxonomy.as_deref(), Some("Mus musculus"));

        // Only present in the decoy entry
        assert!(fasta.proteins("KLQTLQAK").is_empty());
        assert!(fasta.proteins("NOTTHERE").is_empty());
    }

    #[test]
    fn organism() {
        assert_eq!(
            taxonomy_from_description("Alpha OS=Homo sapiens OX=9606"),
            Some("Homo sapiens".into())
        );
        assert_eq!(
            taxonomy_from_description("Alpha OS=Escherichia coli (strain K12)"),
            Some("Escherichia coli (strain K12)".into())
        );
        assert_eq!(taxonomy_from_description("Alpha protein"), None);
    }
}
