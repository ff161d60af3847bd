//! Build the bipartite peptide/protein graph from a stream of PSM records

use crate::database::{IndexLookup, ProteinIndex};
use crate::key;
use crate::peptide::Peptide;
use crate::protein::Protein;
use crate::psm::{Psm, PsmRecord};
use crate::registry::{PeptideIx, ProteinIx, PsmIx, Registry};
use crate::Error;
use fnv::{FnvHashMap, FnvHashSet};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use std::time::Instant;

/// Log progress every `PROGRESS_STEP` records
const PROGRESS_STEP: usize = 50_000;

#[derive(Deserialize, Serialize, Default, Clone, Debug)]
/// Parser settings as read from a configuration file
pub struct Builder {
    /// Skip, rather than fail on, peptides missing from the FASTA database
    pub ignore_not_found_peptides: Option<bool>,
    /// Do not record protein taxonomies
    pub ignore_taxonomies: Option<bool>,
    /// Collapse accession variants onto the bare UniProt accession
    pub ignore_acc_format: Option<bool>,
    /// Keep isoform suffixes when collapsing accessions
    pub retrieve_fasta_isoforms: Option<bool>,
    /// Treat differently modified forms of a sequence as separate peptides
    pub distinguish_modified_sequences: Option<bool>,
    /// Regular expression matching decoy accessions
    pub decoy_pattern: Option<String>,
}

impl Builder {
    pub fn make_settings(self) -> Result<Settings, Error> {
        let decoy_pattern = match self.decoy_pattern.filter(|p| !p.trim().is_empty()) {
            Some(pattern) => Some(
                Regex::new(&pattern)
                    .map_err(|source| Error::InvalidDecoyPattern { pattern, source })?,
            ),
            None => None,
        };
        Ok(Settings {
            ignore_not_found_peptides: self.ignore_not_found_peptides.unwrap_or(false),
            ignore_taxonomies: self.ignore_taxonomies.unwrap_or(false),
            ignore_acc_format: self.ignore_acc_format.unwrap_or(false),
            retrieve_fasta_isoforms: self.retrieve_fasta_isoforms.unwrap_or(false),
            distinguish_modified_sequences: self.distinguish_modified_sequences.unwrap_or(true),
            decoy_pattern,
            secondary_accessions: None,
        })
    }
}

fn serialize_regex<S: Serializer>(re: &Option<Regex>, s: S) -> Result<S::Ok, S::Error> {
    match re {
        Some(re) => s.serialize_some(re.as_str()),
        None => s.serialize_none(),
    }
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct Settings {
    pub ignore_not_found_peptides: bool,
    pub ignore_taxonomies: bool,
    pub ignore_acc_format: bool,
    pub retrieve_fasta_isoforms: bool,
    pub distinguish_modified_sequences: bool,
    #[serde(serialize_with = "serialize_regex")]
    pub decoy_pattern: Option<Regex>,
    #[serde(skip_serializing)]
    pub secondary_accessions: Option<SecondaryAccessions>,
}

impl Settings {
    /// Merge proteins known under a secondary (obsolete) accession into the
    /// entry of their primary accession
    pub fn enable_protein_merging_by_secondary_accessions(
        &mut self,
        accessions: SecondaryAccessions,
    ) {
        info!(
            "merging proteins by {} secondary accessions (annotation version: {})",
            accessions.len(),
            accessions.version.as_deref().unwrap_or("latest")
        );
        self.secondary_accessions = Some(accessions);
    }

    fn is_decoy(&self, accession: &str) -> bool {
        self.decoy_pattern
            .as_ref()
            .map_or(false, |re| re.is_match(accession))
    }
}

/// Mapping from secondary to primary UniProt accessions, taken from a given
/// release of the annotation source
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct SecondaryAccessions {
    pub version: Option<String>,
    accessions: FnvHashMap<String, String>,
}

impl SecondaryAccessions {
    pub fn new(version: Option<String>) -> Self {
        Self {
            version,
            accessions: FnvHashMap::default(),
        }
    }

    pub fn insert<S: Into<String>>(&mut self, secondary: S, primary: S) {
        self.accessions.insert(secondary.into(), primary.into());
    }

    pub fn primary(&self, accession: &str) -> Option<&str> {
        self.accessions.get(accession).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.accessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessions.is_empty()
    }
}

/// A protein resolved for one PSM, before anything is written to the registry
struct ProteinSeed {
    key: String,
    accession: String,
    description: String,
    taxonomy: Option<String>,
}

/// The result of ingesting a single PSM record
#[derive(Clone, Debug, PartialEq)]
pub struct Ingested {
    pub psm: PsmIx,
    pub peptide: PeptideIx,
    pub proteins: Vec<ProteinIx>,
    /// The peptide was missing from the reference database (tolerated)
    pub not_found: bool,
}

/// Incremental graph builder. Several builders may feed the same
/// [`Registry`] one after the other, e.g. a quantified parser followed by a
/// non-quantified one.
pub struct GraphBuilder<'db> {
    settings: Settings,
    index: Option<&'db dyn ProteinIndex>,
    protein_to_peptides: FnvHashMap<Arc<str>, FnvHashSet<Arc<str>>>,
    experiment_to_proteins: FnvHashMap<String, FnvHashSet<Arc<str>>>,
    local_psms: FnvHashSet<PsmIx>,
    local_peptides: FnvHashSet<PeptideIx>,
    local_proteins: FnvHashSet<ProteinIx>,
    processed: bool,
}

impl<'db> GraphBuilder<'db> {
    pub fn new(settings: Settings, index: Option<&'db dyn ProteinIndex>) -> Self {
        Self {
            settings,
            index,
            protein_to_peptides: FnvHashMap::default(),
            experiment_to_proteins: FnvHashMap::default(),
            local_psms: FnvHashSet::default(),
            local_peptides: FnvHashSet::default(),
            local_proteins: FnvHashSet::default(),
            processed: false,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Was the last call to [`GraphBuilder::process`] able to read every record?
    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// Protein key -> sequence keys of the peptides seen for that protein
    pub fn protein_to_peptides(&self) -> &FnvHashMap<Arc<str>, FnvHashSet<Arc<str>>> {
        &self.protein_to_peptides
    }

    /// Raw file -> protein keys seen in that file
    pub fn experiment_to_proteins(&self) -> &FnvHashMap<String, FnvHashSet<Arc<str>>> {
        &self.experiment_to_proteins
    }

    pub fn local_psms(&self) -> &FnvHashSet<PsmIx> {
        &self.local_psms
    }

    pub fn local_peptides(&self) -> &FnvHashSet<PeptideIx> {
        &self.local_peptides
    }

    pub fn local_proteins(&self) -> &FnvHashSet<ProteinIx> {
        &self.local_proteins
    }

    fn protein_key(&self, accession: &str) -> Result<String, Error> {
        let key = key::protein_key(
            accession,
            self.settings.ignore_acc_format,
            self.settings.retrieve_fasta_isoforms,
        )?;
        match &self.settings.secondary_accessions {
            Some(secondary) => Ok(secondary.primary(&key).map(Into::into).unwrap_or(key)),
            None => Ok(key),
        }
    }

    /// Resolve every protein a PSM maps to, from the reference database and
    /// from the accessions on the record itself
    fn resolve_proteins(
        &self,
        record: &PsmRecord,
        clean_seq: &str,
    ) -> Result<(Vec<ProteinSeed>, bool), Error> {
        let mut seeds = Vec::new();
        let mut not_found = false;

        if let Some(index) = self.index {
            match IndexLookup::resolve(index, clean_seq, self.settings.ignore_not_found_peptides) {
                IndexLookup::Found(proteins) => {
                    for protein in proteins {
                        seeds.push((
                            protein.accession.to_string(),
                            protein.description,
                            protein.taxonomy,
                        ));
                    }
                }
                IndexLookup::NotFoundTolerated => {
                    warn!("The peptide {} is not found in Fasta DB.", clean_seq);
                    not_found = true;
                }
                IndexLookup::NotFoundFatal => {
                    return Err(Error::PeptideNotFound {
                        sequence: clean_seq.into(),
                    })
                }
            }
        }

        seeds.extend(
            record
                .accessions
                .iter()
                .map(|acc| (acc.clone(), String::new(), None)),
        );

        let mut resolved: Vec<ProteinSeed> = Vec::with_capacity(seeds.len());
        for (accession, description, taxonomy) in seeds {
            if self.settings.is_decoy(&accession) {
                debug!("skipping decoy protein {}", accession);
                continue;
            }
            let key = match self.protein_key(&accession) {
                Ok(key) => key,
                Err(e) => {
                    warn!("skipping protein of spectrum {}: {}", record.scan, e);
                    continue;
                }
            };
            match resolved.iter_mut().find(|seed| seed.key == key) {
                Some(seed) => {
                    // Variants collapsed onto one key report the smallest accession
                    if accession < seed.accession {
                        seed.accession = accession;
                    }
                    if seed.description.is_empty() {
                        seed.description = description;
                    }
                    seed.taxonomy = seed.taxonomy.take().or(taxonomy);
                }
                None => resolved.push(ProteinSeed {
                    key,
                    accession,
                    description,
                    taxonomy,
                }),
            }
        }
        Ok((resolved, not_found))
    }

    /// Add one PSM to the graph.
    ///
    /// All keys are resolved before the registry is touched, so a failing
    /// record leaves no partial edges behind. Returns `Ok(None)` when the
    /// record was skipped because of a malformed sequence.
    pub fn ingest(
        &mut self,
        registry: &mut Registry,
        record: &PsmRecord,
    ) -> Result<Option<Ingested>, Error> {
        let distinguish = self.settings.distinguish_modified_sequences;
        let (spectrum_key, sequence_key) = match key::spectrum_key(record, distinguish)
            .and_then(|s| Ok((s, key::sequence_key(record, distinguish)?)))
        {
            Ok(keys) => keys,
            Err(e) => {
                warn!("skipping PSM: {}", e);
                return Ok(None);
            }
        };
        let clean_seq = key::clean_sequence(&record.sequence);
        let (seeds, not_found) = self.resolve_proteins(record, &clean_seq)?;

        let (psm, created) = registry.get_or_create_psm(&spectrum_key, |key| {
            Psm::new(key, record, clean_seq.clone())
        });
        if !created {
            // The same spectrum seen through another channel
            registry.psm_mut(psm).merge(record);
        }

        let full_sequence = match key::strip_flanks(&record.full_sequence) {
            "" => clean_seq.clone(),
            full => full.to_string(),
        };
        let (peptide, _) = registry.get_or_create_peptide(&sequence_key, |key| {
            Peptide::new(key, clean_seq.clone(), full_sequence)
        });
        registry.link_psm_peptide(psm, peptide);
        for ratio in &record.peptide_ratios {
            registry.peptide_mut(peptide).add_ratio(ratio.clone());
        }
        let peptide_key = registry[peptide].key.clone();

        let mut proteins = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let ignore_taxonomies = self.settings.ignore_taxonomies;
            let (protein, _) = registry.get_or_create_protein(&seed.key, |key| {
                Protein::new(key, seed.accession.clone(), seed.description.clone())
            });
            {
                let entry = registry.protein_mut(protein);
                if seed.accession < entry.accession {
                    entry.accession = seed.accession;
                }
                if entry.description.is_empty() && !seed.description.is_empty() {
                    entry.description = seed.description;
                }
                if !ignore_taxonomies {
                    entry.taxonomies.extend(seed.taxonomy);
                }
            }
            registry.link_psm_protein(psm, protein);
            registry.link_peptide_protein(peptide, protein);

            let protein_key = registry[protein].key.clone();
            self.protein_to_peptides
                .entry(protein_key.clone())
                .or_default()
                .insert(peptide_key.clone());
            self.experiment_to_proteins
                .entry(record.raw_file.clone())
                .or_default()
                .insert(protein_key);
            self.local_proteins.insert(protein);
            proteins.push(protein);
        }

        self.local_psms.insert(psm);
        self.local_peptides.insert(peptide);

        Ok(Some(Ingested {
            psm,
            peptide,
            proteins,
            not_found,
        }))
    }

    /// Ingest a whole stream of records.
    ///
    /// A failure of the record source stops the pass and is only logged; the
    /// partial graph stays queryable but [`GraphBuilder::is_processed`]
    /// reports `false`. A peptide missing from the database in strict mode
    /// aborts the pass with an error.
    pub fn process<I, E>(&mut self, registry: &mut Registry, records: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = Result<PsmRecord, E>>,
        E: std::fmt::Display,
    {
        self.processed = false;
        let start = Instant::now();
        let mut count = 0usize;
        let mut skipped = 0usize;
        let mut not_found = 0usize;

        for record in records {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    log::error!("error while reading PSMs after {} records: {}", count, e);
                    return Ok(());
                }
            };
            match self.ingest(registry, &record)? {
                Some(ingested) if ingested.not_found => not_found += 1,
                Some(_) => {}
                None => skipped += 1,
            }
            count += 1;
            if count % PROGRESS_STEP == 0 {
                info!("- ingested {} PSMs...", count);
            }
        }

        if not_found > 0 {
            warn!("{} peptides were not found in the FASTA database", not_found);
        }
        info!(
            "- ingested {} PSMs ({} skipped) into {} peptides and {} proteins in {}ms",
            count,
            skipped,
            self.local_peptides.len(),
            self.local_proteins.len(),
            start.elapsed().as_millis()
        );
        self.processed = true;
        Ok(())
    }
}
