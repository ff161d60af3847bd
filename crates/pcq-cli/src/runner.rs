use super::input::{read_psms, Search};
use anyhow::Context;
use itertools::Itertools;
use log::info;
use pcq_core::annotation::{parse_uniprot, AnnotationEntry};
use pcq_core::database::ProteinIndex;
use pcq_core::fasta::Fasta;
use pcq_core::ingest::GraphBuilder;
use pcq_core::node::{ClusterGraph, PeptideNode, PeptideNodeIx};
use pcq_core::ratio::{consensus_from_ratios, QuantCondition, QuantRatio};
use pcq_core::registry::Registry;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

pub struct Runner {
    pub parameters: Search,
    fasta: Option<Fasta>,
    pub annotations: HashMap<String, AnnotationEntry>,
    start: Instant,
}

/// Consensus ratios of one peptide node: one per condition pair, and one per
/// replicate for the first pair
struct NodeConsensus {
    node: PeptideNodeIx,
    ratios: Vec<QuantRatio>,
    by_replicate: Vec<(String, QuantRatio)>,
}

impl Runner {
    pub fn new(parameters: Search) -> anyhow::Result<Self> {
        let start = Instant::now();

        let fasta = match &parameters.fasta {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read FASTA database from `{}`", path))?;
                let fasta = Fasta::parse(contents, parameters.parser.decoy_pattern.clone());
                info!(
                    "loaded {} proteins from {} in {:#?}",
                    fasta.targets.len(),
                    path,
                    start.elapsed()
                );
                Some(fasta)
            }
            None => None,
        };

        let annotations = match &parameters.uniprot_xml {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read UniProt entries from `{}`", path))?;
                let entries = parse_uniprot(&contents)
                    .with_context(|| format!("Failed to parse UniProt entries from `{}`", path))?;
                info!("loaded {} UniProt entries", entries.len());
                entries
            }
            None => HashMap::default(),
        };

        Ok(Self {
            parameters,
            fasta,
            annotations,
            start,
        })
    }

    // Create a path for `file_name` in the specified output directory
    pub fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    /// One ingestion pass per PSM table, all of them feeding `registry`
    pub fn ingest(&self, registry: &mut Registry) -> anyhow::Result<()> {
        let index = self.fasta.as_ref().map(|f| f as &dyn ProteinIndex);
        for path in &self.parameters.psm_paths {
            let mut builder = GraphBuilder::new(self.parameters.parser.clone(), index);
            let records = read_psms(path)?;
            builder
                .process(registry, records)
                .with_context(|| format!("Failed to process PSMs from `{}`", path))?;
            if !builder.is_processed() {
                log::warn!("`{}` was not fully processed, continuing with partial data", path);
            }
            info!(
                "- {}: {} PSMs, {} peptides, {} proteins",
                path,
                builder.local_psms().len(),
                builder.local_peptides().len(),
                builder.local_proteins().len()
            );
        }
        Ok(())
    }

    /// Condition pairs to report. Without explicit configuration, every pair
    /// observed in the PSM ratios is used.
    pub fn condition_pairs(&self, registry: &Registry) -> Vec<(QuantCondition, QuantCondition)> {
        if !self.parameters.condition_pairs.is_empty() {
            return self
                .parameters
                .condition_pairs
                .iter()
                .map(|(a, b)| (QuantCondition::new(a), QuantCondition::new(b)))
                .collect();
        }
        registry
            .psms()
            .flat_map(|(_, psm)| psm.ratios().iter())
            .map(|r| (r.condition1().clone(), r.condition2().clone()))
            .sorted()
            .dedup()
            .collect()
    }

    /// Raw files contributing PSMs, sorted
    pub fn replicates(&self, registry: &Registry) -> Vec<String> {
        registry
            .psms()
            .map(|(_, psm)| psm.raw_file.clone())
            .sorted()
            .dedup()
            .collect()
    }

    fn node_consensus(
        &self,
        registry: &Registry,
        ix: PeptideNodeIx,
        node: &PeptideNode,
        pairs: &[(QuantCondition, QuantCondition)],
        replicates: &[String],
    ) -> NodeConsensus {
        let all = node.ratios(registry);
        let ratios = pairs
            .iter()
            .filter_map(|(a, b)| consensus_from_ratios(&all, a, b))
            .collect();

        let mut by_replicate = Vec::new();
        if let (true, Some((a, b))) = (self.parameters.consensus_by_replicate, pairs.first()) {
            for replicate in replicates {
                let psm_ratios = node
                    .peptides_in_replicate(registry, replicate)
                    .into_iter()
                    .flat_map(|pep| registry[pep].psms().iter())
                    .filter(|&&psm| registry[psm].raw_file == *replicate)
                    .flat_map(|&psm| registry[psm].ratios().iter());
                if let Some(ratio) = consensus_from_ratios(psm_ratios, a, b) {
                    by_replicate.push((replicate.clone(), ratio));
                }
            }
        }

        NodeConsensus {
            node: ix,
            ratios,
            by_replicate,
        }
    }

    /// Summarize the ratios of every peptide node into consensus ratios
    pub fn quantify(
        &self,
        registry: &Registry,
        graph: &mut ClusterGraph,
        pairs: &[(QuantCondition, QuantCondition)],
        replicates: &[String],
    ) -> usize {
        let start = Instant::now();
        let computed = graph
            .peptide_nodes()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(ix, node)| self.node_consensus(registry, ix, node, pairs, replicates))
            .collect::<Vec<_>>();

        let mut quantified = 0;
        for consensus in computed {
            if !consensus.ratios.is_empty() {
                quantified += 1;
            }
            let node = &mut graph[consensus.node];
            for ratio in consensus.ratios {
                node.add_consensus_ratio(ratio);
            }
            for (replicate, ratio) in consensus.by_replicate {
                node.add_consensus_ratio_in_replicate(ratio, Some(replicate.as_str()));
            }
        }
        info!(
            "- quantified {} peptide nodes in {}ms",
            quantified,
            start.elapsed().as_millis()
        );
        quantified
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.parameters.output_directory).with_context(|| {
            format!(
                "Failed to create output directory `{}`",
                self.parameters.output_directory.display()
            )
        })?;

        let mut registry = Registry::default();
        self.ingest(&mut registry)?;
        info!(
            "ingested {} PSMs, {} peptides and {} proteins",
            registry.psm_count(),
            registry.peptide_count(),
            registry.protein_count()
        );

        let mut graph = ClusterGraph::build(&registry);
        let pairs = self.condition_pairs(&registry);
        let replicates = self.replicates(&registry);
        self.quantify(&registry, &mut graph, &pairs, &replicates);

        log::trace!("writing outputs");
        let path = self.write_peptide_nodes(&registry, &graph, &pairs, &replicates)?;
        self.parameters.output_paths.push(path);
        let path = self.write_protein_nodes(&registry, &graph)?;
        self.parameters.output_paths.push(path);

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);

        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        std::fs::write(&path, bytes)?;

        let run_time = (Instant::now() - self.start).as_secs();
        info!("finished in {}s", run_time);
        Ok(())
    }
}
