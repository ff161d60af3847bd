//! # Peptide nodes, protein nodes and protein clusters
//!
//! After ingestion, the raw peptide/protein graph held by the [`Registry`]
//! is coarsened into a [`ClusterGraph`]:
//!
//! - all peptides sharing a plain sequence form one [`PeptideNode`]
//! - proteins connected to exactly the same set of peptide nodes are
//!   indistinguishable and form one [`ProteinNode`]
//! - every connected component of the resulting graph is a [`ProteinCluster`]
//!
//! Peptide nodes additionally hold consensus ratios, resolved per pair of
//! conditions and optionally per replicate, with a fallback to ratios derived
//! from isobaric ion counts.

use crate::ratio::{ion_count_ratio, QuantCondition, QuantRatio};
use crate::registry::{PeptideIx, ProteinIx, PsmIx, Registry};
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::ops::{Index, IndexMut};
use std::sync::Arc;
use std::time::Instant;

#[derive(Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct ClusterIx(pub u32);

#[derive(Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct PeptideNodeIx(pub u32);

#[derive(Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct ProteinNodeIx(pub u32);

#[derive(Debug)]
pub struct PeptideNode {
    key: Arc<str>,
    cluster: ClusterIx,
    peptides: FnvHashSet<PeptideIx>,
    protein_nodes: FnvHashSet<ProteinNodeIx>,
    confidence_value: Option<f64>,
    consensus_ratios: FnvHashSet<QuantRatio>,
    consensus_ratios_by_replicate: FnvHashMap<String, QuantRatio>,
}

impl PeptideNode {
    fn new(cluster: ClusterIx, key: Arc<str>) -> Self {
        Self {
            key,
            cluster,
            peptides: FnvHashSet::default(),
            protein_nodes: FnvHashSet::default(),
            confidence_value: None,
            consensus_ratios: FnvHashSet::default(),
            consensus_ratios_by_replicate: FnvHashMap::default(),
        }
    }

    /// Unique within the owning cluster
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn sequence(&self) -> &str {
        &self.key
    }

    /// Distinct modified forms of the sequence, sorted and comma separated
    pub fn full_sequence(&self, registry: &Registry) -> String {
        self.peptides
            .iter()
            .map(|&ix| registry[ix].full_sequence.as_str())
            .sorted()
            .dedup()
            .join(",")
    }

    pub fn cluster(&self) -> ClusterIx {
        self.cluster
    }

    pub fn peptides(&self) -> &FnvHashSet<PeptideIx> {
        &self.peptides
    }

    pub fn add_peptide(&mut self, peptide: PeptideIx) -> bool {
        self.peptides.insert(peptide)
    }

    pub fn protein_nodes(&self) -> &FnvHashSet<ProteinNodeIx> {
        &self.protein_nodes
    }

    pub fn confidence_value(&self) -> Option<f64> {
        self.confidence_value
    }

    pub fn set_confidence_value(&mut self, value: f64) {
        self.confidence_value = Some(value);
    }

    pub fn psms(&self, registry: &Registry) -> FnvHashSet<PsmIx> {
        self.peptides
            .iter()
            .flat_map(|&ix| registry[ix].psms().iter().copied())
            .collect()
    }

    /// Proteins of all protein nodes connected to this peptide node
    pub fn proteins(&self, graph: &ClusterGraph) -> FnvHashSet<ProteinIx> {
        self.protein_nodes
            .iter()
            .flat_map(|&ix| graph[ix].proteins.iter().copied())
            .collect()
    }

    pub fn non_discarded_proteins(
        &self,
        graph: &ClusterGraph,
        registry: &Registry,
    ) -> FnvHashSet<ProteinIx> {
        self.proteins(graph)
            .into_iter()
            .filter(|&ix| !registry[ix].is_discarded())
            .collect()
    }

    /// Union of the taxonomies of the connected proteins
    pub fn taxonomies(&self, graph: &ClusterGraph, registry: &Registry) -> FnvHashSet<String> {
        self.proteins(graph)
            .into_iter()
            .flat_map(|ix| registry[ix].taxonomies.iter().cloned())
            .collect()
    }

    /// Every ratio carried by the peptides of the node and by their PSMs.
    /// Equal values reported by different PSMs are kept as separate samples.
    pub fn ratios(&self, registry: &Registry) -> Vec<QuantRatio> {
        let mut ratios = Vec::new();
        for &ix in self.peptides.iter().sorted() {
            let peptide = &registry[ix];
            ratios.extend(peptide.ratios.iter().cloned());
            for &psm in peptide.psms().iter().sorted() {
                ratios.extend(registry[psm].ratios().iter().cloned());
            }
        }
        ratios
    }

    pub fn non_infinity_ratios(&self, registry: &Registry) -> Vec<QuantRatio> {
        let mut ratios = self.ratios(registry);
        ratios.retain(|r| !r.is_infinite());
        ratios
    }

    /// Peptides of this node identified in the given raw file
    pub fn peptides_in_replicate(
        &self,
        registry: &Registry,
        replicate: &str,
    ) -> FnvHashSet<PeptideIx> {
        self.peptides
            .iter()
            .copied()
            .filter(|&ix| registry[ix].raw_files().contains(replicate))
            .collect()
    }

    pub fn consensus_ratios(&self) -> &FnvHashSet<QuantRatio> {
        &self.consensus_ratios
    }

    pub fn add_consensus_ratio(&mut self, ratio: QuantRatio) -> bool {
        self.consensus_ratios.insert(ratio)
    }

    /// Store a ratio for a replicate, replacing any previous one. Returns
    /// whether a previous value existed. Without a replicate name this is
    /// [`PeptideNode::add_consensus_ratio`].
    pub fn add_consensus_ratio_in_replicate(
        &mut self,
        ratio: QuantRatio,
        replicate: Option<&str>,
    ) -> bool {
        match replicate {
            Some(name) => self
                .consensus_ratios_by_replicate
                .insert(name.to_string(), ratio)
                .is_some(),
            None => self.add_consensus_ratio(ratio),
        }
    }

    /// Resolve the consensus ratio between two conditions.
    ///
    /// With a replicate name, only the ratio stored for that replicate is
    /// considered. Otherwise a stored consensus ratio relating both
    /// conditions (in either order) is returned as stored, and if there is
    /// none, a ratio pooled from the isobaric ion counts of the node's PSMs.
    pub fn consensus_ratio(
        &self,
        registry: &Registry,
        condition1: &QuantCondition,
        condition2: &QuantCondition,
        replicate: Option<&str>,
    ) -> Option<QuantRatio> {
        if let Some(name) = replicate {
            return self.consensus_ratios_by_replicate.get(name).cloned();
        }

        let exact = self
            .consensus_ratios
            .iter()
            .find(|r| r.condition1() == condition1 && r.condition2() == condition2);
        if let Some(ratio) = exact.or_else(|| {
            self.consensus_ratios
                .iter()
                .find(|r| r.matches(condition1, condition2))
        }) {
            return Some(ratio.clone());
        }

        self.ion_count_ratio(registry, condition1, condition2)
    }

    /// Ratio pooled over the ion counts of every isobaric peptide in the node
    pub fn ion_count_ratio(
        &self,
        registry: &Registry,
        condition1: &QuantCondition,
        condition2: &QuantCondition,
    ) -> Option<QuantRatio> {
        let isobaric = self
            .peptides
            .iter()
            .copied()
            .filter(|&ix| registry.is_isobaric(ix))
            .collect::<Vec<_>>();
        if isobaric.is_empty() {
            return None;
        }
        let counts = isobaric
            .iter()
            .flat_map(|&ix| registry[ix].psms().iter())
            .filter_map(|&psm| registry[psm].ion_counts());
        ion_count_ratio(counts, condition1, condition2)
    }

    /// Detach every peptide of this node from the proteins it belonged to.
    /// The peptides themselves remain in the registry; calling this again is
    /// a no-op.
    pub fn remove_peptides_from_proteins_in_node(&self, registry: &mut Registry) {
        for &peptide in self.peptides.iter().sorted() {
            let unlinked = registry.discard_peptide(peptide);
            if unlinked > 0 {
                debug!("{} unlinked from {} proteins", self.key, unlinked);
            }
        }
    }
}

impl Display for PeptideNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}'}}", self.key)
    }
}

#[derive(Debug)]
pub struct ProteinNode {
    key: String,
    cluster: ClusterIx,
    proteins: FnvHashSet<ProteinIx>,
    peptide_nodes: FnvHashSet<PeptideNodeIx>,
}

impl ProteinNode {
    /// Sorted protein keys, `#` separated
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn cluster(&self) -> ClusterIx {
        self.cluster
    }

    pub fn proteins(&self) -> &FnvHashSet<ProteinIx> {
        &self.proteins
    }

    pub fn add_protein(&mut self, protein: ProteinIx) -> bool {
        self.proteins.insert(protein)
    }

    pub fn peptide_nodes(&self) -> &FnvHashSet<PeptideNodeIx> {
        &self.peptide_nodes
    }

    pub fn accessions<'r>(&self, registry: &'r Registry) -> Vec<&'r str> {
        self.proteins
            .iter()
            .map(|&ix| registry[ix].accession.as_str())
            .sorted()
            .collect()
    }

    pub fn non_discarded_proteins(&self, registry: &Registry) -> FnvHashSet<ProteinIx> {
        self.proteins
            .iter()
            .copied()
            .filter(|&ix| !registry[ix].is_discarded())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct ProteinCluster {
    peptide_nodes: FnvHashMap<Arc<str>, PeptideNodeIx>,
    protein_nodes: FnvHashSet<ProteinNodeIx>,
}

impl ProteinCluster {
    /// Register a peptide node under its key. A cluster never holds two
    /// nodes with the same key, so a duplicate is refused.
    pub fn add_peptide_node(&mut self, key: Arc<str>, node: PeptideNodeIx) -> bool {
        if self.peptide_nodes.contains_key(&key) {
            return false;
        }
        self.peptide_nodes.insert(key, node);
        true
    }

    pub fn add_protein_node(&mut self, node: ProteinNodeIx) -> bool {
        self.protein_nodes.insert(node)
    }

    pub fn peptide_node(&self, key: &str) -> Option<PeptideNodeIx> {
        self.peptide_nodes.get(key).copied()
    }

    /// Peptide nodes, ordered by index
    pub fn peptide_nodes(&self) -> Vec<PeptideNodeIx> {
        self.peptide_nodes.values().copied().sorted().collect()
    }

    pub fn protein_nodes(&self) -> Vec<ProteinNodeIx> {
        self.protein_nodes.iter().copied().sorted().collect()
    }
}

/// Arena of clusters and nodes
#[derive(Debug, Default)]
pub struct ClusterGraph {
    clusters: Vec<ProteinCluster>,
    peptide_nodes: Vec<PeptideNode>,
    protein_nodes: Vec<ProteinNode>,
}

struct DisjointSet(Vec<usize>);

impl DisjointSet {
    fn find(&mut self, mut x: usize) -> usize {
        while self.0[x] != x {
            self.0[x] = self.0[self.0[x]];
            x = self.0[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        // Smallest index is the representative, keeps cluster order stable
        if a < b {
            self.0[b] = a;
        } else if b < a {
            self.0[a] = b;
        }
    }
}

impl ClusterGraph {
    /// Coarsen the peptide/protein graph of `registry`. Peptides without any
    /// protein are left out; discarded proteins stay in the graph.
    pub fn build(registry: &Registry) -> Self {
        let time = Instant::now();

        // Sorted by sequence, needed for a deterministic node order
        let mut groups: BTreeMap<&str, Vec<PeptideIx>> = BTreeMap::new();
        let mut orphans = 0;
        for (ix, peptide) in registry.peptides() {
            if peptide.proteins().is_empty() {
                orphans += 1;
                continue;
            }
            groups.entry(peptide.sequence.as_str()).or_default().push(ix);
        }
        if orphans > 0 {
            debug!("{} peptides without proteins left out of clusters", orphans);
        }
        let groups = groups.into_iter().collect::<Vec<_>>();
        let group_of = groups
            .iter()
            .enumerate()
            .flat_map(|(g, (_, peps))| peps.iter().map(move |&ix| (ix, g)))
            .collect::<FnvHashMap<_, _>>();

        // Peptide node (group) indices reachable from each protein
        let memberships = registry
            .proteins()
            .filter_map(|(ix, protein)| {
                let members = protein
                    .peptides()
                    .iter()
                    .filter_map(|pep| group_of.get(pep).copied())
                    .sorted()
                    .dedup()
                    .collect::<Vec<_>>();
                (!members.is_empty()).then_some((ix, members))
            })
            .collect::<Vec<_>>();

        let mut components = DisjointSet((0..groups.len()).collect());
        for (_, members) in &memberships {
            for pair in members.windows(2) {
                components.union(pair[0], pair[1]);
            }
        }

        // Indistinguishable proteins: identical peptide node sets
        let mut protein_groups: BTreeMap<usize, FnvHashMap<&[usize], Vec<ProteinIx>>> =
            BTreeMap::new();
        for (ix, members) in &memberships {
            let root = components.find(members[0]);
            protein_groups
                .entry(root)
                .or_default()
                .entry(members.as_slice())
                .or_default()
                .push(*ix);
        }

        let mut graph = ClusterGraph::default();
        let mut cluster_of_root = FnvHashMap::default();
        let mut node_of_group = vec![PeptideNodeIx(0); groups.len()];

        for (g, (sequence, peptides)) in groups.iter().enumerate() {
            let root = components.find(g);
            let cluster = *cluster_of_root
                .entry(root)
                .or_insert_with(|| graph.new_cluster());
            let Some(node) = graph.new_peptide_node(cluster, Arc::from(*sequence)) else {
                continue;
            };
            for &peptide in peptides {
                graph[node].add_peptide(peptide);
            }
            node_of_group[g] = node;
        }

        for (root, nodes) in protein_groups {
            let cluster = cluster_of_root[&root];
            for (members, proteins) in nodes.into_iter().sorted() {
                let key = proteins
                    .iter()
                    .map(|&ix| &*registry[ix].key)
                    .sorted()
                    .join("#");
                let node = graph.new_protein_node(cluster, key);
                for protein in proteins {
                    graph[node].add_protein(protein);
                }
                for &g in members {
                    graph.link(node_of_group[g], node);
                }
            }
        }

        info!(
            "- built {} clusters, {} peptide nodes and {} protein nodes in {}ms",
            graph.clusters.len(),
            graph.peptide_nodes.len(),
            graph.protein_nodes.len(),
            time.elapsed().as_millis()
        );
        graph
    }

    pub fn new_cluster(&mut self) -> ClusterIx {
        self.clusters.push(ProteinCluster::default());
        ClusterIx(self.clusters.len() as u32 - 1)
    }

    /// Create a peptide node in `cluster`. Returns `None` if the cluster
    /// already holds a node with that key.
    pub fn new_peptide_node(&mut self, cluster: ClusterIx, key: Arc<str>) -> Option<PeptideNodeIx> {
        let ix = PeptideNodeIx(self.peptide_nodes.len() as u32);
        if !self.clusters[cluster.0 as usize].add_peptide_node(key.clone(), ix) {
            return None;
        }
        self.peptide_nodes.push(PeptideNode::new(cluster, key));
        Some(ix)
    }

    pub fn new_protein_node(&mut self, cluster: ClusterIx, key: String) -> ProteinNodeIx {
        let ix = ProteinNodeIx(self.protein_nodes.len() as u32);
        self.clusters[cluster.0 as usize].add_protein_node(ix);
        self.protein_nodes.push(ProteinNode {
            key,
            cluster,
            proteins: FnvHashSet::default(),
            peptide_nodes: FnvHashSet::default(),
        });
        ix
    }

    /// Connect a peptide node and a protein node, on both sides. Returns
    /// whether the edge is new.
    pub fn link(&mut self, peptide_node: PeptideNodeIx, protein_node: ProteinNodeIx) -> bool {
        let a = self.peptide_nodes[peptide_node.0 as usize]
            .protein_nodes
            .insert(protein_node);
        let b = self.protein_nodes[protein_node.0 as usize]
            .peptide_nodes
            .insert(peptide_node);
        a || b
    }

    pub fn clusters(&self) -> impl Iterator<Item = (ClusterIx, &ProteinCluster)> {
        self.clusters
            .iter()
            .enumerate()
            .map(|(ix, c)| (ClusterIx(ix as u32), c))
    }

    pub fn peptide_nodes(&self) -> impl Iterator<Item = (PeptideNodeIx, &PeptideNode)> {
        self.peptide_nodes
            .iter()
            .enumerate()
            .map(|(ix, n)| (PeptideNodeIx(ix as u32), n))
    }

    pub fn protein_nodes(&self) -> impl Iterator<Item = (ProteinNodeIx, &ProteinNode)> {
        self.protein_nodes
            .iter()
            .enumerate()
            .map(|(ix, n)| (ProteinNodeIx(ix as u32), n))
    }

    pub fn peptide_node_by_key(&self, cluster: ClusterIx, key: &str) -> Option<PeptideNodeIx> {
        self.clusters.get(cluster.0 as usize)?.peptide_node(key)
    }

    /// Protein node containing the given protein, if it was clustered
    pub fn protein_node_of(&self, protein: ProteinIx) -> Option<ProteinNodeIx> {
        self.protein_nodes()
            .find(|(_, node)| node.proteins.contains(&protein))
            .map(|(ix, _)| ix)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }
}

impl Index<ClusterIx> for ClusterGraph {
    type Output = ProteinCluster;

    fn index(&self, index: ClusterIx) -> &Self::Output {
        &self.clusters[index.0 as usize]
    }
}

impl IndexMut<ClusterIx> for ClusterGraph {
    fn index_mut(&mut self, index: ClusterIx) -> &mut Self::Output {
        &mut self.clusters[index.0 as usize]
    }
}

impl Index<PeptideNodeIx> for ClusterGraph {
    type Output = PeptideNode;

    fn index(&self, index: PeptideNodeIx) -> &Self::Output {
        &self.peptide_nodes[index.0 as usize]
    }
}

impl IndexMut<PeptideNodeIx> for ClusterGraph {
    fn index_mut(&mut self, index: PeptideNodeIx) -> &mut Self::Output {
        &mut self.peptide_nodes[index.0 as usize]
    }
}

impl Index<ProteinNodeIx> for ClusterGraph {
    type Output = ProteinNode;

    fn index(&self, index: ProteinNodeIx) -> &Self::Output {
        &self.protein_nodes[index.0 as usize]
    }
}

impl IndexMut<ProteinNodeIx> for ClusterGraph {
    fn index_mut(&mut self, index: ProteinNodeIx) -> &mut Self::Output {
        &mut self.protein_nodes[index.0 as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ingest::{Builder, GraphBuilder};
    use crate::psm::PsmRecord;
    use crate::ratio::{consensus_from_ratios, IonCounts, RatioOrigin};

    fn record(raw: &str, scan: &str, full: &str, proteins: &[&str]) -> PsmRecord {
        PsmRecord {
            raw_file: raw.into(),
            scan: scan.into(),
            charge: Some(2),
            sequence: full.into(),
            full_sequence: full.into(),
            accessions: proteins.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn ingest(records: &[PsmRecord]) -> Registry {
        let mut registry = Registry::default();
        let settings = Builder::default().make_settings().unwrap();
        let mut builder = GraphBuilder::new(settings, None);
        for r in records {
            builder.ingest(&mut registry, r).unwrap();
        }
        registry
    }

    fn example() -> Registry {
        ingest(&[
            record("rep1", "1", "AAMK", &["P1", "P2", "P5"]),
            record("rep2", "1", "AAM(15.99)K", &["P1", "P2", "P5"]),
            record("rep1", "2", "CCCK", &["P1", "P2", "P5"]),
            record("rep1", "3", "DDDK", &["P2", "P3"]),
            record("rep1", "4", "EEEK", &["P4"]),
            record("rep1", "5", "FFFK", &[]),
        ])
    }

    fn protein_node_keys(graph: &ClusterGraph) -> Vec<String> {
        graph
            .protein_nodes()
            .map(|(_, n)| n.key().to_string())
            .sorted()
            .collect()
    }

    #[test]
    fn peptides_group_by_sequence() {
        let registry = example();
        // Modified and unmodified forms are distinct peptides...
        assert_eq!(registry.peptide_count(), 6);
        let graph = ClusterGraph::build(&registry);

        // ...but the same peptide node
        let (ix, node) = graph
            .peptide_nodes()
            .find(|(_, n)| n.key() == "AAMK")
            .unwrap();
        assert_eq!(node.peptides().len(), 2);
        assert_eq!(node.full_sequence(&registry), "AAM(15.99)K,AAMK");
        assert_eq!(node.to_string(), "{AAMK'}");
        assert_eq!(graph.peptide_node_by_key(node.cluster(), "AAMK"), Some(ix));

        // FFFK has no protein
        assert_eq!(graph.peptide_nodes().count(), 4);
        assert_eq!(graph.cluster_count(), 2);
    }

    #[test]
    fn proteins_group_by_exact_peptide_sets() {
        let registry = example();
        let graph = ClusterGraph::build(&registry);
        assert_eq!(protein_node_keys(&graph), vec!["P1#P5", "P2", "P3", "P4"]);

        for (pn_ix, pn) in graph.protein_nodes() {
            for &node in pn.peptide_nodes() {
                assert!(graph[node].protein_nodes().contains(&pn_ix));
                assert_eq!(graph[node].cluster(), pn.cluster());
            }
        }
        for (ix, node) in graph.peptide_nodes() {
            for &pn in node.protein_nodes() {
                assert!(graph[pn].peptide_nodes().contains(&ix));
            }
            let cluster = &graph[node.cluster()];
            assert_eq!(cluster.peptide_node(node.key()), Some(ix));
        }

        let p2 = registry.protein_by_key("P2").unwrap();
        let p2_node = graph.protein_node_of(p2).unwrap();
        assert_eq!(graph[p2_node].peptide_nodes().len(), 3);
    }

    #[test]
    fn duplicate_peptide_node_key_is_refused() {
        let mut graph = ClusterGraph::default();
        let c = graph.new_cluster();
        let other = graph.new_cluster();
        assert!(graph.new_peptide_node(c, "PEPTIDE".into()).is_some());
        assert!(graph.new_peptide_node(c, "PEPTIDE".into()).is_none());
        assert!(graph.new_peptide_node(other, "PEPTIDE".into()).is_some());

        let pn = graph.new_protein_node(c, "P1".into());
        let node = graph.peptide_node_by_key(c, "PEPTIDE").unwrap();
        assert!(graph.link(node, pn));
        assert!(!graph.link(node, pn));
        assert!(graph[pn].add_protein(ProteinIx(0)));
        assert!(!graph[pn].add_protein(ProteinIx(0)));
        assert!(!graph[c].add_peptide_node("PEPTIDE".into(), node));
        assert_eq!(graph[c].peptide_nodes(), vec![node]);
        assert_eq!(graph[c].protein_nodes(), vec![pn]);

        assert_eq!(graph[node].confidence_value(), None);
        graph[node].set_confidence_value(0.01);
        assert_eq!(graph[node].confidence_value(), Some(0.01));
    }

    #[test]
    fn remove_peptides_twice() {
        let mut registry = example();
        let graph = ClusterGraph::build(&registry);
        let ix = graph
            .peptide_nodes()
            .find(|(_, n)| n.key() == "DDDK")
            .map(|(ix, _)| ix)
            .unwrap();

        let snapshot = |registry: &Registry| {
            registry
                .proteins()
                .map(|(_, p)| {
                    let peptides = p.peptides().iter().copied().sorted().collect::<Vec<_>>();
                    (p.key.clone(), peptides, p.is_discarded())
                })
                .collect::<Vec<_>>()
        };

        graph[ix].remove_peptides_from_proteins_in_node(&mut registry);
        let once = snapshot(&registry);
        graph[ix].remove_peptides_from_proteins_in_node(&mut registry);
        assert_eq!(once, snapshot(&registry));

        // P3 only had DDDK and is now a tombstone, still reachable from the node
        let p3 = registry.protein_by_key("P3").unwrap();
        assert!(registry[p3].is_discarded());
        assert!(graph[ix].proteins(&graph).contains(&p3));
        assert!(!graph[ix].non_discarded_proteins(&graph, &registry).contains(&p3));
        assert_eq!(registry.peptide_count(), 6);
    }

    #[test]
    fn taxonomies_and_replicates() {
        let mut registry = example();
        let p1 = registry.protein_by_key("P1").unwrap();
        registry.protein_mut(p1).taxonomies.insert("Homo sapiens".into());
        let graph = ClusterGraph::build(&registry);
        let (_, node) = graph.peptide_nodes().find(|(_, n)| n.key() == "AAMK").unwrap();
        assert!(node.taxonomies(&graph, &registry).contains("Homo sapiens"));
        assert_eq!(node.peptides_in_replicate(&registry, "rep1").len(), 1);
        assert_eq!(node.peptides_in_replicate(&registry, "rep2").len(), 1);
        assert!(node.peptides_in_replicate(&registry, "rep3").is_empty());
        assert_eq!(node.psms(&registry).len(), 2);
    }

    fn conds() -> (QuantCondition, QuantCondition) {
        (QuantCondition::new("A"), QuantCondition::new("B"))
    }

    #[test]
    fn consensus_is_direction_agnostic() {
        let registry = example();
        let mut graph = ClusterGraph::build(&registry);
        let (a, b) = conds();
        let ix = graph.peptide_nodes().next().map(|(ix, _)| ix).unwrap();

        assert!(graph[ix].consensus_ratio(&registry, &a, &b, None).is_none());

        let stored = QuantRatio::new(b.clone(), a.clone(), 1.5, RatioOrigin::Consensus);
        assert!(graph[ix].add_consensus_ratio(stored.clone()));
        assert!(!graph[ix].add_consensus_ratio(stored.clone()));
        assert_eq!(graph[ix].consensus_ratio(&registry, &a, &b, None), Some(stored.clone()));
        assert_eq!(graph[ix].consensus_ratio(&registry, &b, &a, None), Some(stored));
    }

    #[test]
    fn replicate_scoped_consensus() {
        let registry = example();
        let mut graph = ClusterGraph::build(&registry);
        let (a, b) = conds();
        let ix = graph.peptide_nodes().next().map(|(ix, _)| ix).unwrap();

        let global = QuantRatio::new(a.clone(), b.clone(), 0.5, RatioOrigin::Consensus);
        let r1 = QuantRatio::new(a.clone(), b.clone(), 2.0, RatioOrigin::Consensus);
        let r1_update = QuantRatio::new(a.clone(), b.clone(), 3.0, RatioOrigin::Consensus);
        graph[ix].add_consensus_ratio(global.clone());
        assert!(!graph[ix].add_consensus_ratio_in_replicate(r1, Some("R1")));
        assert!(graph[ix].add_consensus_ratio_in_replicate(r1_update.clone(), Some("R1")));

        let node = &graph[ix];
        assert_eq!(node.consensus_ratio(&registry, &a, &b, Some("R1")), Some(r1_update));
        assert_eq!(node.consensus_ratio(&registry, &a, &b, None), Some(global.clone()));
        assert_eq!(node.consensus_ratio(&registry, &a, &b, Some("R2")), None);

        // No replicate name delegates to the unscoped set
        let other = QuantRatio::new(a.clone(), b.clone(), 0.25, RatioOrigin::Consensus);
        assert!(graph[ix].add_consensus_ratio_in_replicate(other, None));
        assert_eq!(graph[ix].consensus_ratios().len(), 2);
    }

    #[test]
    fn ion_count_fallback() {
        let (a, b) = conds();
        let mut tmt = record("rep1", "1", "GGGK", &["P9"]);
        let mut counts = IonCounts::default();
        counts.push(a.clone(), 300.0);
        counts.push(b.clone(), 100.0);
        tmt.ion_counts = Some(counts.clone());
        let mut tmt2 = record("rep2", "7", "GGGK", &["P9"]);
        tmt2.ion_counts = Some(counts);

        let registry = ingest(&[tmt, tmt2]);
        let graph = ClusterGraph::build(&registry);
        let (_, node) = graph.peptide_nodes().next().unwrap();

        let ratio = node.consensus_ratio(&registry, &a, &b, None).unwrap();
        assert_eq!(ratio.origin(), RatioOrigin::IonCount);
        assert!((ratio.value() - 3.0).abs() < 1e-9);

        let c = QuantCondition::new("C");
        let one_sided = node.consensus_ratio(&registry, &a, &c, None).unwrap();
        assert_eq!(one_sided.log2(), f64::INFINITY);
    }

    #[test]
    fn repeated_ratios_are_separate_samples() {
        let (a, b) = conds();
        let records = [1.0, 1.0, 5.0]
            .iter()
            .enumerate()
            .map(|(scan, &log2)| {
                let mut r = record("rep1", &scan.to_string(), "HHHK", &["P7"]);
                r.ratios = vec![QuantRatio::new(a.clone(), b.clone(), log2, RatioOrigin::Psm)];
                r
            })
            .collect::<Vec<_>>();
        let registry = ingest(&records);
        let graph = ClusterGraph::build(&registry);
        let (_, node) = graph.peptide_nodes().next().unwrap();

        assert_eq!(node.ratios(&registry).len(), 3);
        let consensus = consensus_from_ratios(&node.ratios(&registry), &a, &b).unwrap();
        assert_eq!(consensus.log2(), 1.0);
    }

    #[test]
    fn peptide_ratios_join_psm_ratios() {
        let (a, b) = conds();
        let peptide_ratio = QuantRatio::new(a.clone(), b.clone(), 2.0, RatioOrigin::Peptide);
        let mut first = record("rep1", "1", "IIIK", &["P8"]);
        first.ratios = vec![QuantRatio::new(a.clone(), b.clone(), 1.0, RatioOrigin::Psm)];
        first.peptide_ratios = vec![peptide_ratio.clone()];
        // Reported again on every row of the peptide
        let mut second = record("rep1", "2", "IIIK", &["P8"]);
        second.ratios = vec![QuantRatio::new(a.clone(), b.clone(), f64::INFINITY, RatioOrigin::Psm)];
        second.peptide_ratios = vec![peptide_ratio.clone()];

        let registry = ingest(&[first, second]);
        let graph = ClusterGraph::build(&registry);
        let (_, node) = graph.peptide_nodes().next().unwrap();

        let ratios = node.ratios(&registry);
        assert_eq!(ratios.len(), 3);
        assert!(ratios.contains(&peptide_ratio));
        let finite = node.non_infinity_ratios(&registry);
        assert_eq!(finite.len(), 2);
        assert!(finite.iter().all(|r| !r.is_infinite()));
    }

    #[test]
    fn unscoped_lookup_falls_through_to_ion_counts() {
        let (a, b) = conds();
        let mut tmt = record("rep1", "1", "KKKR", &["P6"]);
        let mut counts = IonCounts::default();
        counts.push(a.clone(), 200.0);
        counts.push(b.clone(), 100.0);
        tmt.ion_counts = Some(counts);

        let registry = ingest(&[tmt]);
        let mut graph = ClusterGraph::build(&registry);
        let ix = graph.peptide_nodes().next().map(|(ix, _)| ix).unwrap();
        let r1 = QuantRatio::new(a.clone(), b.clone(), 4.0, RatioOrigin::Consensus);
        graph[ix].add_consensus_ratio_in_replicate(r1.clone(), Some("rep1"));

        let node = &graph[ix];
        assert_eq!(node.consensus_ratio(&registry, &a, &b, Some("rep1")), Some(r1));
        // A named replicate never falls back
        assert_eq!(node.consensus_ratio(&registry, &a, &b, Some("rep2")), None);

        let pooled = node.consensus_ratio(&registry, &a, &b, None).unwrap();
        assert_eq!(pooled.origin(), RatioOrigin::IonCount);
        assert!((pooled.log2() - 1.0).abs() < 1e-9);
    }
}
