use crate::Runner;
use itertools::Itertools;
use pcq_core::node::{ClusterGraph, PeptideNode, ProteinNode};
use pcq_core::ratio::{QuantCondition, QuantRatio};
use pcq_core::registry::Registry;

const MISSING: &[u8] = b"NA";

fn push_ratio(record: &mut csv::ByteRecord, ratio: Option<QuantRatio>) {
    match ratio {
        Some(ratio) => record.push_field(ryu::Buffer::new().format(ratio.log2()).as_bytes()),
        None => record.push_field(MISSING),
    }
}

impl Runner {
    pub fn serialize_peptide_node(
        &self,
        node: &PeptideNode,
        registry: &Registry,
        graph: &ClusterGraph,
        pairs: &[(QuantCondition, QuantCondition)],
        replicates: &[String],
    ) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        record.push_field(itoa::Buffer::new().format(node.cluster().0).as_bytes());
        record.push_field(node.sequence().as_bytes());
        record.push_field(node.full_sequence(registry).as_bytes());

        let proteins = node
            .non_discarded_proteins(graph, registry)
            .into_iter()
            .map(|ix| registry[ix].accession.as_str())
            .sorted()
            .join(";");
        record.push_field(proteins.as_bytes());
        let taxonomies = node.taxonomies(graph, registry).into_iter().sorted().join(";");
        record.push_field(taxonomies.as_bytes());
        record.push_field(itoa::Buffer::new().format(node.psms(registry).len()).as_bytes());

        for (a, b) in pairs {
            push_ratio(&mut record, node.consensus_ratio(registry, a, b, None));
        }
        if self.parameters.consensus_by_replicate {
            if let Some((a, b)) = pairs.first() {
                for replicate in replicates {
                    push_ratio(
                        &mut record,
                        node.consensus_ratio(registry, a, b, Some(replicate.as_str())),
                    );
                }
            }
        }
        record
    }

    pub fn write_peptide_nodes(
        &self,
        registry: &Registry,
        graph: &ClusterGraph,
        pairs: &[(QuantCondition, QuantCondition)],
        replicates: &[String],
    ) -> anyhow::Result<String> {
        let path = self.make_path("peptide_nodes.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut headers = csv::ByteRecord::from(vec![
            "cluster",
            "peptide_node",
            "full_sequence",
            "proteins",
            "taxonomies",
            "psms",
        ]);
        for (a, b) in pairs {
            headers.push_field(format!("log2ratio_{}/{}", a, b).as_bytes());
        }
        if self.parameters.consensus_by_replicate {
            if let Some((a, b)) = pairs.first() {
                for replicate in replicates {
                    headers.push_field(format!("log2ratio_{}/{}_{}", a, b, replicate).as_bytes());
                }
            }
        }

        wtr.write_byte_record(&headers)?;
        for (_, node) in graph.peptide_nodes() {
            let record = self.serialize_peptide_node(node, registry, graph, pairs, replicates);
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    pub fn serialize_protein_node(
        &self,
        node: &ProteinNode,
        registry: &Registry,
    ) -> csv::ByteRecord {
        let proteins = node.proteins().iter().copied().sorted().collect::<Vec<_>>();
        let psms = proteins
            .iter()
            .flat_map(|&ix| registry[ix].psms().iter())
            .unique()
            .count();

        let mut record = csv::ByteRecord::new();
        record.push_field(itoa::Buffer::new().format(node.cluster().0).as_bytes());
        record.push_field(node.key().as_bytes());
        record.push_field(node.accessions(registry).join(";").as_bytes());
        let descriptions = proteins
            .iter()
            .map(|&ix| registry[ix].description.as_str())
            .filter(|s| !s.is_empty())
            .join(";");
        record.push_field(descriptions.as_bytes());
        let discarded = node.non_discarded_proteins(registry).is_empty();
        record.push_field(if discarded { "true" } else { "false" }.as_bytes());
        record.push_field(itoa::Buffer::new().format(node.peptide_nodes().len()).as_bytes());
        record.push_field(itoa::Buffer::new().format(psms).as_bytes());

        for column in &self.parameters.columns {
            let values = proteins
                .iter()
                .flat_map(|&ix| column.values_for_protein(&registry[ix].accession, &self.annotations))
                .unique()
                .join(";");
            match values.is_empty() {
                true => record.push_field(MISSING),
                false => record.push_field(values.as_bytes()),
            }
        }
        record
    }

    pub fn write_protein_nodes(
        &self,
        registry: &Registry,
        graph: &ClusterGraph,
    ) -> anyhow::Result<String> {
        let path = self.make_path("protein_nodes.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut headers = csv::ByteRecord::from(vec![
            "cluster",
            "protein_node",
            "accessions",
            "descriptions",
            "discarded",
            "peptide_nodes",
            "psms",
        ]);
        for column in &self.parameters.columns {
            headers.push_field(column.column_name().as_bytes());
        }

        wtr.write_byte_record(&headers)?;
        for (_, node) in graph.protein_nodes() {
            wtr.write_byte_record(&self.serialize_protein_node(node, registry))?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }
}
