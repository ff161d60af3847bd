//! Run-scoped deduplication store for PSMs, peptides and proteins.
//!
//! Entities live in arenas and are addressed by stable indices; every
//! relation is stored as an index set on both sides, and all link operations
//! go through [`Registry`] so that the two sides never disagree.
//!
//! A registry is shared between ingestion passes by passing `&mut Registry`
//! to each of them in turn, which also guarantees that passes never run
//! concurrently.

use crate::peptide::Peptide;
use crate::protein::Protein;
use crate::psm::Psm;
use fnv::FnvHashMap;
use std::ops::Index;
use std::sync::Arc;

#[derive(Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct PsmIx(pub u32);

#[derive(Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct PeptideIx(pub u32);

#[derive(Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct ProteinIx(pub u32);

#[derive(Default, Debug)]
pub struct Registry {
    psms: Vec<Psm>,
    peptides: Vec<Peptide>,
    proteins: Vec<Protein>,
    psm_keys: FnvHashMap<Arc<str>, PsmIx>,
    peptide_keys: FnvHashMap<Arc<str>, PeptideIx>,
    protein_keys: FnvHashMap<Arc<str>, ProteinIx>,
}

/// Check-then-insert on one arena. Returns the index and whether the
/// factory was invoked.
fn get_or_insert<T, I: Copy>(
    keys: &mut FnvHashMap<Arc<str>, I>,
    items: &mut Vec<T>,
    key: &str,
    make_ix: fn(u32) -> I,
    factory: impl FnOnce(Arc<str>) -> T,
) -> (I, bool) {
    match keys.get(key) {
        Some(&ix) => (ix, false),
        None => {
            let key: Arc<str> = Arc::from(key);
            let ix = make_ix(items.len() as u32);
            items.push(factory(key.clone()));
            keys.insert(key, ix);
            (ix, true)
        }
    }
}

impl Registry {
    pub fn get_or_create_psm(
        &mut self,
        key: &str,
        factory: impl FnOnce(Arc<str>) -> Psm,
    ) -> (PsmIx, bool) {
        get_or_insert(&mut self.psm_keys, &mut self.psms, key, PsmIx, factory)
    }

    pub fn get_or_create_peptide(
        &mut self,
        key: &str,
        factory: impl FnOnce(Arc<str>) -> Peptide,
    ) -> (PeptideIx, bool) {
        get_or_insert(
            &mut self.peptide_keys,
            &mut self.peptides,
            key,
            PeptideIx,
            factory,
        )
    }

    pub fn get_or_create_protein(
        &mut self,
        key: &str,
        factory: impl FnOnce(Arc<str>) -> Protein,
    ) -> (ProteinIx, bool) {
        get_or_insert(
            &mut self.protein_keys,
            &mut self.proteins,
            key,
            ProteinIx,
            factory,
        )
    }

    pub fn psm_by_key(&self, key: &str) -> Option<PsmIx> {
        self.psm_keys.get(key).copied()
    }

    pub fn peptide_by_key(&self, key: &str) -> Option<PeptideIx> {
        self.peptide_keys.get(key).copied()
    }

    pub fn protein_by_key(&self, key: &str) -> Option<ProteinIx> {
        self.protein_keys.get(key).copied()
    }

    pub fn psm_mut(&mut self, ix: PsmIx) -> &mut Psm {
        &mut self.psms[ix.0 as usize]
    }

    pub fn peptide_mut(&mut self, ix: PeptideIx) -> &mut Peptide {
        &mut self.peptides[ix.0 as usize]
    }

    pub fn protein_mut(&mut self, ix: ProteinIx) -> &mut Protein {
        &mut self.proteins[ix.0 as usize]
    }

    pub fn psms(&self) -> impl Iterator<Item = (PsmIx, &Psm)> {
        self.psms
            .iter()
            .enumerate()
            .map(|(ix, psm)| (PsmIx(ix as u32), psm))
    }

    pub fn peptides(&self) -> impl Iterator<Item = (PeptideIx, &Peptide)> {
        self.peptides
            .iter()
            .enumerate()
            .map(|(ix, pep)| (PeptideIx(ix as u32), pep))
    }

    pub fn proteins(&self) -> impl Iterator<Item = (ProteinIx, &Protein)> {
        self.proteins
            .iter()
            .enumerate()
            .map(|(ix, prot)| (ProteinIx(ix as u32), prot))
    }

    pub fn psm_count(&self) -> usize {
        self.psms.len()
    }

    pub fn peptide_count(&self) -> usize {
        self.peptides.len()
    }

    pub fn protein_count(&self) -> usize {
        self.proteins.len()
    }

    /// Assign a PSM to its peptide. A PSM references exactly one peptide.
    pub fn link_psm_peptide(&mut self, psm: PsmIx, peptide: PeptideIx) -> bool {
        let previous = self.psms[psm.0 as usize].peptide.replace(peptide);
        if let Some(previous) = previous.filter(|&p| p != peptide) {
            self.peptides[previous.0 as usize].psms.remove(&psm);
        }
        let raw_file = self.psms[psm.0 as usize].raw_file.clone();
        let pep = &mut self.peptides[peptide.0 as usize];
        pep.raw_files.insert(raw_file);
        pep.psms.insert(psm)
    }

    pub fn link_psm_protein(&mut self, psm: PsmIx, protein: ProteinIx) -> bool {
        let a = self.psms[psm.0 as usize].proteins.insert(protein);
        let b = self.proteins[protein.0 as usize].psms.insert(psm);
        a || b
    }

    pub fn link_peptide_protein(&mut self, peptide: PeptideIx, protein: ProteinIx) -> bool {
        let a = self.peptides[peptide.0 as usize].proteins.insert(protein);
        let b = self.proteins[protein.0 as usize].peptides.insert(peptide);
        a || b
    }

    /// Remove the peptide, and the PSMs it owns, from a protein
    pub fn unlink_peptide_protein(&mut self, peptide: PeptideIx, protein: ProteinIx) -> bool {
        let a = self.peptides[peptide.0 as usize].proteins.remove(&protein);
        let b = self.proteins[protein.0 as usize].peptides.remove(&peptide);
        let psms = self.peptides[peptide.0 as usize]
            .psms
            .iter()
            .copied()
            .collect::<Vec<_>>();
        for psm in psms {
            self.psms[psm.0 as usize].proteins.remove(&protein);
            self.proteins[protein.0 as usize].psms.remove(&psm);
        }
        a || b
    }

    pub fn discard_protein(&mut self, protein: ProteinIx) -> bool {
        !std::mem::replace(&mut self.proteins[protein.0 as usize].discarded, true)
    }

    /// Detach a peptide from every protein it belonged to. Proteins left
    /// without any peptide are discarded. The peptide itself stays in the
    /// registry. Returns the number of proteins that were unlinked.
    pub fn discard_peptide(&mut self, peptide: PeptideIx) -> usize {
        let mut proteins = self.peptides[peptide.0 as usize]
            .proteins
            .iter()
            .copied()
            .collect::<Vec<_>>();
        proteins.sort_unstable();
        for &protein in &proteins {
            self.unlink_peptide_protein(peptide, protein);
            if self.proteins[protein.0 as usize].peptides.is_empty() {
                self.discard_protein(protein);
            }
        }
        proteins.len()
    }

    /// Does any PSM of this peptide carry isobaric ion counts?
    pub fn is_isobaric(&self, peptide: PeptideIx) -> bool {
        self[peptide]
            .psms
            .iter()
            .any(|&psm| self[psm].ion_counts().is_some())
    }
}

impl Index<PsmIx> for Registry {
    type Output = Psm;

    fn index(&self, index: PsmIx) -> &Self::Output {
        &self.psms[index.0 as usize]
    }
}

impl Index<PeptideIx> for Registry {
    type Output = Peptide;

    fn index(&self, index: PeptideIx) -> &Self::Output {
        &self.peptides[index.0 as usize]
    }
}

impl Index<ProteinIx> for Registry {
    type Output = Protein;

    fn index(&self, index: ProteinIx) -> &Self::Output {
        &self.proteins[index.0 as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::psm::PsmRecord;

    fn record(scan: &str) -> PsmRecord {
        PsmRecord {
            raw_file: "run1".into(),
            scan: scan.into(),
            sequence: "PEPTIDE".into(),
            full_sequence: "PEPTIDE".into(),
            ..Default::default()
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut registry = Registry::default();
        let r = record("1");
        let mut built = 0;
        let (a, created_a) = registry.get_or_create_psm("run1-1", |key| {
            built += 1;
            Psm::new(key, &r, "PEPTIDE".into())
        });
        let (b, created_b) = registry.get_or_create_psm("run1-1", |key| {
            built += 1;
            Psm::new(key, &r, "PEPTIDE".into())
        });
        assert_eq!(a, b);
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(built, 1);
        assert_eq!(registry.psm_count(), 1);
        assert_eq!(registry.psm_by_key("run1-1"), Some(a));
        assert_eq!(&*registry[a].key, "run1-1");
    }

    #[test]
    fn symmetric_links_and_discard() {
        let mut registry = Registry::default();
        let r = record("1");
        let (psm, _) = registry.get_or_create_psm("s1", |k| Psm::new(k, &r, "PEPTIDE".into()));
        let (pep, _) = registry.get_or_create_peptide("PEPTIDE", |k| {
            Peptide::new(k, "PEPTIDE".into(), "PEPTIDE".into())
        });
        let (p1, _) = registry.get_or_create_protein("P1", |k| Protein::new(k, "P1".into(), "".into()));
        let (p2, _) = registry.get_or_create_protein("P2", |k| Protein::new(k, "P2".into(), "".into()));

        assert!(registry.link_psm_peptide(psm, pep));
        assert!(!registry.link_psm_peptide(psm, pep));
        for prot in [p1, p2] {
            assert!(registry.link_psm_protein(psm, prot));
            assert!(registry.link_peptide_protein(pep, prot));
            assert!(!registry.link_peptide_protein(pep, prot));
        }
        assert_eq!(registry[pep].raw_files().len(), 1);
        assert_eq!(registry[psm].peptide(), Some(pep));
        assert!(registry[p1].peptides().contains(&pep));
        assert!(registry[p1].psms().contains(&psm));

        assert_eq!(registry.discard_peptide(pep), 2);
        assert!(registry[pep].proteins().is_empty());
        assert!(registry[psm].proteins().is_empty());
        assert!(registry[p1].peptides().is_empty());
        assert!(registry[p2].psms().is_empty());
        assert!(registry[p1].is_discarded());

        // Second call is a no-op
        assert_eq!(registry.discard_peptide(pep), 0);
        assert_eq!(registry.peptide_count(), 1);
        assert_eq!(registry.protein_count(), 2);
    }
}
