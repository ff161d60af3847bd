//! Quantitative ratios between experimental conditions
//!
//! Ratios are stored as log2 values: a positive infinity means signal was only
//! observed in the first condition, a negative infinity means signal was only
//! observed in the second one.

use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A named experimental condition (e.g. a TMT channel group or a SILAC label)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuantCondition(Arc<str>);

impl QuantCondition {
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self(Arc::from(name.as_ref().trim()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Display for QuantCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where did a ratio come from?
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RatioOrigin {
    Psm,
    Peptide,
    Consensus,
    IonCount,
}

#[derive(Clone, Debug)]
pub struct QuantRatio {
    condition1: QuantCondition,
    condition2: QuantCondition,
    log2: f64,
    origin: RatioOrigin,
}

// Set semantics require a total equality on the value, so compare bit patterns
impl PartialEq for QuantRatio {
    fn eq(&self, other: &Self) -> bool {
        self.condition1 == other.condition1
            && self.condition2 == other.condition2
            && self.log2.to_bits() == other.log2.to_bits()
            && self.origin == other.origin
    }
}

impl Eq for QuantRatio {}

impl Hash for QuantRatio {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.condition1.hash(state);
        self.condition2.hash(state);
        self.log2.to_bits().hash(state);
        self.origin.hash(state);
    }
}

impl QuantRatio {
    pub fn new(
        condition1: QuantCondition,
        condition2: QuantCondition,
        log2: f64,
        origin: RatioOrigin,
    ) -> Self {
        // Collapse -0.0 so that equal ratios hash identically
        let log2 = if log2 == 0.0 { 0.0 } else { log2 };
        Self {
            condition1,
            condition2,
            log2,
            origin,
        }
    }

    /// Build a ratio from the summed signal of both conditions. Returns `None`
    /// when neither condition has any signal.
    pub fn from_intensities(
        condition1: QuantCondition,
        condition2: QuantCondition,
        intensity1: f64,
        intensity2: f64,
        origin: RatioOrigin,
    ) -> Option<Self> {
        let log2 = match (intensity1 > 0.0, intensity2 > 0.0) {
            (true, true) => (intensity1 / intensity2).log2(),
            (true, false) => f64::INFINITY,
            (false, true) => f64::NEG_INFINITY,
            (false, false) => return None,
        };
        Some(Self::new(condition1, condition2, log2, origin))
    }

    pub fn condition1(&self) -> &QuantCondition {
        &self.condition1
    }

    pub fn condition2(&self) -> &QuantCondition {
        &self.condition2
    }

    pub fn log2(&self) -> f64 {
        self.log2
    }

    /// Linear ratio value; one-sided ratios map to `inf` and `0.0`
    pub fn value(&self) -> f64 {
        self.log2.exp2()
    }

    pub fn origin(&self) -> RatioOrigin {
        self.origin
    }

    pub fn is_infinite(&self) -> bool {
        self.log2.is_infinite()
    }

    /// Does this ratio relate `a` and `b`, in either direction?
    pub fn matches(&self, a: &QuantCondition, b: &QuantCondition) -> bool {
        (&self.condition1 == a && &self.condition2 == b)
            || (&self.condition1 == b && &self.condition2 == a)
    }

    /// Express this ratio as `a / b`, inverting it if it was stored as `b / a`
    pub fn oriented(&self, a: &QuantCondition, b: &QuantCondition) -> Option<QuantRatio> {
        if &self.condition1 == a && &self.condition2 == b {
            Some(self.clone())
        } else if &self.condition1 == b && &self.condition2 == a {
            Some(Self::new(a.clone(), b.clone(), -self.log2, self.origin))
        } else {
            None
        }
    }
}

impl Display for QuantRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}={}", self.condition1, self.condition2, self.log2)
    }
}

/// Reporter ion intensity observed for a single isobaric channel
#[derive(Clone, Debug, PartialEq)]
pub struct IonChannel {
    pub condition: QuantCondition,
    pub intensity: f64,
}

/// Isobaric labeling ion counts for one spectrum. Several channels may be
/// assigned to the same condition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IonCounts {
    pub channels: Vec<IonChannel>,
}

impl IonCounts {
    pub fn push(&mut self, condition: QuantCondition, intensity: f64) {
        self.channels.push(IonChannel {
            condition,
            intensity,
        });
    }

    /// Summed intensity of all channels assigned to `condition`
    pub fn intensity(&self, condition: &QuantCondition) -> f64 {
        self.channels
            .iter()
            .filter(|ch| &ch.condition == condition)
            .map(|ch| ch.intensity.max(0.0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Pool ion counts from several spectra into one ratio
pub fn ion_count_ratio<'a, I>(
    counts: I,
    condition1: &QuantCondition,
    condition2: &QuantCondition,
) -> Option<QuantRatio>
where
    I: IntoIterator<Item = &'a IonCounts>,
{
    let (sum1, sum2) = counts.into_iter().fold((0.0, 0.0), |(a, b), ions| {
        (a + ions.intensity(condition1), b + ions.intensity(condition2))
    });
    QuantRatio::from_intensities(
        condition1.clone(),
        condition2.clone(),
        sum1,
        sum2,
        RatioOrigin::IonCount,
    )
}

/// Summarize a set of ratios as `condition1 / condition2`.
///
/// Finite ratios are summarized by their median. If only infinite ratios are
/// present, and they all point the same way, that infinity is returned.
pub fn consensus_from_ratios<'a, I>(
    ratios: I,
    condition1: &QuantCondition,
    condition2: &QuantCondition,
) -> Option<QuantRatio>
where
    I: IntoIterator<Item = &'a QuantRatio>,
{
    let oriented = ratios
        .into_iter()
        .filter_map(|r| r.oriented(condition1, condition2))
        .map(|r| r.log2)
        .filter(|x| !x.is_nan())
        .collect::<Vec<_>>();

    let mut finite = oriented
        .iter()
        .copied()
        .filter(|x| x.is_finite())
        .collect::<Vec<_>>();

    let log2 = if !finite.is_empty() {
        finite.sort_unstable_by(|a, b| a.total_cmp(b));
        let mid = finite.len() / 2;
        if finite.len() % 2 == 0 {
            (finite[mid - 1] + finite[mid]) / 2.0
        } else {
            finite[mid]
        }
    } else {
        let first = *oriented.first()?;
        if oriented.iter().all(|x| *x == first) {
            first
        } else {
            return None;
        }
    };

    Some(QuantRatio::new(
        condition1.clone(),
        condition2.clone(),
        log2,
        RatioOrigin::Consensus,
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    fn conds() -> (QuantCondition, QuantCondition) {
        (QuantCondition::new("light"), QuantCondition::new("heavy"))
    }

    #[test]
    fn one_sided_intensities() {
        let (a, b) = conds();
        let r = QuantRatio::from_intensities(a.clone(), b.clone(), 10.0, 0.0, RatioOrigin::Psm)
            .unwrap();
        assert_eq!(r.log2(), f64::INFINITY);
        assert_eq!(r.value(), f64::INFINITY);

        let r = QuantRatio::from_intensities(a.clone(), b.clone(), 0.0, 10.0, RatioOrigin::Psm)
            .unwrap();
        assert_eq!(r.log2(), f64::NEG_INFINITY);
        assert_eq!(r.value(), 0.0);

        assert!(QuantRatio::from_intensities(a, b, 0.0, 0.0, RatioOrigin::Psm).is_none());
    }

    #[test]
    fn orientation() {
        let (a, b) = conds();
        let r = QuantRatio::new(b.clone(), a.clone(), 1.0, RatioOrigin::Psm);
        assert!(r.matches(&a, &b));
        assert!(r.matches(&b, &a));
        assert_eq!(r.oriented(&a, &b).unwrap().log2(), -1.0);
        assert_eq!(r.oriented(&b, &a).unwrap().log2(), 1.0);
        assert!(r.oriented(&a, &QuantCondition::new("medium")).is_none());
    }

    #[test]
    fn pooled_ion_counts() {
        let (a, b) = conds();
        let mut x = IonCounts::default();
        x.push(a.clone(), 100.0);
        x.push(a.clone(), 100.0);
        x.push(b.clone(), 50.0);
        let mut y = IonCounts::default();
        y.push(a.clone(), 200.0);
        y.push(b.clone(), 50.0);

        assert_eq!(x.intensity(&a), 200.0);
        let r = ion_count_ratio([&x, &y], &a, &b).unwrap();
        assert_eq!(r.log2(), 2.0);
        assert_eq!(r.origin(), RatioOrigin::IonCount);
    }

    #[test]
    fn median_consensus() {
        let (a, b) = conds();
        let ratios = vec![
            QuantRatio::new(a.clone(), b.clone(), 1.0, RatioOrigin::Psm),
            QuantRatio::new(a.clone(), b.clone(), 3.0, RatioOrigin::Psm),
            QuantRatio::new(b.clone(), a.clone(), -2.0, RatioOrigin::Psm),
            QuantRatio::new(a.clone(), b.clone(), f64::INFINITY, RatioOrigin::Psm),
        ];
        let c = consensus_from_ratios(&ratios, &a, &b).unwrap();
        assert_eq!(c.log2(), 2.0);
        assert_eq!(c.origin(), RatioOrigin::Consensus);
    }

    #[test]
    fn infinite_consensus() {
        let (a, b) = conds();
        let same = vec![
            QuantRatio::new(a.clone(), b.clone(), f64::INFINITY, RatioOrigin::Psm),
            QuantRatio::new(b.clone(), a.clone(), f64::NEG_INFINITY, RatioOrigin::Psm),
        ];
        assert_eq!(
            consensus_from_ratios(&same, &a, &b).unwrap().log2(),
            f64::INFINITY
        );

        let conflicting = vec![
            QuantRatio::new(a.clone(), b.clone(), f64::INFINITY, RatioOrigin::Psm),
            QuantRatio::new(a.clone(), b.clone(), f64::NEG_INFINITY, RatioOrigin::Psm),
        ];
        assert!(consensus_from_ratios(&conflicting, &a, &b).is_none());
        assert!(consensus_from_ratios(Vec::<QuantRatio>::new().iter(), &a, &b).is_none());
    }
}
