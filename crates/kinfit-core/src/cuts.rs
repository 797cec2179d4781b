use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{KinFitError, KinFitResult};

/// The number of candidates which reached and passed one cut stage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CutCount {
    pub unweighted: u64,
    /// The sum of event weights.
    pub weighted: f64,
}

/// An ordered tally of how many candidates survive each named selection stage.
///
/// Stages are reported in the order they were first registered or passed, so registering
/// every stage up front keeps the textual order even for stages nothing reached.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CutFlow {
    stages: IndexMap<String, CutCount>,
}

impl CutFlow {
    /// A cut-flow with the given stages pre-registered at zero.
    pub fn new<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stages: stages
                .into_iter()
                .map(|s| (s.into(), CutCount::default()))
                .collect(),
        }
    }

    /// Record that a candidate passed the stage `name`.
    pub fn pass(&mut self, name: &str, weight: f64) {
        let count = self.stages.entry(name.to_string()).or_default();
        count.unweighted += 1;
        count.weighted += weight;
    }

    pub fn get(&self, name: &str) -> Option<CutCount> {
        self.stages.get(name).copied()
    }

    /// The unweighted count of stage `name`, zero if it was never registered.
    pub fn count(&self, name: &str) -> u64 {
        self.get(name).map_or(0, |c| c.unweighted)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CutCount)> {
        self.stages.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Add the counts of `other` to this cut-flow, appending stages this one has not seen.
    pub fn merge(&mut self, other: &CutFlow) {
        for (name, count) in other.iter() {
            let entry = self.stages.entry(name.to_string()).or_default();
            entry.unweighted += count.unweighted;
            entry.weighted += count.weighted;
        }
    }
}

impl Display for CutFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self.stages.keys().map(String::len).max().unwrap_or(0);
        for (name, count) in self.iter() {
            writeln!(
                f,
                "{:<width$}  {:>10}  {:>14.3}",
                name, count.unweighted, count.weighted
            )?;
        }
        Ok(())
    }
}

/// `true` if `value` lies in the closed interval `[lo, hi]`. NaN is never inside.
pub fn in_window(value: f64, lo: f64, hi: f64) -> bool {
    value >= lo && value <= hi
}

/// Typed access to one numeric cut of a configuration struct `C`.
pub struct CutAccessor<C> {
    pub description: &'static str,
    pub get: fn(&C) -> f64,
    pub set: fn(&mut C, f64),
}

/// A table mapping cut names to typed accessors on a finder configuration.
///
/// The table is built once per configuration type and replaces any lookup of cut names by
/// reflection: an unregistered name is rejected with [`KinFitError::UnknownCut`].
pub struct CutRegistry<C> {
    finder: &'static str,
    cuts: IndexMap<&'static str, CutAccessor<C>>,
}

impl<C> CutRegistry<C> {
    pub fn new(finder: &'static str) -> Self {
        Self {
            finder,
            cuts: IndexMap::new(),
        }
    }

    pub fn register(
        mut self,
        name: &'static str,
        description: &'static str,
        get: fn(&C) -> f64,
        set: fn(&mut C, f64),
    ) -> Self {
        self.cuts.insert(
            name,
            CutAccessor {
                description,
                get,
                set,
            },
        );
        self
    }

    pub fn finder(&self) -> &'static str {
        self.finder
    }

    fn accessor(&self, name: &str) -> KinFitResult<&CutAccessor<C>> {
        self.cuts.get(name).ok_or_else(|| KinFitError::UnknownCut {
            name: name.to_string(),
            finder: self.finder.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cuts.contains_key(name)
    }

    pub fn set(&self, config: &mut C, name: &str, value: f64) -> KinFitResult<()> {
        (self.accessor(name)?.set)(config, value);
        Ok(())
    }

    pub fn get(&self, config: &C, name: &str) -> KinFitResult<f64> {
        Ok((self.accessor(name)?.get)(config))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cuts.keys().copied()
    }

    /// Every registered cut with its description and current value in `config`.
    pub fn values(&self, config: &C) -> Vec<(&'static str, &'static str, f64)> {
        self.cuts
            .iter()
            .map(|(name, accessor)| (*name, accessor.description, (accessor.get)(config)))
            .collect()
    }
}

/// Build a [`CutRegistry`] whose cuts map directly onto `f64` fields.
///
/// ```ignore
/// let registry = cut_registry!(MyConfig, "MyFinder", {
///     "Pt_min" => pt_min: "minimum transverse momentum",
/// });
/// ```
#[macro_export]
macro_rules! cut_registry {
    ($config:ty, $finder:expr, { $($name:literal => $field:ident : $desc:literal),* $(,)? }) => {
        $crate::cuts::CutRegistry::<$config>::new($finder)
            $(.register($name, $desc, |c: &$config| c.$field, |c: &mut $config, v: f64| c.$field = v))*
    };
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[derive(Default)]
    struct Config {
        pt_min: f64,
        eta_max: f64,
    }

    #[test]
    fn test_cut_flow_order_and_counts() {
        let mut flow = CutFlow::new(["Sec. Vtx & 2 Dght.", "Pion Pt", "Fit converged"]);
        flow.pass("Pion Pt", 0.5);
        flow.pass("Sec. Vtx & 2 Dght.", 0.5);
        flow.pass("Sec. Vtx & 2 Dght.", 2.0);
        flow.pass("Opp. sign", 1.0);
        let names: Vec<&str> = flow.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["Sec. Vtx & 2 Dght.", "Pion Pt", "Fit converged", "Opp. sign"]
        );
        assert_eq!(flow.count("Sec. Vtx & 2 Dght."), 2);
        assert_relative_eq!(flow.get("Sec. Vtx & 2 Dght.").unwrap().weighted, 2.5);
        assert_eq!(flow.count("Fit converged"), 0);
        assert_eq!(flow.count("missing"), 0);
        assert!(format!("{}", flow).contains("Pion Pt"));
    }

    #[test]
    fn test_cut_flow_merge() {
        let mut a = CutFlow::new(["A", "B"]);
        a.pass("A", 1.0);
        let mut b = CutFlow::new(["A", "B"]);
        b.pass("A", 1.0);
        b.pass("B", 3.0);
        b.pass("C", 1.0);
        a.merge(&b);
        assert_eq!(a.count("A"), 2);
        assert_eq!(a.count("B"), 1);
        assert_eq!(a.count("C"), 1);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_in_window() {
        assert!(in_window(0.497, 0.48, 0.515));
        assert!(in_window(0.48, 0.48, 0.515));
        assert!(!in_window(0.52, 0.48, 0.515));
        assert!(!in_window(f64::NAN, f64::NEG_INFINITY, f64::INFINITY));
    }

    #[test]
    fn test_registry() {
        let registry = cut_registry!(Config, "TestFinder", {
            "Pt_min" => pt_min: "minimum pt",
            "Eta_max" => eta_max: "maximum |eta|",
        });
        let mut config = Config::default();
        registry.set(&mut config, "Pt_min", 0.5).unwrap();
        registry.set(&mut config, "Eta_max", 2.5).unwrap();
        assert_eq!(config.pt_min, 0.5);
        assert_eq!(registry.get(&config, "Eta_max").unwrap(), 2.5);
        assert!(registry.contains("Pt_min"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Pt_min", "Eta_max"]);
        assert_eq!(registry.values(&config)[1], ("Eta_max", "maximum |eta|", 2.5));
        let err = registry.set(&mut config, "fPt_min", 1.0).unwrap_err();
        assert!(matches!(err, KinFitError::UnknownCut { .. }));
        assert_eq!(registry.finder(), "TestFinder");
    }
}
