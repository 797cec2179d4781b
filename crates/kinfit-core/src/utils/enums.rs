use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::KinFitError;

/// The two reconstruction strategies a finder may implement.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Candidates are built from unfitted track momenta and selected with cuts only.
    CutBased,
    /// Candidates are built from a mass-constrained kinematic fit of their legs.
    #[default]
    KinFit,
}
impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::CutBased => write!(f, "Cut-Based"),
            Mode::KinFit => write!(f, "KinFit"),
        }
    }
}
impl FromStr for Mode {
    type Err = KinFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cutbased" | "cut-based" | "cut based" | "cuts" => Ok(Self::CutBased),
            "kinfit" | "kin-fit" | "kinematic fit" | "kinematic-fit" | "fit" => Ok(Self::KinFit),
            _ => Err(KinFitError::ParseError {
                name: s.to_string(),
                object: "Mode".to_string(),
            }),
        }
    }
}

/// The decay topologies reconstructed by the finders.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DecayKind {
    /// $`K^0_S \to \pi^+\pi^-`$
    K0s,
    /// $`\Lambda \to p\pi^-`$ and its charge conjugate
    Lambda,
    /// $`D^0 \to K^-\pi^+`$ and its charge conjugate
    D0,
    /// $`D^{*+} \to D^0\pi^+_s`$ and its charge conjugate
    Dstar,
    /// Photon conversion $`\gamma \to e^+e^-`$ in the detector material
    Conversion,
}
impl DecayKind {
    /// The (unsigned) PDG Monte Carlo code of the decaying particle.
    pub fn pdg_code(&self) -> i32 {
        match self {
            DecayKind::K0s => 310,
            DecayKind::Lambda => 3122,
            DecayKind::D0 => 421,
            DecayKind::Dstar => 413,
            DecayKind::Conversion => 22,
        }
    }
    /// Every kind, in the order the finders run.
    pub fn all() -> [DecayKind; 5] {
        [
            DecayKind::K0s,
            DecayKind::Lambda,
            DecayKind::D0,
            DecayKind::Dstar,
            DecayKind::Conversion,
        ]
    }
}
impl Display for DecayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecayKind::K0s => write!(f, "K0s"),
            DecayKind::Lambda => write!(f, "Lambda"),
            DecayKind::D0 => write!(f, "D0"),
            DecayKind::Dstar => write!(f, "D*"),
            DecayKind::Conversion => write!(f, "Conversion"),
        }
    }
}
impl FromStr for DecayKind {
    type Err = KinFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "k0s" | "ks" | "kshort" | "k0short" => Ok(Self::K0s),
            "lambda" | "l0" | "lambda0" => Ok(Self::Lambda),
            "d0" | "dzero" => Ok(Self::D0),
            "d*" | "dstar" | "d*+" | "dstar+" => Ok(Self::Dstar),
            "conversion" | "conv" | "gamma" | "photon" => Ok(Self::Conversion),
            _ => Err(KinFitError::ParseError {
                name: s.to_string(),
                object: "DecayKind".to_string(),
            }),
        }
    }
}

/// Particle-type hypotheses which can be assigned to a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Electron,
    Pion,
    Kaon,
    Proton,
}
impl Species {
    /// The (unsigned) PDG Monte Carlo code of the positively charged particle of this type.
    pub fn pdg_code(&self) -> i32 {
        match self {
            Species::Electron => 11,
            Species::Pion => 211,
            Species::Kaon => 321,
            Species::Proton => 2212,
        }
    }
    /// The nominal mass in GeV.
    pub fn mass(&self) -> f64 {
        match self {
            Species::Electron => 0.000510998910,
            Species::Pion => 0.13957,
            Species::Kaon => 0.493667,
            Species::Proton => 0.938272,
        }
    }
}
impl Display for Species {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Species::Electron => write!(f, "e"),
            Species::Pion => write!(f, "pi"),
            Species::Kaon => write!(f, "K"),
            Species::Proton => write!(f, "p"),
        }
    }
}
impl FromStr for Species {
    type Err = KinFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "e" | "electron" | "positron" => Ok(Self::Electron),
            "pi" | "pion" => Ok(Self::Pion),
            "k" | "kaon" => Ok(Self::Kaon),
            "p" | "proton" => Ok(Self::Proton),
            _ => Err(KinFitError::ParseError {
                name: s.to_string(),
                object: "Species".to_string(),
            }),
        }
    }
}

/// The verdict of matching a reconstructed candidate to the generator record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TruthMatch {
    /// Every leg comes from the expected decay.
    True,
    /// The legs have the wrong identity or different parents.
    False,
    /// At least one leg has no sufficiently good link to a generated particle.
    Indeterminate,
}
impl Display for TruthMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TruthMatch::True => write!(f, "true"),
            TruthMatch::False => write!(f, "false"),
            TruthMatch::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Whether a vertex is the unique primary interaction point or a displaced decay vertex.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexKind {
    Primary,
    #[default]
    Secondary,
}
impl Display for VertexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VertexKind::Primary => write!(f, "primary"),
            VertexKind::Secondary => write!(f, "secondary"),
        }
    }
}
impl FromStr for VertexKind {
    type Err = KinFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" | "pv" | "prim" => Ok(Self::Primary),
            "secondary" | "sv" | "sec" => Ok(Self::Secondary),
            _ => Err(KinFitError::ParseError {
                name: s.to_string(),
                object: "VertexKind".to_string(),
            }),
        }
    }
}

/// The terminal state of a kinematic fit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FitStatus {
    /// Both the chi-square and the constraint residual settled within tolerance.
    Converged,
    /// The iteration cap was reached first.
    NotConverged,
    /// The linear algebra broke down (singular matrix or non-finite parameters).
    Aborted,
}
impl FitStatus {
    /// The numerical status code, where zero means success.
    pub fn code(&self) -> i32 {
        match self {
            FitStatus::Converged => 0,
            FitStatus::NotConverged => 1,
            FitStatus::Aborted => -10,
        }
    }
    pub fn is_converged(&self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}
impl Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitStatus::Converged => write!(f, "CONVERGED"),
            FitStatus::NotConverged => write!(f, "NOT CONVERGED"),
            FitStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn enum_displays() {
        assert_eq!(format!("{}", Mode::CutBased), "Cut-Based");
        assert_eq!(format!("{}", Mode::KinFit), "KinFit");
        assert_eq!(format!("{}", DecayKind::K0s), "K0s");
        assert_eq!(format!("{}", DecayKind::Lambda), "Lambda");
        assert_eq!(format!("{}", DecayKind::D0), "D0");
        assert_eq!(format!("{}", DecayKind::Dstar), "D*");
        assert_eq!(format!("{}", DecayKind::Conversion), "Conversion");
        assert_eq!(format!("{}", Species::Kaon), "K");
        assert_eq!(format!("{}", Species::Pion), "pi");
        assert_eq!(format!("{}", TruthMatch::Indeterminate), "indeterminate");
        assert_eq!(format!("{}", VertexKind::Primary), "primary");
        assert_eq!(format!("{}", FitStatus::NotConverged), "NOT CONVERGED");
    }

    #[test]
    fn enum_from_str() {
        assert_eq!(Mode::from_str("KinFit").unwrap(), Mode::KinFit);
        assert_eq!(Mode::from_str("kinematic fit").unwrap(), Mode::KinFit);
        assert_eq!(Mode::from_str("Cut-Based").unwrap(), Mode::CutBased);
        assert_eq!(Mode::from_str("cuts").unwrap(), Mode::CutBased);
        assert_eq!(DecayKind::from_str("KS").unwrap(), DecayKind::K0s);
        assert_eq!(DecayKind::from_str("lambda").unwrap(), DecayKind::Lambda);
        assert_eq!(DecayKind::from_str("D0").unwrap(), DecayKind::D0);
        assert_eq!(DecayKind::from_str("D*").unwrap(), DecayKind::Dstar);
        assert_eq!(DecayKind::from_str("dstar").unwrap(), DecayKind::Dstar);
        assert_eq!(DecayKind::from_str("gamma").unwrap(), DecayKind::Conversion);
        assert_eq!(Species::from_str("Proton").unwrap(), Species::Proton);
        assert_eq!(Species::from_str("e").unwrap(), Species::Electron);
        assert_eq!(VertexKind::from_str("SV").unwrap(), VertexKind::Secondary);
        assert!(Mode::from_str("likelihood").is_err());
        assert!(DecayKind::from_str("B0").is_err());
    }

    #[test]
    fn test_codes() {
        assert_eq!(DecayKind::Dstar.pdg_code(), 413);
        assert_eq!(DecayKind::Conversion.pdg_code(), 22);
        assert_eq!(Species::Kaon.pdg_code(), 321);
        assert_eq!(FitStatus::Converged.code(), 0);
        assert_eq!(FitStatus::NotConverged.code(), 1);
        assert_eq!(FitStatus::Aborted.code(), -10);
        assert!(!FitStatus::Aborted.is_converged());
    }
}
