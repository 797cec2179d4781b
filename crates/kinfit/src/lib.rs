//! `kinfit` reconstructs neutral and charmed hadron decays in reconstructed collider events.
//!
//! Five decay finders are provided:
//! * [`K0sFinder`]: $`K^0_S \to \pi^+\pi^-`$ from two-track secondary vertices,
//! * [`LambdaFinder`]: $`\Lambda \to p\pi^-`$ (and the charge conjugate),
//! * [`D0Finder`]: $`D^0 \to K^-\pi^+`$ from all pairs of tracks,
//! * [`DstarFinder`]: $`D^{*+} \to D^0\pi^+_s`$, seeded by the $`D^0`$ candidates,
//! * [`ConversionFinder`]: photon conversions $`\gamma \to e^+e^-`$ from displaced
//!   two-track vertices.
//!
//! Each finder either applies a chain of kinematic cuts to the measured tracks ("cut-based"
//! mode) or refits the tracks under invariant-mass constraints with a least-squares
//! [`KinFitter`] and cuts on the fit probability ("kinfit" mode). Candidates built from
//! opposite-charge legs are signal; same-charge combinations are kept separately as a
//! combinatorial-background estimate.
//!
//! # Quick Start
//! ```rust
//! use kinfit::{data::test_event, Analysis, NullObserver};
//!
//! let mut analysis = Analysis::default();
//! let candidates = analysis.process(&[test_event()], &mut NullObserver).unwrap();
//! assert_eq!(candidates[0].k0s.signal.len(), 1);
//! let summaries = analysis.terminate(&mut NullObserver);
//! assert_eq!(summaries[0].n_signal, 1);
//! ```
//!
//! # Configuration
//! Cuts are changed through a TOML file with one table per finder. Numeric keys are cut names,
//! `mode` selects the reconstruction mode, and boolean keys toggle finder flags:
//! ```rust
//! use kinfit::{io::ConfigTable, Analysis};
//!
//! let table: ConfigTable = r#"
//!     [k0s]
//!     mode = "cut-based"
//!     SignalPion_Pt_min = 0.3
//!     [d0]
//!     KinFitPvalue_min = 0.01
//! "#
//! .parse()
//! .unwrap();
//! let mut analysis = Analysis::default();
//! analysis.configure(&table).unwrap();
//! ```
//! Unknown cut names are rejected with [`KinFitError::UnknownCut`].
//!
//! # Data Format
//! Events are read from a JSON array of [`Event`]s, as written by [`io::write_json`]. Identifiers
//! of tracks, vertices and generated particles are their positions in the event's collections.
#![warn(clippy::perf, clippy::style)]

/// The event data model.
pub mod data {
    pub use kinfit_core::data::*;
}
/// The constrained kinematic fit.
pub mod fit {
    pub use kinfit_core::fit::*;
}
/// Decay finders and the [`Analysis`](crate::Analysis) driver.
pub mod finders {
    pub use kinfit_finders::*;
}
/// Event and configuration file handling.
pub mod io {
    pub use kinfit_core::io::*;
}
/// Utility functions, enums, and kinematic variables.
pub mod utils {
    pub use kinfit_core::utils::*;
}
pub mod report;

pub use kinfit_core::candidate::{CandidateLists, DecayCandidate, EventCandidates, FittedDaughter};
pub use kinfit_core::cuts::{CutFlow, CutRegistry};
pub use kinfit_core::data::{Event, EventBuilder, Track, TrackId, Vertex, VertexId};
pub use kinfit_core::fit::{FitResult, FitSettings, KinFitter, MassConstraint};
pub use kinfit_core::observer::{FinderSummary, MassHistograms, NullObserver, Observer};
pub use kinfit_core::utils::enums::{DecayKind, FitStatus, Mode, Species, TruthMatch};
pub use kinfit_core::utils::vectors::{Vec3, Vec4};
pub use kinfit_core::{KinFitError, KinFitResult};
pub use kinfit_finders::{
    Analysis, ConversionFinder, D0Finder, DstarFinder, Finder, K0sFinder, LambdaFinder,
};
pub use report::{cut_table, RunReport};
