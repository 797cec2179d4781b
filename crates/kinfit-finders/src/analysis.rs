use std::str::FromStr;

use kinfit_core::{
    candidate::EventCandidates,
    data::Event,
    io::ConfigTable,
    observer::{FinderSummary, Observer},
    utils::enums::DecayKind,
    KinFitError, KinFitResult,
};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{Branch, ConversionFinder, D0Finder, DstarFinder, Finder, K0sFinder, LambdaFinder};

/// The configuration table names of every finder, in running order.
const SECTIONS: [&str; 5] = ["k0s", "lambda", "d0", "dstar", "conversion"];

fn finder_for(kind: DecayKind) -> Box<dyn Finder> {
    match kind {
        DecayKind::K0s => Box::new(K0sFinder::default()),
        DecayKind::Lambda => Box::new(LambdaFinder::default()),
        DecayKind::D0 => Box::new(D0Finder::default()),
        DecayKind::Dstar => Box::new(DstarFinder::default()),
        DecayKind::Conversion => Box::new(ConversionFinder::default()),
    }
}

/// An ordered chain of [`Finder`]s run over a sequence of [`Event`]s.
///
/// For every event a fresh [`EventCandidates`] is created and handed to each finder in turn, so
/// later finders see (and may veto against) the candidates of earlier ones. After the last
/// finder, the event and its candidates are passed to an [`Observer`] and the candidates are
/// returned to the caller.
#[derive(Clone)]
pub struct Analysis {
    finders: Vec<Box<dyn Finder>>,
}

impl Default for Analysis {
    /// Every finder with its default configuration: $`K^0_S`$, $`\Lambda`$, $`D^0`$, $`D^*`$,
    /// photon conversions.
    fn default() -> Self {
        Self::new(DecayKind::all().into_iter().map(finder_for).collect())
    }
}

impl Analysis {
    pub fn new(finders: Vec<Box<dyn Finder>>) -> Self {
        Self { finders }
    }

    /// Build the finders named in `names` (e.g. `["k0s", "d0"]`). The finders always run in
    /// the canonical order regardless of the order of `names`, and duplicates are ignored.
    pub fn from_names<T: AsRef<str>>(names: &[T]) -> KinFitResult<Self> {
        let mut kinds = names
            .iter()
            .map(|name| DecayKind::from_str(name.as_ref().trim()))
            .collect::<KinFitResult<Vec<_>>>()?;
        kinds.sort();
        kinds.dedup();
        if kinds.contains(&DecayKind::Dstar) && !kinds.contains(&DecayKind::D0) {
            tracing::warn!("the D* finder is seeded by D0 candidates; without the D0 finder it will find nothing");
        }
        Ok(Self::new(kinds.into_iter().map(finder_for).collect()))
    }

    /// Apply a configuration file. Each table configures the finder whose section it names.
    /// Tables of known finders which are not part of this analysis are skipped.
    pub fn configure(&mut self, table: &ConfigTable) -> KinFitResult<()> {
        for name in table.sections() {
            let Some(section) = table.section(name) else {
                continue;
            };
            match self.finders.iter_mut().find(|f| f.section() == name) {
                Some(finder) => {
                    finder.configure(section)?;
                    tracing::debug!(finder = %finder.name(), section = name, "configured");
                }
                None if SECTIONS.contains(&name) => {
                    tracing::debug!(section = name, "skipping configuration of an unselected finder");
                }
                None => {
                    return Err(KinFitError::Custom(format!(
                        "Unknown configuration section \"[{}]\" (expected one of {})",
                        name,
                        SECTIONS.join(", ")
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn finders(&self) -> &[Box<dyn Finder>] {
        &self.finders
    }

    /// The union of the event branches read by all finders.
    pub fn branches(&self) -> Vec<Branch> {
        let mut branches: Vec<Branch> = self
            .finders
            .iter()
            .flat_map(|f| f.set_branch_status())
            .collect();
        branches.sort();
        branches.dedup();
        branches
    }

    /// Announce every finder to `observer`. Call once before the first event.
    pub fn book(&mut self, observer: &mut dyn Observer) {
        for finder in self.finders.iter_mut() {
            finder.book_histograms(observer);
        }
    }

    fn run_finders(finders: &mut [Box<dyn Finder>], event: &Event) -> KinFitResult<EventCandidates> {
        event.validate()?;
        let mut candidates = EventCandidates::new(event.number);
        for finder in finders.iter_mut() {
            finder.analyze_event(event, &mut candidates)?;
        }
        Ok(candidates)
    }

    /// Run every finder on one event and hand the result to `observer`.
    pub fn process_event(
        &mut self,
        event: &Event,
        observer: &mut dyn Observer,
    ) -> KinFitResult<EventCandidates> {
        let candidates = Self::run_finders(&mut self.finders, event)?;
        observer.observe(event, &candidates);
        Ok(candidates)
    }

    /// Process `events` one after the other. The first fatal error stops the job.
    pub fn process(
        &mut self,
        events: &[Event],
        observer: &mut dyn Observer,
    ) -> KinFitResult<Vec<EventCandidates>> {
        events
            .iter()
            .map(|event| self.process_event(event, observer))
            .collect()
    }

    /// Process `events` in parallel chunks.
    ///
    /// Each chunk is handled by clones of the finders starting from empty statistics; the
    /// statistics of all chunks are merged back in order afterwards, and `observer` sees the
    /// events sequentially in their input order. The result equals that of
    /// [`Analysis::process`]. Without the `rayon` feature this is the same as
    /// [`Analysis::process`].
    pub fn par_process(
        &mut self,
        events: &[Event],
        observer: &mut dyn Observer,
    ) -> KinFitResult<Vec<EventCandidates>> {
        #[cfg(feature = "rayon")]
        {
            let chunk_size = usize::max(1, events.len() / (4 * rayon::current_num_threads()));
            let template: Vec<Box<dyn Finder>> = self
                .finders
                .iter()
                .map(|finder| {
                    let mut finder = finder.clone();
                    let cleared = finder.stats().cleared();
                    *finder.stats_mut() = cleared;
                    finder
                })
                .collect();
            let chunks: Vec<(Vec<Box<dyn Finder>>, Vec<EventCandidates>)> = events
                .par_chunks(chunk_size)
                .map(|chunk| {
                    let mut finders = template.clone();
                    let candidates = chunk
                        .iter()
                        .map(|event| Self::run_finders(&mut finders, event))
                        .collect::<KinFitResult<Vec<_>>>()?;
                    Ok((finders, candidates))
                })
                .collect::<KinFitResult<Vec<_>>>()?;
            let mut output = Vec::with_capacity(events.len());
            for (finders, candidates) in chunks {
                for (finder, partial) in self.finders.iter_mut().zip(finders.iter()) {
                    finder.stats_mut().merge(partial.stats());
                }
                output.extend(candidates);
            }
            for (event, candidates) in events.iter().zip(output.iter()) {
                observer.observe(event, candidates);
            }
            Ok(output)
        }
        #[cfg(not(feature = "rayon"))]
        {
            self.process(events, observer)
        }
    }

    /// Produce the end-of-job summaries and hand them to `observer`.
    pub fn terminate(&self, observer: &mut dyn Observer) -> Vec<FinderSummary> {
        let summaries: Vec<FinderSummary> = self.finders.iter().map(|f| f.terminate()).collect();
        observer.terminate(&summaries);
        summaries
    }
}
