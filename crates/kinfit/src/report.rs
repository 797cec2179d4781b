//! Serializable job output.

use std::fmt::Write;

use kinfit_core::{
    candidate::{DecayCandidate, EventCandidates},
    data::Event,
    observer::FinderSummary,
};
use kinfit_finders::Analysis;
use serde::Serialize;

/// The signal candidates found in a single event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventReport {
    pub run: u32,
    pub event: u64,
    pub weight: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub k0s: Vec<DecayCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lambda: Vec<DecayCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub d0: Vec<DecayCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dstar: Vec<DecayCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conversion: Vec<DecayCandidate>,
}

impl EventReport {
    pub fn new(event: &Event, candidates: EventCandidates) -> Self {
        Self {
            run: event.run,
            event: event.number,
            weight: event.weight,
            k0s: candidates.k0s.signal,
            lambda: candidates.lambda.signal,
            d0: candidates.d0.signal,
            dstar: candidates.dstar.signal,
            conversion: candidates.conversion.signal,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.k0s.is_empty()
            && self.lambda.is_empty()
            && self.d0.is_empty()
            && self.dstar.is_empty()
            && self.conversion.is_empty()
    }
}

/// Everything written at the end of `kinfit run`: the signal candidates of each event that has
/// any, followed by one summary per finder.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub n_events: usize,
    pub events: Vec<EventReport>,
    pub summaries: Vec<FinderSummary>,
}

impl RunReport {
    /// Pair every event with its candidates (as returned by
    /// [`Analysis::process`](kinfit_finders::Analysis::process)) and drop events without any
    /// signal candidate.
    pub fn new(events: &[Event], candidates: Vec<EventCandidates>, summaries: Vec<FinderSummary>) -> Self {
        let reports = events
            .iter()
            .zip(candidates)
            .map(|(event, candidates)| EventReport::new(event, candidates))
            .filter(|report| !report.is_empty())
            .collect();
        Self {
            n_events: events.len(),
            events: reports,
            summaries,
        }
    }

    /// A human-readable table of the finder summaries.
    pub fn summary_table(&self) -> String {
        let mut table = String::new();
        let _ = writeln!(
            table,
            "{:<18}{:>10}{:>10}{:>10}{:>12}{:>12}{:>10}",
            "finder", "mode", "events", "signal", "background", "efficiency", "purity"
        );
        for s in &self.summaries {
            let percent = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", 100.0 * v));
            let _ = writeln!(
                table,
                "{:<18}{:>10}{:>10}{:>10}{:>12}{:>12}{:>10}",
                s.finder,
                s.mode.to_string(),
                s.n_events,
                s.n_signal,
                s.n_background,
                percent(s.efficiency()),
                percent(s.purity())
            );
        }
        table
    }
}

/// Every registered cut of every finder in `analysis`, grouped by configuration section, in a
/// form that can be pasted back into a configuration file.
pub fn cut_table(analysis: &Analysis) -> String {
    let mut table = String::new();
    for finder in analysis.finders() {
        let _ = writeln!(table, "[{}]", finder.section());
        let _ = writeln!(table, "mode = \"{}\"", finder.mode().to_string().to_lowercase());
        for (name, description, value) in finder.cut_values() {
            let _ = writeln!(table, "{name} = {value:?} # {description}");
        }
        let _ = writeln!(table);
    }
    table
}

#[cfg(test)]
mod tests {
    use kinfit_core::{
        data::{test_dstar_event, test_event},
        io::ConfigTable,
        observer::NullObserver,
    };

    use super::*;

    #[test]
    fn test_run_report() {
        let mut empty = test_event();
        empty.vertices.truncate(1);
        for track in empty.tracks.iter_mut() {
            track.vertex = None;
        }
        empty.number = 44;
        let events = vec![test_event(), empty, test_dstar_event()];
        let mut analysis = Analysis::default();
        let candidates = analysis.process(&events, &mut NullObserver).unwrap();
        let report = RunReport::new(&events, candidates, analysis.terminate(&mut NullObserver));
        assert_eq!(report.n_events, 3);
        let numbers: Vec<u64> = report.events.iter().map(|e| e.event).collect();
        assert_eq!(numbers, vec![42, 43]);
        assert_eq!(report.events[0].k0s.len(), 1);
        assert!(report.events[0].d0.is_empty());
        assert_eq!(report.events[1].dstar.len(), 1);
        assert!(report.events[0].conversion.is_empty());
        assert_eq!(report.summaries.len(), 5);
        let table = report.summary_table();
        assert_eq!(table.lines().count(), 6);
        assert!(table.contains("ConversionFinder"));
        assert!(table.contains("K0sFinder"));
    }

    #[test]
    fn test_cut_table_round_trip() {
        let analysis = Analysis::default();
        let table = cut_table(&analysis);
        assert!(table.contains("[k0s]\nmode = \"kinfit\"\n"));
        assert!(table.contains("SignalPion_Pt_min = 0.5 # minimum pion pT (GeV)"));
        assert!(table.contains("[conversion]\nmode = \"kinfit\"\n"));
        let parsed: ConfigTable = table.parse().unwrap();
        let mut configured = Analysis::default();
        configured.configure(&parsed).unwrap();
        assert_eq!(cut_table(&configured), table);
    }
}
