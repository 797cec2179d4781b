use std::{fs, path::PathBuf};

use kinfit::{
    cut_table,
    data::{test_dstar_event, test_event},
    io::{read_events, write_json, ConfigTable},
    Analysis, DecayKind, Finder, MassHistograms, Mode, NullObserver, RunReport,
};

struct Scratch(PathBuf);

impl Scratch {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("kinfit-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    fn path(&self, file: &str) -> String {
        self.0.join(file).to_str().unwrap().to_string()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

#[test]
fn test_file_workflow() {
    let scratch = Scratch::new("workflow");
    let events_path = scratch.path("events.json");
    let config_path = scratch.path("cuts.toml");
    let output_path = scratch.path("candidates.json");
    write_json(&events_path, &vec![test_event(), test_dstar_event()]).unwrap();
    fs::write(
        &config_path,
        "[k0s]\nmode = \"cut-based\"\nSignalPion_Pt_min = 0.4\n[d0]\nKinFitPvalue_min = 0.01\n",
    )
    .unwrap();

    let events = read_events(&events_path).unwrap();
    let mut analysis = Analysis::default();
    analysis.configure(&ConfigTable::read(&config_path).unwrap()).unwrap();
    assert_eq!(analysis.finders()[0].mode(), Mode::CutBased);
    let mut histograms = MassHistograms::new(20);
    analysis.book(&mut histograms);
    let candidates = analysis.process(&events, &mut histograms).unwrap();
    let report = RunReport::new(&events, candidates, analysis.terminate(&mut histograms));
    write_json(&output_path, &report).unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output_path).unwrap()).unwrap();
    assert_eq!(written["n_events"], 2);
    assert_eq!(written["events"].as_array().unwrap().len(), 2);
    assert_eq!(written["events"][0]["event"], 42);
    assert_eq!(written["events"][0]["k0s"][0]["ndof"], 0);
    assert!(written["events"][0].get("d0").is_none());
    assert_eq!(written["events"][1]["dstar"][0]["seed"], 0);
    assert_eq!(written["summaries"][0]["mode"], "CutBased");
    assert_eq!(written["summaries"][3]["n_signal"], 1);

    let k0s = histograms.get(DecayKind::K0s, "signal").unwrap();
    assert_eq!(k0s.integral(), 0.5);
    let k0s_true = histograms.get(DecayKind::K0s, "true").unwrap();
    assert_eq!(k0s_true.integral(), 0.5);
}

#[test]
fn test_parallel_matches_serial() {
    let events: Vec<_> = (0..25)
        .map(|i| if i % 2 == 0 { test_event() } else { test_dstar_event() })
        .collect();
    let mut serial = Analysis::default();
    let a = serial.process(&events, &mut NullObserver).unwrap();
    let mut parallel = Analysis::default();
    let b = parallel.par_process(&events, &mut NullObserver).unwrap();
    let a = RunReport::new(&events, a, serial.terminate(&mut NullObserver));
    let b = RunReport::new(&events, b, parallel.terminate(&mut NullObserver));
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn test_cut_listing_reflects_configuration() {
    let table: ConfigTable = "[dstar]\nSoftPion_Pt_min = 0.25\n".parse().unwrap();
    let mut analysis = Analysis::from_names(&["d0", "dstar"]).unwrap();
    analysis.configure(&table).unwrap();
    let listing = cut_table(&analysis);
    assert!(listing.starts_with("[d0]\n"));
    assert!(listing.contains("[dstar]\n"));
    assert!(listing.contains("SoftPion_Pt_min = 0.25 #"));
    assert!(!listing.contains("[k0s]"));
}
