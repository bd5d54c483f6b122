use std::fs;
use std::path::Path;

use clap::Parser;
use equipmatch::cli::Cli;
use equipmatch::error::ExitCode;
use equipmatch::output::csv::HEADER;
use equipmatch::run_app;
use serde_json::Value;
use tempfile::{tempdir, TempDir};

use super::common::{env_lock, framed_icon, save_png, write_catalog};

struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn new(templates: u64) -> Self {
        let root = tempdir().unwrap();
        for sub in ["catalog", "probes", "cache"] {
            fs::create_dir(root.path().join(sub)).unwrap();
        }
        write_catalog(&root.path().join("catalog"), templates);
        Self { root }
    }

    fn path(&self, sub: &str) -> String {
        self.root.path().join(sub).to_string_lossy().into_owned()
    }

    fn probe(&self, name: &str, seed: u64) {
        save_png(&self.root.path().join("probes"), name, &framed_icon(seed));
    }

    fn run_match(&self, extra: &[&str]) -> anyhow::Result<ExitCode> {
        let (cache, catalog, probes) = (self.path("cache"), self.path("catalog"), self.path("probes"));
        let mut argv = vec![
            "equipmatch",
            "-q",
            "--cache",
            cache.as_str(),
            "match",
            catalog.as_str(),
            probes.as_str(),
        ];
        argv.extend_from_slice(extra);
        run_app(Cli::try_parse_from(argv).unwrap())
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_match_json_output() {
    let _env = env_lock();
    let ws = Workspace::new(3);
    ws.probe("slot_a", 2);
    ws.probe("slot_b", 0);
    let out = ws.root.path().join("out.json");

    let code = ws.run_match(&["--output-file", out.to_str().unwrap()]).unwrap();
    assert_eq!(code, ExitCode::Success);

    let json = read_json(&out);
    let matches = json["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0]["probe_id"], "slot_a");
    assert_eq!(matches[0]["best_template_id"], "item_02");
    assert_eq!(matches[0]["matched_by"], "pattern_and_color");
    assert_eq!(matches[0]["accepted"], true);
    assert_eq!(matches[1]["best_template_id"], "item_00");
    assert!(matches[0].get("candidates").is_none());

    assert_eq!(json["summary"]["probes"], 2);
    assert_eq!(json["summary"]["accepted"], 2);
    assert_eq!(json["summary"]["templates"], 3);
    assert_eq!(json["summary"]["exit_code"], 0);
    assert_eq!(json["summary"]["exit_code_name"], "EM000");
}

#[test]
fn test_match_diagnostics_lists_candidates() {
    let _env = env_lock();
    let ws = Workspace::new(3);
    ws.probe("slot", 1);
    let out = ws.root.path().join("out.json");

    ws.run_match(&["--diagnostics", "--output-file", out.to_str().unwrap()])
        .unwrap();
    let json = read_json(&out);
    let candidates = json["matches"][0]["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates[0]["template_id"], "item_01");
}

#[test]
fn test_match_csv_output() {
    let _env = env_lock();
    let ws = Workspace::new(2);
    ws.probe("slot", 1);
    let out = ws.root.path().join("out.csv");

    let code = ws
        .run_match(&["--format", "csv", "--output-file", out.to_str().unwrap()])
        .unwrap();
    assert_eq!(code, ExitCode::Success);

    let text = fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), HEADER.join(","));
    let row: Vec<&str> = lines.next().unwrap().split(',').collect();
    assert_eq!(row[0], "slot");
    assert_eq!(row[2], "item_01");
    assert_eq!(row[7], "pattern_and_color");
    assert_eq!(row[8], "true");
    assert!(lines.next().is_none());
}

#[test]
fn test_unaccepted_batch_exit_code() {
    let _env = env_lock();
    let ws = Workspace::new(2);
    ws.probe("stranger", 60);
    let out = ws.root.path().join("out.json");

    let code = ws
        .run_match(&["--accept-threshold", "100", "--output-file", out.to_str().unwrap()])
        .unwrap();
    assert_eq!(code, ExitCode::NoAcceptedMatches);
    let json = read_json(&out);
    assert_eq!(json["matches"][0]["accepted"], false);
    assert_eq!(json["summary"]["exit_code_name"], "EM002");
}

#[test]
fn test_broken_probe_is_partial_success() {
    let _env = env_lock();
    let ws = Workspace::new(2);
    ws.probe("good", 1);
    fs::write(ws.root.path().join("probes/bad.png"), b"garbage").unwrap();
    let out = ws.root.path().join("out.json");

    let code = ws.run_match(&["--output-file", out.to_str().unwrap()]).unwrap();
    assert_eq!(code, ExitCode::PartialSuccess);
    let json = read_json(&out);
    assert_eq!(json["matches"].as_array().unwrap().len(), 1);
    assert_eq!(json["failures"].as_array().unwrap().len(), 1);
    assert_eq!(json["summary"]["failed"], 1);
}

#[test]
fn test_broken_template_is_partial_success() {
    let _env = env_lock();
    let ws = Workspace::new(2);
    ws.probe("good", 1);
    fs::write(ws.root.path().join("catalog/zz_bad.png"), b"garbage").unwrap();
    let out = ws.root.path().join("out.json");

    let code = ws.run_match(&["--output-file", out.to_str().unwrap()]).unwrap();
    assert_eq!(code, ExitCode::PartialSuccess);
    assert_eq!(read_json(&out)["summary"]["templates"], 2);
}

#[test]
fn test_descriptor_matcher_from_cli() {
    let _env = env_lock();
    let ws = Workspace::new(2);
    // A textureless probe: every attempt fails.
    image::RgbImage::from_pixel(116, 116, image::Rgb([200, 60, 60]))
        .save(ws.root.path().join("probes/flat.png"))
        .unwrap();
    let out = ws.root.path().join("out.json");

    let code = ws
        .run_match(&["--matcher", "descriptor", "--output-file", out.to_str().unwrap()])
        .unwrap();
    assert_eq!(code, ExitCode::NoAcceptedMatches);
    let json = read_json(&out);
    assert_eq!(json["matches"][0]["matched_by"], "descriptor_geometric");
    assert_eq!(json["matches"][0]["composite_score"], 0.0);
}

#[test]
fn test_missing_probe_directory_is_error() {
    let _env = env_lock();
    let ws = Workspace::new(1);
    fs::remove_dir(ws.root.path().join("probes")).unwrap();
    assert!(ws.run_match(&[]).is_err());
}

#[test]
fn test_missing_config_file_is_error() {
    let _env = env_lock();
    let ws = Workspace::new(1);
    let cli = Cli::try_parse_from([
        "equipmatch",
        "-q",
        "--config",
        ws.path("absent.toml").as_str(),
        "cache-info",
    ])
    .unwrap();
    assert!(run_app(cli).is_err());
}

#[test]
fn test_config_file_threshold_applies() {
    let _env = env_lock();
    let ws = Workspace::new(2);
    ws.probe("slot", 1);
    let config = ws.root.path().join("config.toml");
    fs::write(&config, "[scoring]\naccept_threshold = 100.0\npattern_threshold = 100.0\n").unwrap();
    let out = ws.root.path().join("out.json");

    let (cache, catalog, probes) = (ws.path("cache"), ws.path("catalog"), ws.path("probes"));
    let cli = Cli::try_parse_from([
        "equipmatch",
        "-q",
        "--config",
        config.to_str().unwrap(),
        "--cache",
        cache.as_str(),
        "match",
        catalog.as_str(),
        probes.as_str(),
        "--accept-threshold",
        "50",
        "--output-file",
        out.to_str().unwrap(),
    ])
    .unwrap();

    // The CLI flag overrides the file's acceptance threshold.
    assert_eq!(run_app(cli).unwrap(), ExitCode::Success);
    assert_eq!(read_json(&out)["matches"][0]["accepted"], true);
}
