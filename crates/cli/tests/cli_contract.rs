use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn annotator() -> Command {
    let mut command = Command::cargo_bin("annotator").expect("binary should be built");
    command.env_remove("ANNOTATOR_DRAG_THRESHOLD");
    command.env_remove("ANNOTATOR_HISTORY_LIMIT");
    command.env_remove("ANNOTATOR_FONT_SIZE");
    command
}

fn json_stdout(command: &mut Command) -> Value {
    let output = command.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

fn primitive_tags(value: &Value) -> Vec<String> {
    value["frame"]["primitives"]
        .as_array()
        .expect("primitives should be an array")
        .iter()
        .map(|p| p["primitive"].as_str().unwrap_or_default().to_owned())
        .collect()
}

#[test]
fn version_prints_package_version() {
    annotator()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn replay_emits_frame_in_paint_order() {
    let value = json_stdout(annotator().arg("replay").arg(fixture("shapes.json")));

    assert_eq!(value["annotation_count"], 3);
    assert_eq!(value["discarded"], 1);
    assert_eq!(value["history"]["index"], 4);
    assert_eq!(value["history"]["length"], 5);
    assert_eq!(value["history"]["can_redo"], false);

    assert_eq!(primitive_tags(&value), vec!["rect", "ellipse", "glyph_run"]);
    let layers: Vec<u64> = value["frame"]["primitives"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["layer"].as_u64().unwrap())
        .collect();
    assert_eq!(layers, vec![1, 1, 2]);

    let skipped = value["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["step"], 9);
}

#[test]
fn replay_scales_by_zoom() {
    let value = json_stdout(
        annotator().arg("replay").arg(fixture("shapes.json")).arg("--zoom").arg("2"),
    );

    assert_eq!(value["frame"]["backdrop"]["width"], 1224.0);
    assert_eq!(value["frame"]["backdrop"]["height"], 1584.0);
    let rect = &value["frame"]["primitives"][0]["rect"];
    assert_eq!(rect["x"], 20.0);
    assert_eq!(rect["width"], 200.0);
}

#[test]
fn replay_other_page_is_empty() {
    let value = json_stdout(annotator().arg("replay").arg(fixture("shapes.json")).arg("--page").arg("2"));
    assert!(value["frame"]["primitives"].as_array().unwrap().is_empty());
}

#[test]
fn replay_waits_for_raster_decodes() {
    let value = json_stdout(annotator().arg("replay").arg(fixture("images.json")));

    assert_eq!(primitive_tags(&value), vec!["image_blit", "image_blit", "rect"]);
    assert!(value["frame"]["deferred"].as_array().unwrap().is_empty());

    let blit = &value["frame"]["primitives"][0];
    assert_eq!(blit["pixel_width"], 3);
    assert_eq!(blit["pixel_height"], 2);

    let placeholder = &value["frame"]["primitives"][2];
    assert!(placeholder["fill"].is_null());
    assert_eq!(placeholder["stroke"], "#808080");
}

#[test]
fn replay_skips_hidden_layers() {
    let value = json_stdout(annotator().arg("replay").arg(fixture("hidden.json")));

    assert_eq!(primitive_tags(&value), vec!["line", "line", "line"]);
    assert_eq!(value["frame"]["primitives"][0]["color"], "#0000ff");
    assert_eq!(value["history"]["length"], 3);
}

#[test]
fn layers_lists_highest_first() {
    let value = json_stdout(annotator().arg("layers").arg(fixture("shapes.json")).arg("--page").arg("1"));

    let keys: Vec<u64> = value["layers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|layer| layer["key"].as_u64().unwrap())
        .collect();
    assert_eq!(keys, vec![2, 1]);
    assert_eq!(value["layers"][1]["annotation_ids"].as_array().unwrap().len(), 2);
    assert_eq!(value["layers"][0]["visible"], true);
}

#[test]
fn config_file_lowers_drag_threshold() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let config = temp.path().join("annotator.toml");
    std::fs::write(&config, "drag_threshold = 1.0\n").expect("config should be written");

    let value = json_stdout(
        annotator().arg("replay").arg(fixture("shapes.json")).arg("--config").arg(&config),
    );
    assert_eq!(value["annotation_count"], 4);
    assert_eq!(value["discarded"], 0);
}

#[test]
fn env_history_limit_bounds_history() {
    let value = json_stdout(
        annotator()
            .arg("replay")
            .arg(fixture("shapes.json"))
            .env("ANNOTATOR_HISTORY_LIMIT", "2"),
    );
    assert_eq!(value["history"]["length"], 2);
    assert_eq!(value["history"]["index"], 1);
}

#[test]
fn replay_fails_for_missing_script() {
    annotator()
        .arg("replay")
        .arg(fixture("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read script"));
}

#[test]
fn replay_fails_for_invalid_script() {
    annotator()
        .arg("replay")
        .arg(fixture("invalid.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse script"));
}

#[test]
fn replay_fails_for_out_of_range_page() {
    annotator()
        .arg("replay")
        .arg(fixture("shapes.json"))
        .arg("--page")
        .arg("3")
        .assert()
        .failure()
        .stderr(predicate::str::contains("page 3 is out of range"));
}

#[test]
fn invalid_env_config_is_reported() {
    annotator()
        .arg("replay")
        .arg(fixture("shapes.json"))
        .env("ANNOTATOR_DRAG_THRESHOLD", "wide")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ANNOTATOR_DRAG_THRESHOLD"));
}
