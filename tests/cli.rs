use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

mod common;
use common::write_png;

fn labelkit(state_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("labelkit").unwrap();
    cmd.env_remove("LABELKIT_CONFIG")
        .arg("--state-dir")
        .arg(state_dir);
    cmd
}

#[test]
fn runs() {
    let mut cmd = Command::cargo_bin("labelkit").unwrap();
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("labelkit"));
}

#[test]
fn outputs_tool_name() {
    let mut cmd = Command::cargo_bin("labelkit").unwrap();
    cmd.arg("-V");
    cmd.assert()
        .success()
        .stdout(format!("labelkit {}\n", env!("CARGO_PKG_VERSION")));
}

#[test]
fn add_images_scans_directories_once() {
    let temp = tempfile::tempdir().unwrap();
    let state = temp.path().join("state");
    write_png(&temp.path().join("data/a.png"), 8, 8);
    write_png(&temp.path().join("data/nested/b.png"), 8, 8);
    fs::write(temp.path().join("data/notes.txt"), "x").unwrap();

    labelkit(&state)
        .arg("add-images")
        .arg(temp.path().join("data"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Added 2 images (0 already registered)"));

    labelkit(&state)
        .arg("add-images")
        .arg(temp.path().join("data"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Added 0 images (2 already registered)"));

    assert!(state.join("session_state.json").is_file());
}

#[test]
fn classes_are_listed_in_id_order() {
    let temp = tempfile::tempdir().unwrap();
    let state = temp.path().join("state");
    let names = temp.path().join("classes.txt");
    fs::write(&names, "person\n\ncar\nperson\n").unwrap();

    labelkit(&state)
        .args(["classes", "import"])
        .arg(&names)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 classes"));

    labelkit(&state)
        .args(["classes", "add", "bike"])
        .assert()
        .success();

    labelkit(&state)
        .args(["classes", "add", "car"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    labelkit(&state)
        .args(["classes", "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"0\s+person\n\s*1\s+car\n\s*2\s+bike").unwrap());
}

#[test]
fn draw_box_then_export_yolo() {
    let temp = tempfile::tempdir().unwrap();
    let state = temp.path().join("state");
    let image = temp.path().join("img.png");
    write_png(&image, 100, 50);
    let image_arg = image.to_string_lossy().into_owned();
    let out = temp.path().join("dataset");

    labelkit(&state).arg("add-images").arg(&image).assert().success();
    labelkit(&state)
        .args(["classes", "add", "person", "car"])
        .assert()
        .success();
    labelkit(&state)
        .args(["boxes", "add", &image_arg, "40", "15", "60", "35", "--class", "car"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added box 0"));
    labelkit(&state)
        .args(["boxes", "add", &image_arg, "0", "0", "10", "10"])
        .assert()
        .success();

    labelkit(&state)
        .args(["export", "--format", "yolo", "--seed", "1", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("yolo"));

    let label = fs::read_to_string(out.join("labels/train/img.txt")).unwrap();
    assert_eq!(label, "1 0.500000 0.500000 0.200000 0.400000\n");
    assert!(out.join("images/train/img.png").is_file());
    assert!(out.join("data.yaml").is_file());
}

#[test]
fn export_rejects_unknown_format() {
    let temp = tempfile::tempdir().unwrap();
    labelkit(&temp.path().join("state"))
        .args(["export", "--format", "labelme", "--output"])
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported format"));
}

#[test]
fn export_of_empty_session_fails() {
    let temp = tempfile::tempdir().unwrap();
    labelkit(&temp.path().join("state"))
        .args(["export", "--format", "coco", "--output"])
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No annotated images"));
}

#[test]
fn settings_persist_and_show_in_inspect_json() {
    let temp = tempfile::tempdir().unwrap();
    let state = temp.path().join("state");

    labelkit(&state)
        .args([
            "settings",
            "--confidence-threshold",
            "0.4",
            "--resize",
            "320x320",
            "--disable",
            "weather",
        ])
        .assert()
        .success();

    labelkit(&state)
        .args(["inspect", "--output", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resize_output\": \"320x320\""))
        .stdout(predicate::str::contains("\"confidence_threshold\": 0.4"));

    let raw = fs::read_to_string(state.join("session_state.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        json["augmentation_settings"]["enabled_transforms"]["weather"],
        false
    );
}

#[test]
fn settings_reject_bad_resolution() {
    let temp = tempfile::tempdir().unwrap();
    labelkit(&temp.path().join("state"))
        .args(["settings", "--resize", "640by640"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid resolution"));
}

#[test]
fn config_file_seeds_a_fresh_session() {
    let temp = tempfile::tempdir().unwrap();
    let config = temp.path().join("labelkit.yaml");
    fs::write(&config, "confidence_threshold: 0.7\naugmentation:\n  blur:\n    enabled: false\n")
        .unwrap();

    labelkit(&temp.path().join("state"))
        .arg("--config")
        .arg(&config)
        .args(["inspect", "--output", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"confidence_threshold\": 0.7"));
}

#[test]
fn malformed_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let config = temp.path().join("labelkit.yaml");
    fs::write(&config, "num_augmentation: 3\n").unwrap();

    labelkit(&temp.path().join("state"))
        .arg("--config")
        .arg(&config)
        .arg("inspect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}

#[test]
fn augment_writes_images_to_output_dir() {
    let temp = tempfile::tempdir().unwrap();
    let state = temp.path().join("state");
    let image = temp.path().join("img.png");
    write_png(&image, 64, 64);
    let image_arg = image.to_string_lossy().into_owned();
    let out = temp.path().join("augmented");

    labelkit(&state).arg("add-images").arg(&image).assert().success();
    labelkit(&state)
        .args(["classes", "add", "thing"])
        .assert()
        .success();
    labelkit(&state)
        .args(["boxes", "add", &image_arg, "8", "8", "56", "56", "--class", "thing"])
        .assert()
        .success();
    labelkit(&state)
        .args([
            "settings",
            "--disable",
            "geometric",
            "--disable",
            "weather",
            "--disable",
            "noise",
            "--disable",
            "blur",
        ])
        .assert()
        .success();

    labelkit(&state)
        .args(["augment", "--count", "3", "--seed", "5", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("augmented images"));

    // Augmented entries never outlive the run that produced them.
    labelkit(&state)
        .args(["inspect", "--output", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"synthetic\": 0"));
}

#[test]
fn clear_removes_the_state_file() {
    let temp = tempfile::tempdir().unwrap();
    let state = temp.path().join("state");

    labelkit(&state)
        .args(["classes", "add", "cat"])
        .assert()
        .success();
    assert!(state.join("session_state.json").is_file());

    labelkit(&state)
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Session cleared"));
    assert!(!state.join("session_state.json").exists());
}
