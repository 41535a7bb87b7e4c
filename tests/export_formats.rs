//! Integration tests for dataset export.

use std::fs;
use std::path::Path;

use labelkit::augment::Augmenter;
use labelkit::export::{export_dataset, ExportFormat, ExportRequest};
use labelkit::model::AppData;
use labelkit::LabelkitError;

mod common;
use common::{add_image, bbox};

/// Two annotated images and one without boxes. `a.png` carries one box
/// per state: assigned, unassigned and out of range.
fn sample_app(root: &Path) -> AppData {
    let mut app = AppData::new();
    app.classes = vec!["person".to_string(), "car".to_string()];
    add_image(
        &mut app,
        &root.join("src/a.png"),
        100,
        50,
        vec![
            bbox(1, 0.5, 0.5, 0.2, 0.4),
            bbox(-1, 0.2, 0.2, 0.1, 0.1),
            bbox(7, 0.8, 0.8, 0.1, 0.1),
        ],
    );
    add_image(
        &mut app,
        &root.join("src/b.png"),
        40,
        40,
        vec![bbox(0, 0.25, 0.25, 0.5, 0.5)],
    );
    add_image(&mut app, &root.join("src/empty.png"), 10, 10, Vec::new());
    app
}

fn export(app: &mut AppData, format: ExportFormat, out: &Path) -> labelkit::export::ExportReport {
    let request = ExportRequest::new(format, out).with_seed(Some(7));
    export_dataset(app, &Augmenter::default(), &request).expect("export")
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn yolo_export_skips_unassigned_and_unknown_classes() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut app = sample_app(temp.path());
    let out = temp.path().join("yolo");

    let report = export(&mut app, ExportFormat::Yolo, &out);
    assert_eq!(report.stats.images, 2);
    assert_eq!(report.stats.boxes, 2);
    assert_eq!(report.stats.boxes_unassigned, 1);
    assert_eq!(report.stats.boxes_invalid, 1);
    assert_eq!(report.stats.train_images + report.stats.val_images, 2);

    let mut label_a = None;
    for split in ["train", "val"] {
        let labels = out.join("labels").join(split);
        if labels.join("a.txt").is_file() {
            label_a = Some(fs::read_to_string(labels.join("a.txt")).expect("read label"));
        }
        assert!(!labels.join("empty.txt").exists());
    }
    assert_eq!(
        label_a.expect("a.txt written"),
        "1 0.500000 0.500000 0.200000 0.400000\n"
    );

    assert_eq!(
        fs::read_to_string(out.join("classes.txt")).expect("read classes"),
        "person\ncar\n"
    );
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(out.join("data.yaml")).expect("read yaml"))
            .expect("parse data.yaml");
    assert_eq!(yaml["nc"].as_u64(), Some(2));
    assert_eq!(yaml["names"][1].as_str(), Some("car"));
}

#[test]
fn coco_export_writes_pixel_bboxes_and_one_based_categories() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut app = sample_app(temp.path());
    let out = temp.path().join("coco");

    export(&mut app, ExportFormat::Coco, &out);

    let mut annotations = Vec::new();
    let mut categories = None;
    for split in ["train", "val"] {
        let path = out.join("annotations").join(format!("instances_{split}.json"));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read coco json"))
                .expect("parse coco json");
        annotations.extend(json["annotations"].as_array().expect("annotations").clone());
        categories = Some(json["categories"].clone());
    }

    assert_eq!(annotations.len(), 2);
    let ids: Vec<u64> = annotations
        .iter()
        .map(|a| a["id"].as_u64().expect("id"))
        .collect();
    assert!(ids.contains(&1) && ids.contains(&2));

    let car = annotations
        .iter()
        .find(|a| a["category_id"] == 2)
        .expect("car annotation");
    let bbox: Vec<f64> = car["bbox"]
        .as_array()
        .expect("bbox")
        .iter()
        .map(|v| v.as_f64().expect("number"))
        .collect();
    assert_eq!(bbox, vec![40.0, 15.0, 20.0, 20.0]);
    assert_eq!(car["area"].as_f64(), Some(400.0));

    let categories = categories.expect("categories");
    assert_eq!(categories[0]["id"], 1);
    assert_eq!(categories[0]["name"], "person");
    assert_eq!(categories[1]["supercategory"], "none");
}

#[test]
fn voc_export_writes_one_object_per_exportable_box() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut app = sample_app(temp.path());
    let out = temp.path().join("voc");

    export(&mut app, ExportFormat::Voc, &out);

    assert_eq!(files_in(&out.join("Annotations")), vec!["a.xml", "b.xml"]);
    assert_eq!(files_in(&out.join("JPEGImages")), vec!["a.png", "b.png"]);

    let xml = fs::read_to_string(out.join("Annotations/a.xml")).expect("read xml");
    let doc = roxmltree::Document::parse(&xml).expect("parse xml");
    let objects: Vec<_> = doc
        .descendants()
        .filter(|n| n.has_tag_name("object"))
        .collect();
    assert_eq!(objects.len(), 1);

    let text = |tag: &str| {
        objects[0]
            .descendants()
            .find(|n| n.has_tag_name(tag))
            .and_then(|n| n.text())
            .map(str::to_string)
    };
    assert_eq!(text("name").as_deref(), Some("car"));
    assert_eq!(text("xmin").as_deref(), Some("40"));
    assert_eq!(text("ymin").as_deref(), Some("15"));
    assert_eq!(text("xmax").as_deref(), Some("60"));
    assert_eq!(text("ymax").as_deref(), Some("35"));

    let train = fs::read_to_string(out.join("ImageSets/Main/train.txt")).expect("read train");
    let val = fs::read_to_string(out.join("ImageSets/Main/val.txt")).expect("read val");
    let mut ids: Vec<&str> = train.lines().chain(val.lines()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn resized_export_writes_target_sized_images() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut app = sample_app(temp.path());
    app.resize_output_enabled = true;
    app.resize_output_resolution = "64x64".to_string();
    let out = temp.path().join("resized");

    let report = export(&mut app, ExportFormat::Yolo, &out);
    assert_eq!(report.resized.map(|r| (r.width, r.height)), Some((64, 64)));

    for split in ["train", "val"] {
        for name in files_in(&out.join("images").join(split)) {
            let path = out.join("images").join(split).join(name);
            let dims = image::image_dimensions(&path).expect("read dims");
            assert_eq!(dims, (64, 64));
        }
    }
}

#[test]
fn export_with_augmentation_merges_synthetic_entries() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut app = sample_app(temp.path());
    let out = temp.path().join("augmented");

    let mut settings = labelkit::model::AugmentationSettings::all_disabled();
    settings.color.enabled = true;
    settings.color.probability = 1.0;
    settings.color.brightness_contrast_prob = 1.0;
    let augmenter = Augmenter::new(settings).expect("valid settings");

    let request = ExportRequest::new(ExportFormat::Yolo, &out)
        .with_augmentations(2)
        .with_seed(Some(3));
    let report = export_dataset(&mut app, &augmenter, &request).expect("export");

    let augmentation = report.augmentation.expect("augmentation ran");
    assert_eq!(augmentation.originals, 2);
    assert_eq!(augmentation.generated, 4);
    assert_eq!(report.augmented_merged, 4);
    assert_eq!(app.synthetic_count(), 4);
    assert_eq!(report.stats.images, 6);
}

#[test]
fn export_without_annotations_fails() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut app = AppData::new();
    add_image(&mut app, &temp.path().join("empty.png"), 10, 10, Vec::new());

    let request = ExportRequest::new(ExportFormat::Coco, temp.path().join("out"));
    let err = export_dataset(&mut app, &Augmenter::default(), &request).expect_err("no boxes");
    assert!(matches!(err, LabelkitError::NothingToExport));
    assert!(!temp.path().join("out").exists());
}

/// `cat.jpg` and `cat.png` share a stem; every label file is keyed by it.
fn same_stem_app(root: &Path) -> AppData {
    let mut app = AppData::new();
    app.classes = vec!["person".to_string(), "car".to_string()];
    add_image(&mut app, &root.join("src/cat.jpg"), 20, 20, vec![bbox(0, 0.5, 0.5, 0.5, 0.5)]);
    add_image(&mut app, &root.join("src/cat.png"), 20, 20, vec![bbox(1, 0.5, 0.5, 0.5, 0.5)]);
    app
}

fn export_all_train(app: &mut AppData, format: ExportFormat, out: &Path) {
    let request = ExportRequest::new(format, out)
        .with_seed(Some(3))
        .with_train_fraction(1.0);
    let report = export_dataset(app, &Augmenter::default(), &request).expect("export");
    assert_eq!(report.stats.images, 2);
}

#[test]
fn yolo_export_keeps_one_label_file_per_image_with_shared_stem() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut app = same_stem_app(temp.path());
    let out = temp.path().join("yolo");

    export_all_train(&mut app, ExportFormat::Yolo, &out);

    let images = files_in(&out.join("images/train"));
    let labels = files_in(&out.join("labels/train"));
    assert_eq!(images.len(), 2);
    assert_eq!(labels.len(), 2);
    for image in &images {
        let stem = Path::new(image).file_stem().expect("stem").to_string_lossy();
        assert!(labels.contains(&format!("{}.txt", stem)), "{image} has no label");
    }

    let mut classes: Vec<String> = labels
        .iter()
        .map(|name| {
            let line = fs::read_to_string(out.join("labels/train").join(name)).expect("read label");
            line.split_whitespace().next().expect("class id").to_string()
        })
        .collect();
    classes.sort();
    assert_eq!(classes, vec!["0", "1"]);
}

#[test]
fn voc_export_keeps_one_annotation_per_image_with_shared_stem() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut app = same_stem_app(temp.path());
    let out = temp.path().join("voc");

    export_all_train(&mut app, ExportFormat::Voc, &out);

    let xmls = files_in(&out.join("Annotations"));
    assert_eq!(xmls.len(), 2);
    assert_eq!(files_in(&out.join("JPEGImages")).len(), 2);

    let train = fs::read_to_string(out.join("ImageSets/Main/train.txt")).expect("read train");
    let mut ids: Vec<&str> = train.lines().collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 2);

    let mut names: Vec<String> = xmls
        .iter()
        .map(|xml| {
            let text = fs::read_to_string(out.join("Annotations").join(xml)).expect("read xml");
            let doc = roxmltree::Document::parse(&text).expect("parse xml");
            doc.descendants()
                .find(|n| n.has_tag_name("name"))
                .and_then(|n| n.text())
                .expect("object name")
                .to_string()
        })
        .collect();
    names.sort();
    assert_eq!(names, vec!["car", "person"]);
}
