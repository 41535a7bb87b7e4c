//! Ultralytics-style YOLO layout.
//!
//! ```text
//! <out>/images/{train,val}/<name>
//! <out>/labels/{train,val}/<stem>.txt
//! <out>/classes.txt
//! <out>/data.yaml
//! ```
//!
//! Label lines are `<class> <cx> <cy> <w> <h>` with normalized values and
//! six decimals. An image whose boxes are all filtered out still gets an
//! (empty) label file so it acts as a background example.

use std::path::Path;

use log::warn;

use super::{
    create_dir, exportable_boxes, write_file, write_image, DatasetView, Split, SplitName,
    UniqueNamer, WriteStats,
};
use crate::error::LabelkitError;
use crate::worker::CancelToken;

const LABEL_EXTENSION: &str = "txt";

/// Writes `split` from `view` into `output_dir`.
pub fn write_yolo(
    view: DatasetView<'_>,
    output_dir: &Path,
    split: &Split,
    cancel: &CancelToken,
) -> Result<WriteStats, LabelkitError> {
    for split_name in [SplitName::Train, SplitName::Val] {
        create_dir(&output_dir.join("images").join(split_name.as_str()))?;
        create_dir(&output_dir.join("labels").join(split_name.as_str()))?;
    }

    let mut stats = WriteStats::default();
    let mut namer = UniqueNamer::default();

    for (split_name, path) in split.iter() {
        cancel.check()?;

        let Some(image) = view.images.get(path) else {
            warn!("{} is not in the dataset; skipped", path);
            stats.images_skipped += 1;
            continue;
        };

        let file_name = namer.assign(path);
        let image_dest = output_dir
            .join("images")
            .join(split_name.as_str())
            .join(&file_name);
        if !write_image(image, &image_dest)? {
            stats.images_skipped += 1;
            continue;
        }

        let mut contents = String::new();
        for (class_index, bbox) in exportable_boxes(image, view.classes.len(), &mut stats) {
            let b = bbox.bbox_norm;
            contents.push_str(&format!(
                "{} {:.6} {:.6} {:.6} {:.6}\n",
                class_index, b.cx, b.cy, b.w, b.h
            ));
        }

        let label_path = output_dir
            .join("labels")
            .join(split_name.as_str())
            .join(Path::new(&file_name).with_extension(LABEL_EXTENSION));
        write_file(&label_path, contents)?;
        stats.record_image(split_name);
    }

    write_classes_txt(output_dir, view.classes)?;
    write_data_yaml(output_dir, view.classes)?;
    Ok(stats)
}

fn write_classes_txt(output_dir: &Path, classes: &[String]) -> Result<(), LabelkitError> {
    let mut contents = String::new();
    for name in classes {
        contents.push_str(name);
        contents.push('\n');
    }
    write_file(&output_dir.join("classes.txt"), contents)
}

fn write_data_yaml(output_dir: &Path, classes: &[String]) -> Result<(), LabelkitError> {
    let root = output_dir
        .canonicalize()
        .unwrap_or_else(|_| output_dir.to_path_buf());

    let mut yaml = String::new();
    yaml.push_str(&format!(
        "path: {}\n",
        yaml_single_quoted(&root.to_string_lossy())
    ));
    yaml.push_str("train: images/train\n");
    yaml.push_str("val: images/val\n");
    yaml.push_str(&format!("nc: {}\n", classes.len()));
    yaml.push_str("names:\n");
    for (idx, name) in classes.iter().enumerate() {
        yaml.push_str(&format!("  {}: {}\n", idx, yaml_single_quoted(name)));
    }

    write_file(&output_dir.join("data.yaml"), yaml)
}

fn yaml_single_quoted(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundingBox, ClassId, ImageAnnotation, NormBox};
    use image::RgbImage;
    use std::collections::BTreeMap;
    use std::fs;

    fn in_memory(path: &str, boxes: Vec<BoundingBox>) -> ImageAnnotation {
        ImageAnnotation::synthetic(path, "origin.png", RgbImage::new(8, 8), boxes)
    }

    #[test]
    fn writes_labels_classes_and_data_yaml() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let mut images = BTreeMap::new();
        images.insert(
            "a.png".to_string(),
            in_memory(
                "a.png",
                vec![
                    BoundingBox::new(1, NormBox::new(0.5, 0.25, 0.2, 0.1)),
                    BoundingBox::new(ClassId::UNASSIGNED, NormBox::new(0.5, 0.5, 0.5, 0.5)),
                ],
            ),
        );
        let classes = vec!["cat".to_string(), "it's".to_string()];
        let split = Split {
            train: vec!["a.png".to_string()],
            val: Vec::new(),
        };

        let stats = write_yolo(
            DatasetView::new(&images, &classes),
            temp.path(),
            &split,
            &CancelToken::new(),
        )
        .expect("write yolo");

        assert_eq!(stats.images, 1);
        assert_eq!(stats.boxes, 1);
        assert_eq!(stats.boxes_unassigned, 1);
        assert!(temp.path().join("images/train/a.png").is_file());

        let label = fs::read_to_string(temp.path().join("labels/train/a.txt")).expect("label");
        assert_eq!(label, "1 0.500000 0.250000 0.200000 0.100000\n");

        let classes_txt = fs::read_to_string(temp.path().join("classes.txt")).expect("classes");
        assert_eq!(classes_txt, "cat\nit's\n");

        let yaml = fs::read_to_string(temp.path().join("data.yaml")).expect("data.yaml");
        assert!(yaml.contains("nc: 2\n"));
        assert!(yaml.contains("  1: 'it''s'\n"));
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("valid yaml");
        assert_eq!(parsed["names"][1].as_str(), Some("it's"));
        assert_eq!(parsed["train"].as_str(), Some("images/train"));
    }

    #[test]
    fn missing_source_is_skipped_not_fatal() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let mut images = BTreeMap::new();
        let mut missing = ImageAnnotation::new("/nowhere/gone.jpg");
        missing
            .boxes
            .push(BoundingBox::new(0, NormBox::new(0.5, 0.5, 0.2, 0.2)));
        images.insert(missing.image_path.clone(), missing);
        images.insert(
            "b.png".to_string(),
            in_memory(
                "b.png",
                vec![BoundingBox::new(0, NormBox::new(0.5, 0.5, 0.2, 0.2))],
            ),
        );
        let classes = vec!["cat".to_string()];
        let split = Split {
            train: vec!["/nowhere/gone.jpg".to_string()],
            val: vec!["b.png".to_string()],
        };

        let stats = write_yolo(
            DatasetView::new(&images, &classes),
            temp.path(),
            &split,
            &CancelToken::new(),
        )
        .expect("write yolo");

        assert_eq!(stats.images_skipped, 1);
        assert_eq!(stats.val_images, 1);
        assert!(!temp.path().join("labels/train/gone.txt").exists());
        assert!(temp.path().join("labels/val/b.txt").is_file());
    }
}
