//! COCO detection layout.
//!
//! ```text
//! <out>/images/{train,val}/<name>
//! <out>/annotations/instances_{train,val}.json
//! ```
//!
//! Category ids are `class index + 1`. Image and annotation ids start at 1
//! and keep counting across both splits. Boxes are `[x, y, width, height]`
//! in absolute pixels.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::warn;
use serde::Serialize;

use super::{
    create_dir, exportable_boxes, resolve_dimensions, write_image, DatasetView, Split, SplitName,
    UniqueNamer, WriteStats,
};
use crate::error::LabelkitError;
use crate::worker::CancelToken;

#[derive(Debug, Default, Serialize)]
struct CocoFile {
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Serialize)]
struct CocoImage {
    id: u64,
    file_name: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: u64,

    /// `[x, y, width, height]`, top-left origin.
    bbox: [f64; 4],
    area: f64,
    iscrowd: u8,
}

#[derive(Debug, Clone, Serialize)]
struct CocoCategory {
    id: u64,
    name: String,
    supercategory: String,
}

/// Writes `split` from `view` into `output_dir`.
pub fn write_coco(
    view: DatasetView<'_>,
    output_dir: &Path,
    split: &Split,
    cancel: &CancelToken,
) -> Result<WriteStats, LabelkitError> {
    let annotations_dir = output_dir.join("annotations");
    create_dir(&annotations_dir)?;
    for split_name in [SplitName::Train, SplitName::Val] {
        create_dir(&output_dir.join("images").join(split_name.as_str()))?;
    }

    let categories: Vec<CocoCategory> = view
        .classes
        .iter()
        .enumerate()
        .map(|(idx, name)| CocoCategory {
            id: idx as u64 + 1,
            name: name.clone(),
            supercategory: "none".to_string(),
        })
        .collect();

    let mut stats = WriteStats::default();
    let mut namer = UniqueNamer::default();
    let mut next_image_id: u64 = 1;
    let mut next_annotation_id: u64 = 1;

    for (split_name, paths) in [(SplitName::Train, &split.train), (SplitName::Val, &split.val)] {
        let mut coco = CocoFile {
            categories: categories.clone(),
            ..CocoFile::default()
        };

        for path in paths {
            cancel.check()?;

            let Some(image) = view.images.get(path) else {
                warn!("{} is not in the dataset; skipped", path);
                stats.images_skipped += 1;
                continue;
            };
            let Some((width, height)) = resolve_dimensions(image) else {
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

            let image_id = next_image_id;
            next_image_id += 1;
            coco.images.push(CocoImage {
                id: image_id,
                file_name,
                width,
                height,
            });

            for (class_index, bbox) in exportable_boxes(image, view.classes.len(), &mut stats) {
                let px = bbox.bbox_norm.to_pixel_xyxy(width, height);
                coco.annotations.push(CocoAnnotation {
                    id: next_annotation_id,
                    image_id,
                    category_id: class_index as u64 + 1,
                    bbox: [px.xmin(), px.ymin(), px.width(), px.height()],
                    area: px.area(),
                    iscrowd: 0,
                });
                next_annotation_id += 1;
            }
            stats.record_image(split_name);
        }

        let json_path = annotations_dir.join(format!("instances_{}.json", split_name.as_str()));
        write_coco_json(&json_path, &coco)?;
    }

    Ok(stats)
}

fn write_coco_json(path: &Path, coco: &CocoFile) -> Result<(), LabelkitError> {
    let file = File::create(path).map_err(|source| LabelkitError::ExportIo {
        path: path.to_path_buf(),
        source,
    })?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, coco).map_err(|source| LabelkitError::ExportJson {
        path: path.to_path_buf(),
        source,
    })
}
