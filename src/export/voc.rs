//! Pascal VOC layout.
//!
//! ```text
//! <out>/JPEGImages/<name>
//! <out>/Annotations/<stem>.xml
//! <out>/ImageSets/Main/{train,val}.txt
//! ```
//!
//! Box corners are written as integer pixels.

use std::fmt::{self, Write as _};
use std::io;
use std::path::Path;

use log::warn;

use super::{
    create_dir, exportable_boxes, resolve_dimensions, write_file, write_image, DatasetView, Split,
    SplitName, UniqueNamer, WriteStats,
};
use crate::error::LabelkitError;
use crate::model::{normalized_to_pixel, PixelBox};
use crate::worker::CancelToken;

/// One `<object>` entry.
struct VocObject<'a> {
    name: &'a str,
    bndbox: PixelBox,
}

/// Writes `split` from `view` into `output_dir`.
pub fn write_voc(
    view: DatasetView<'_>,
    output_dir: &Path,
    split: &Split,
    cancel: &CancelToken,
) -> Result<WriteStats, LabelkitError> {
    let images_dir = output_dir.join("JPEGImages");
    let annotations_dir = output_dir.join("Annotations");
    let sets_dir = output_dir.join("ImageSets").join("Main");
    create_dir(&images_dir)?;
    create_dir(&annotations_dir)?;
    create_dir(&sets_dir)?;

    let mut stats = WriteStats::default();
    let mut namer = UniqueNamer::default();
    let mut train_ids = String::new();
    let mut val_ids = String::new();

    for (split_name, path) in split.iter() {
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
        if !write_image(image, &images_dir.join(&file_name))? {
            stats.images_skipped += 1;
            continue;
        }

        let objects: Vec<VocObject<'_>> = exportable_boxes(image, view.classes.len(), &mut stats)
            .into_iter()
            .filter_map(|(class_index, bbox)| {
                Some(VocObject {
                    name: &view.classes[class_index],
                    bndbox: normalized_to_pixel(bbox.bbox_norm, width, height)?,
                })
            })
            .collect();

        let stem = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        let xml_path = annotations_dir.join(format!("{}.xml", stem));
        let xml = render_voc_xml(&file_name, width, height, &objects).map_err(|_| {
            LabelkitError::ExportIo {
                path: xml_path.clone(),
                source: io::Error::other("failed to format annotation XML"),
            }
        })?;
        write_file(&xml_path, xml)?;

        let ids = match split_name {
            SplitName::Train => &mut train_ids,
            SplitName::Val => &mut val_ids,
        };
        ids.push_str(&stem);
        ids.push('\n');
        stats.record_image(split_name);
    }

    write_file(&sets_dir.join("train.txt"), train_ids)?;
    write_file(&sets_dir.join("val.txt"), val_ids)?;
    Ok(stats)
}

fn render_voc_xml(
    file_name: &str,
    width: u32,
    height: u32,
    objects: &[VocObject<'_>],
) -> Result<String, fmt::Error> {
    let mut xml = String::new();

    writeln!(xml, "<?xml version=\"1.0\" encoding=\"utf-8\"?>")?;
    writeln!(xml, "<annotation>")?;
    writeln!(xml, "  <folder>JPEGImages</folder>")?;
    writeln!(xml, "  <filename>{}</filename>", xml_escape(file_name))?;
    writeln!(xml, "  <size>")?;
    writeln!(xml, "    <width>{}</width>", width)?;
    writeln!(xml, "    <height>{}</height>", height)?;
    writeln!(xml, "    <depth>3</depth>")?;
    writeln!(xml, "  </size>")?;
    writeln!(xml, "  <segmented>0</segmented>")?;

    for object in objects {
        writeln!(xml, "  <object>")?;
        writeln!(xml, "    <name>{}</name>", xml_escape(object.name))?;
        writeln!(xml, "    <pose>Unspecified</pose>")?;
        writeln!(xml, "    <truncated>0</truncated>")?;
        writeln!(xml, "    <difficult>0</difficult>")?;
        writeln!(xml, "    <bndbox>")?;
        writeln!(xml, "      <xmin>{}</xmin>", object.bndbox.x_min)?;
        writeln!(xml, "      <ymin>{}</ymin>", object.bndbox.y_min)?;
        writeln!(xml, "      <xmax>{}</xmax>", object.bndbox.x_max)?;
        writeln!(xml, "      <ymax>{}</ymax>", object.bndbox.y_max)?;
        writeln!(xml, "    </bndbox>")?;
        writeln!(xml, "  </object>")?;
    }

    writeln!(xml, "</annotation>")?;
    Ok(xml)
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundingBox, ClassId, ImageAnnotation, NormBox};
    use image::RgbImage;
    use std::collections::BTreeMap;
    use std::fs;

    #[test]
    fn writes_xml_and_image_sets() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let mut images = BTreeMap::new();
        images.insert(
            "dir/a.png".to_string(),
            ImageAnnotation::synthetic(
                "dir/a.png",
                "origin.png",
                RgbImage::new(100, 50),
                vec![
                    BoundingBox::new(0, NormBox::new(0.5, 0.5, 0.2, 0.4)),
                    BoundingBox::new(ClassId::UNASSIGNED, NormBox::new(0.2, 0.2, 0.1, 0.1)),
                ],
            ),
        );
        let classes = vec!["cats & dogs".to_string()];
        let split = Split {
            train: Vec::new(),
            val: vec!["dir/a.png".to_string()],
        };

        let stats = write_voc(
            DatasetView::new(&images, &classes),
            temp.path(),
            &split,
            &CancelToken::new(),
        )
        .expect("write voc");
        assert_eq!(stats.val_images, 1);
        assert_eq!(stats.boxes_unassigned, 1);

        assert!(temp.path().join("JPEGImages/a.png").is_file());
        let xml = fs::read_to_string(temp.path().join("Annotations/a.xml")).expect("read xml");
        let doc = roxmltree::Document::parse(&xml).expect("parse xml");

        let objects: Vec<_> = doc
            .descendants()
            .filter(|n| n.has_tag_name("object"))
            .collect();
        assert_eq!(objects.len(), 1);

        let text = |tag: &str| {
            doc.descendants()
                .find(|n| n.has_tag_name(tag))
                .and_then(|n| n.text())
                .map(str::to_string)
        };
        assert_eq!(text("name").as_deref(), Some("cats & dogs"));
        assert_eq!(text("xmin").as_deref(), Some("40"));
        assert_eq!(text("ymax").as_deref(), Some("35"));
        assert_eq!(text("width").as_deref(), Some("100"));

        let val = fs::read_to_string(temp.path().join("ImageSets/Main/val.txt")).expect("val.txt");
        assert_eq!(val, "a\n");
        let train =
            fs::read_to_string(temp.path().join("ImageSets/Main/train.txt")).expect("train.txt");
        assert!(train.is_empty());
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(xml_escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
    }
}
