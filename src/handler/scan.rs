//! Image file discovery for `add_image_paths`.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::LabelkitError;

pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

/// Expands `inputs` into image files: files are kept if they have an image
/// extension, directories are walked recursively. The result is sorted and
/// free of duplicates.
pub fn collect_image_files<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<PathBuf>, LabelkitError> {
    let mut files = Vec::new();

    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            for entry in WalkDir::new(input).follow_links(true) {
                let entry = entry.map_err(|source| LabelkitError::Io(source.into()))?;
                if entry.file_type().is_file() && has_image_extension(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else if has_image_extension(input) {
            files.push(input.to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

pub fn has_image_extension(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    IMAGE_EXTENSIONS
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_directories_and_filters_extensions() {
        let temp = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(temp.path().join("nested")).expect("create nested dir");
        fs::write(temp.path().join("a.JPG"), b"x").expect("write a");
        fs::write(temp.path().join("nested/b.png"), b"x").expect("write b");
        fs::write(temp.path().join("notes.txt"), b"x").expect("write notes");

        let files = collect_image_files(&[temp.path()]).expect("collect");
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);
    }

    #[test]
    fn explicit_files_are_deduplicated() {
        let files =
            collect_image_files(&["x/cat.jpg", "x/cat.jpg", "x/readme.md"]).expect("collect");
        assert_eq!(files, vec![PathBuf::from("x/cat.jpg")]);
    }
}
