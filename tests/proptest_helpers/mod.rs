#![allow(dead_code)]

use labelkit::model::{NormBox, PixelBox};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Image dimensions from 1x1 up to 4096x4096.
pub fn arb_dims() -> impl Strategy<Value = (u32, u32)> {
    (1u32..=4096, 1u32..=4096)
}

/// Image dimensions with a pixel box strictly inside the image.
pub fn arb_dims_and_pixel_box() -> impl Strategy<Value = ((u32, u32), PixelBox)> {
    (2u32..=2048, 2u32..=2048).prop_flat_map(|(w, h)| {
        (0..w as i32 - 1, 0..h as i32 - 1).prop_flat_map(move |(x0, y0)| {
            (x0 + 1..w as i32, y0 + 1..h as i32)
                .prop_map(move |(x1, y1)| ((w, h), PixelBox::new(x0, y0, x1, y1)))
        })
    })
}

/// Any normalized box, including ones that stick out of the image.
pub fn arb_norm_box() -> impl Strategy<Value = NormBox> {
    (0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0)
        .prop_map(|(cx, cy, w, h)| NormBox::new(cx, cy, w, h))
}

/// One edit to a session's class list or boxes.
#[derive(Clone, Debug)]
pub enum ClassOp {
    Add(String),
    Remove(String),
    Assign { box_index: usize, class_id: i32 },
    DrawBox,
}

pub fn arb_class_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["cat", "dog", "bird", "car", "tree", " ", "dog "])
        .prop_map(str::to_string)
}

pub fn arb_class_op() -> impl Strategy<Value = ClassOp> {
    prop_oneof![
        3 => arb_class_name().prop_map(ClassOp::Add),
        2 => arb_class_name().prop_map(ClassOp::Remove),
        3 => (0usize..8, -1i32..6).prop_map(|(box_index, class_id)| ClassOp::Assign {
            box_index,
            class_id,
        }),
        2 => Just(ClassOp::DrawBox),
    ]
}
