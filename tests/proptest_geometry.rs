use labelkit::model::{normalized_to_pixel, pixel_to_normalized, Resolution};
use labelkit::resize::Letterbox;
use proptest::prelude::*;

mod proptest_helpers;

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn pixel_round_trip_moves_corners_at_most_one_pixel(
        ((w, h), original) in proptest_helpers::arb_dims_and_pixel_box()
    ) {
        let norm = pixel_to_normalized(original, w, h).expect("non-zero dims");
        prop_assert!(norm.is_in_range());

        let back = normalized_to_pixel(norm, w, h).expect("non-zero dims");
        prop_assert!((back.x_min - original.x_min).abs() <= 1, "{:?} -> {:?}", original, back);
        prop_assert!((back.y_min - original.y_min).abs() <= 1, "{:?} -> {:?}", original, back);
        prop_assert!((back.x_max - original.x_max).abs() <= 1, "{:?} -> {:?}", original, back);
        prop_assert!((back.y_max - original.y_max).abs() <= 1, "{:?} -> {:?}", original, back);
    }

    #[test]
    fn pixel_boxes_stay_inside_the_image(
        (w, h) in proptest_helpers::arb_dims(),
        norm in proptest_helpers::arb_norm_box()
    ) {
        let px = normalized_to_pixel(norm, w, h).expect("non-zero dims");
        prop_assert!(px.x_min >= 0 && px.y_min >= 0);
        prop_assert!(px.x_max <= w as i32 - 1 && px.y_max <= h as i32 - 1);
        prop_assert!(px.x_min <= px.x_max && px.y_min <= px.y_max);
        if w > 1 {
            prop_assert!(px.width() >= 1);
        }
        if h > 1 {
            prop_assert!(px.height() >= 1);
        }
    }

    #[test]
    fn letterboxed_boxes_stay_normalized(
        (w, h) in proptest_helpers::arb_dims(),
        (tw, th) in (1u32..=1024, 1u32..=1024),
        norm in proptest_helpers::arb_norm_box()
    ) {
        let fit = Letterbox::fit(w, h, Resolution::new(tw, th));
        prop_assert!(fit.scaled_width <= tw && fit.scaled_height <= th);
        prop_assert!(fit.pad_left + fit.scaled_width <= tw);
        prop_assert!(fit.pad_top + fit.scaled_height <= th);

        let mapped = fit.map_box(norm, w, h);
        prop_assert!(mapped.is_in_range(), "{:?} -> {:?}", norm, mapped);
    }
}
