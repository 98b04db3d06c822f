//! Property tests for the bounding-box accumulator

use nalgebra::Point3;
use proptest::prelude::*;
use stepnc_scene::BoundingBox;

fn coord() -> impl Strategy<Value = f64> {
    -1.0e6..1.0e6
}

prop_compose! {
    fn arb_box()(
        ax in coord(), ay in coord(), az in coord(),
        bx in coord(), by in coord(), bz in coord(),
    ) -> BoundingBox {
        BoundingBox::from_extents(
            Point3::new(ax, ay, az),
            Point3::new(bx, by, bz),
        )
    }
}

proptest! {
    #[test]
    fn union_takes_min_and_max_per_axis(a in arb_box(), b in arb_box()) {
        let mut merged = a;
        merged.update_from(&b, None);
        prop_assert_eq!(merged.minx, a.minx.min(b.minx));
        prop_assert_eq!(merged.maxx, a.maxx.max(b.maxx));
        prop_assert_eq!(merged.miny, a.miny.min(b.miny));
        prop_assert_eq!(merged.maxy, a.maxy.max(b.maxy));
        prop_assert_eq!(merged.minz, a.minz.min(b.minz));
        prop_assert_eq!(merged.maxz, a.maxz.max(b.maxz));
    }

    #[test]
    fn union_is_idempotent(a in arb_box(), b in arb_box()) {
        let mut once = a;
        once.update_from(&b, None);
        let mut twice = once;
        twice.update_from(&b, None);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn min_never_exceeds_max(a in arb_box(), b in arb_box()) {
        let mut merged = a;
        merged.update_from(&b, None);
        prop_assert!(merged.minx <= merged.maxx);
        prop_assert!(merged.miny <= merged.maxy);
        prop_assert!(merged.minz <= merged.maxz);
    }

    #[test]
    fn accumulation_never_shrinks(a in arb_box(), b in arb_box()) {
        let mut merged = a;
        merged.update_from(&b, None);
        prop_assert!(merged.minx <= a.minx);
        prop_assert!(merged.maxx >= a.maxx);
        prop_assert!(merged.diagonal() >= a.diagonal());
    }

    #[test]
    fn merging_into_empty_copies(b in arb_box()) {
        let mut empty = BoundingBox::new();
        empty.update_from(&b, None);
        prop_assert_eq!(empty, b);
    }

    #[test]
    fn merging_empty_is_noop(a in arb_box()) {
        let mut merged = a;
        merged.update_from(&BoundingBox::new(), None);
        prop_assert_eq!(merged, a);
    }
}
