//! Property tests: output guarantees hold for arbitrary pages
//!
//! Run with: `cargo test -p docling-layout --test proptest_invariants`
//! More cases: `PROPTEST_CASES=1000 cargo test -p docling-layout --test proptest_invariants`

mod common;

use common::{arb_page, check_invariants, proptest_config};
use docling_layout::{LayoutReconciler, Provenance, SYNTHETIC_CONFIDENCE};
use proptest::prelude::*;

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn prop_output_guarantees_hold(page in arb_page()) {
        let result = LayoutReconciler::new().process(page.clone());
        prop_assert!(result.is_ok(), "valid page rejected: {:?}", result.err());
        let result = result.unwrap();
        if let Err(msg) = check_invariants(&page, &result) {
            prop_assert!(false, "{}", msg);
        }
    }

    #[test]
    fn prop_reconciliation_is_deterministic(page in arb_page()) {
        let reconciler = LayoutReconciler::new();
        let first = reconciler.process(page.clone()).unwrap();
        let second = reconciler.process(page).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_synthetic_clusters_carry_sentinel_confidence(page in arb_page()) {
        let result = LayoutReconciler::new().process(page).unwrap();
        for cluster in &result.clusters {
            match cluster.provenance {
                Provenance::OrphanDefault | Provenance::MergedCells => {
                    prop_assert_eq!(cluster.confidence, SYNTHETIC_CONFIDENCE);
                }
                Provenance::ModelPrimary | Provenance::ModelLowConfRescue => {
                    prop_assert!((0.0..=1.0).contains(&cluster.confidence));
                }
            }
        }
    }

    #[test]
    fn prop_text_like_clusters_fit_their_cells(page in arb_page()) {
        let result = LayoutReconciler::new().process(page.clone()).unwrap();
        for cluster in result.clusters.iter().filter(|c| c.label.is_text_like()) {
            let fitted = docling_layout::BBox::union_all(
                cluster.cell_ids.iter().map(|&id| &page.cells[id].bbox),
            );
            prop_assert_eq!(cluster.bbox, fitted);
        }
    }
}
