#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;

use docling_layout::{BBox, ClusterLabel, PageInput, Prediction, ReconciledPage, TextCell};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

/// Install a test logger once; `RUST_LOG=docling_layout=trace` shows stage decisions
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_data(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Cells numbered in slice order, texts `w0`, `w1`, ...
pub fn cells(boxes: &[[f64; 4]]) -> Vec<TextCell> {
    boxes
        .iter()
        .enumerate()
        .map(|(i, [l, b, r, t])| TextCell::new(i, BBox::new(*l, *b, *r, *t), format!("w{i}")))
        .collect()
}

pub fn prediction(id: usize, label: &str, [l, b, r, t]: [f64; 4], confidence: f64) -> Prediction {
    Prediction::new(id, label, BBox::new(l, b, r, t), confidence)
}

/// Check the output guarantees for `input`/`output`
pub fn check_invariants(input: &PageInput, output: &ReconciledPage) -> Result<(), String> {
    let cells = &input.cells;

    // Dense ids in order
    for (position, cluster) in output.clusters.iter().enumerate() {
        if cluster.id != position {
            return Err(format!("cluster at {position} has id {}", cluster.id));
        }
    }

    // Membership: valid, no cell twice
    let mut seen = BTreeSet::new();
    for cluster in &output.clusters {
        if cluster.cell_ids.is_empty() && cluster.label != ClusterLabel::Picture {
            return Err(format!("empty non-picture cluster {}", cluster.id));
        }
        for &cell_id in &cluster.cell_ids {
            if cell_id >= cells.len() {
                return Err(format!("cluster {} references missing cell {cell_id}", cluster.id));
            }
            if !seen.insert(cell_id) {
                return Err(format!("cell {cell_id} appears in more than one cluster"));
            }
        }
    }

    // Coverage: every non-blank cell is clustered or reported unassigned
    for cell in cells.iter().filter(|c| !c.is_blank()) {
        let clustered = seen.contains(&cell.index);
        let reported = output.unassigned_cells.contains(&cell.index);
        if clustered == reported {
            return Err(format!(
                "cell {} clustered={clustered} reported_unassigned={reported}",
                cell.index
            ));
        }
        if reported && !output.lines_detector {
            let in_picture = output
                .clusters
                .iter()
                .any(|c| c.label == ClusterLabel::Picture && c.bbox.contains(&cell.bbox));
            if !in_picture {
                return Err(format!("cell {} left unassigned outside any picture", cell.index));
            }
        }
    }

    // Reading order: ascending first cell, empty clusters last
    let mut previous: Option<usize> = None;
    let mut saw_empty = false;
    for cluster in &output.clusters {
        match cluster.cell_ids.first() {
            Some(&first) => {
                if saw_empty {
                    return Err(format!("cluster {} with cells after an empty one", cluster.id));
                }
                if !cluster.cell_ids.windows(2).all(|w| w[0] < w[1]) {
                    return Err(format!("cluster {} cell ids not sorted", cluster.id));
                }
                if previous.is_some_and(|p| p > first) {
                    return Err(format!("cluster {} breaks reading order", cluster.id));
                }
                previous = Some(first);
            }
            None => saw_empty = true,
        }
    }

    // No lower-confidence cluster overlaps or sits inside a higher-confidence one
    for (i, a) in output.clusters.iter().enumerate() {
        for b in &output.clusters[i + 1..] {
            let (lower, higher) = if a.confidence < b.confidence {
                (a, b)
            } else if b.confidence < a.confidence {
                (b, a)
            } else {
                continue;
            };
            let iou = higher.bbox.iou(&lower.bbox);
            if iou > 0.5 || higher.bbox.contains_with_margin(&lower.bbox, 3.0) {
                return Err(format!(
                    "cluster {} ({:?}, conf {}) duplicates cluster {} ({:?}, conf {}), iou {iou}",
                    lower.id, lower.bbox, lower.confidence, higher.id, higher.bbox, higher.confidence
                ));
            }
        }
    }

    // Tables enclose their own cells
    for table in output.clusters.iter().filter(|c| c.label == ClusterLabel::Table) {
        let own = BBox::union_all(table.cell_ids.iter().map(|&id| &cells[id].bbox));
        if !table.bbox.contains(&own) {
            return Err(format!(
                "table {} bbox {:?} does not contain its cells {:?}",
                table.id, table.bbox, own
            ));
        }
    }

    Ok(())
}

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

const LABELS: [&str; 8] = [
    "Text",
    "Section-header",
    "List-item",
    "Table",
    "Picture",
    "Caption",
    "Page-footer",
    "Key-Value Region",
];

/// Word cells laid out in lines of five, some blank, with jittered widths
pub fn arb_cells(max_cells: usize) -> impl Strategy<Value = Vec<TextCell>> {
    proptest::collection::vec((5.0f64..30.0, 0.0f64..4.0, any::<bool>(), 0u8..10), 0..=max_cells).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (width, x_jitter, wide_gap, blank_roll))| {
                    let column = (i % 5) as f64;
                    let line = (i / 5) as f64;
                    let l = 50.0 + column * 40.0 + x_jitter + if wide_gap { 3.0 } else { 0.0 };
                    let b = 700.0 - line * 12.0;
                    let text = if blank_roll == 0 { " ".to_string() } else { format!("w{i}") };
                    TextCell::new(i, BBox::new(l, b, l + width, b + 9.0), text)
                })
                .collect()
        },
    )
}

/// Detector boxes over the cell area
pub fn arb_predictions(max_predictions: usize, first_id: usize) -> impl Strategy<Value = Vec<Prediction>> {
    proptest::collection::vec(
        (
            30.0f64..260.0,
            400.0f64..720.0,
            5.0f64..200.0,
            5.0f64..120.0,
            0usize..LABELS.len(),
            0.0f64..1.0,
        ),
        0..=max_predictions,
    )
    .prop_map(move |specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (l, b, w, h, label, confidence))| {
                Prediction::new(first_id + i, LABELS[label], BBox::new(l, b, l + w, b + h), confidence)
            })
            .collect()
    })
}

pub fn arb_page() -> impl Strategy<Value = PageInput> {
    (arb_cells(40), arb_predictions(8, 0), arb_predictions(8, 100)).prop_map(|(cells, primary, low)| PageInput {
        cells,
        primary,
        low,
    })
}
