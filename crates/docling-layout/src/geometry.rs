//! Axis-aligned bounding box kernel
//!
//! Page coordinates use a bottom-left origin with y increasing upward, so a box is
//! `(l, b, r, t)` = (x_left, y_bottom, x_right, y_top). All predicates are pure.
//!
//! Two area conventions:
//! - [`BBox::intersection_area`] / [`BBox::area`] are continuous (cell coverage ratios)
//! - [`BBox::iou`] uses the inclusive-pixel `+1` convention on width and height
//!   (duplicate and rescue thresholds)
use serde::{Deserialize, Serialize};

/// Union denominators below this are treated as zero in [`BBox::iou`]
const IOU_EPSILON: f64 = 1e-9;

/// Denominator floor for [`BBox::vertical_overlap_fraction`] on zero-height boxes
const MIN_OVERLAP_DENOMINATOR: f64 = 0.001;

/// Bounding box in bottom-left-origin page coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub l: f64, // left (x_min)
    pub b: f64, // bottom (y_min)
    pub r: f64, // right (x_max)
    pub t: f64, // top (y_max)
}

impl BBox {
    /// Create a new bounding box from `(x_left, y_bottom, x_right, y_top)`
    #[inline]
    #[must_use = "returns a new BBox instance"]
    pub const fn new(l: f64, b: f64, r: f64, t: f64) -> Self {
        Self { l, b, r, t }
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        self.r - self.l
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> f64 {
        self.t - self.b
    }

    /// Area of the box (absolute, so inverted boxes never report negative area)
    #[inline]
    #[must_use = "returns the bounding box area"]
    pub fn area(&self) -> f64 {
        self.width().abs() * self.height().abs()
    }

    /// True when all four coordinates are finite
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.l.is_finite() && self.b.is_finite() && self.r.is_finite() && self.t.is_finite()
    }

    /// Inclusive containment: `inner` lies within `self` (edges may touch)
    #[inline]
    #[must_use]
    pub fn contains(&self, inner: &Self) -> bool {
        self.l <= inner.l && self.b <= inner.b && inner.r <= self.r && inner.t <= self.t
    }

    /// Containment of `inner` after shrinking it by `margin` on every side
    ///
    /// Tolerates detector boxes that cut slightly into the cells they cover.
    #[inline]
    #[must_use]
    pub fn contains_with_margin(&self, inner: &Self, margin: f64) -> bool {
        self.contains(&inner.eroded(margin))
    }

    /// Inclusive intersection test (touching edges intersect)
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.l <= other.r && other.l <= self.r && self.b <= other.t && other.b <= self.t
    }

    /// Continuous intersection area, 0 for disjoint boxes
    ///
    /// Inverted (degenerate) inputs can produce a negative extent on overlapping
    /// ranges; that case is logged and clamped to 0.
    #[must_use = "returns the intersection area"]
    pub fn intersection_area(&self, other: &Self) -> f64 {
        if !self.intersects(other) {
            return 0.0;
        }

        let width = self.r.min(other.r) - self.l.max(other.l);
        let height = self.t.min(other.t) - self.b.max(other.b);

        if width < 0.0 || height < 0.0 {
            log::warn!(
                "Negative intersection extent ({:.3} x {:.3}) between {:?} and {:?}, clamping to 0",
                width,
                height,
                self,
                other
            );
            return 0.0;
        }

        width * height
    }

    /// Fraction of `self` covered by `other` (`intersection_area / self.area`)
    ///
    /// This is NOT `IoU`. Zero-area boxes report 0.
    #[inline]
    #[must_use = "returns the intersection-over-self ratio"]
    pub fn intersection_over_self(&self, other: &Self) -> f64 {
        let self_area = self.area();
        if self_area > 0.0 {
            self.intersection_area(other) / self_area
        } else {
            0.0
        }
    }

    /// Intersection over union with the inclusive-pixel `+1` convention
    #[must_use = "returns the Intersection over Union value"]
    pub fn iou(&self, other: &Self) -> f64 {
        let inter_w = (self.r.min(other.r) - self.l.max(other.l) + 1.0).max(0.0);
        let inter_h = (self.t.min(other.t) - self.b.max(other.b) + 1.0).max(0.0);
        let intersection = inter_w * inter_h;

        let self_area = (self.width() + 1.0).max(0.0) * (self.height() + 1.0).max(0.0);
        let other_area = (other.width() + 1.0).max(0.0) * (other.height() + 1.0).max(0.0);
        let union = self_area + other_area - intersection;

        if union > IOU_EPSILON {
            intersection / union
        } else {
            0.0
        }
    }

    /// Minimal box enclosing both boxes
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            l: self.l.min(other.l),
            b: self.b.min(other.b),
            r: self.r.max(other.r),
            t: self.t.max(other.t),
        }
    }

    /// Minimal box enclosing every box; `(0, 0, 0, 0)` for an empty input
    #[must_use]
    pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a Self>) -> Self {
        boxes
            .into_iter()
            .copied()
            .reduce(|acc, bbox| acc.union(&bbox))
            .unwrap_or_default()
    }

    /// Fraction of the shorter box's height covered by the vertical overlap
    ///
    /// Returns 1.0 when one vertical extent contains the other (including a
    /// zero-height box inside a taller one).
    #[must_use]
    pub fn vertical_overlap_fraction(&self, other: &Self) -> f64 {
        let self_holds_other = self.b <= other.b && other.t <= self.t;
        let other_holds_self = other.b <= self.b && self.t <= other.t;
        if self_holds_other || other_holds_self {
            return 1.0;
        }

        let overlap = (self.t.min(other.t) - self.b.max(other.b)).max(0.0);
        let shorter = self
            .height()
            .abs()
            .min(other.height().abs())
            .max(MIN_OVERLAP_DENOMINATOR);
        overlap / shorter
    }

    /// Shrink by `margin` on every side, collapsing onto the centre line of an
    /// axis rather than inverting when the box is narrower than `2 * margin`
    #[must_use]
    pub fn eroded(&self, margin: f64) -> Self {
        let dx = margin.min(self.width().max(0.0) / 2.0);
        let dy = margin.min(self.height().max(0.0) / 2.0);
        Self {
            l: self.l + dx,
            b: self.b + dy,
            r: self.r - dx,
            t: self.t - dy,
        }
    }

    /// Grow by `margin` on every side
    #[inline]
    #[must_use]
    pub fn dilated(&self, margin: f64) -> Self {
        Self {
            l: self.l - margin,
            b: self.b - margin,
            r: self.r + margin,
            t: self.t + margin,
        }
    }
}
