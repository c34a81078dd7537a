//! Viewport visibility classification for video items
//!
//! Pure geometry: given the viewport and the frames of every video-bearing
//! item, compute how much of each item is on screen and split the items into
//! "in view" (most visible first) and "out of view".

use common::{Candidate, ItemId, Rect};

/// Default fraction of an item's height that must be on screen for playback
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.6;

/// One classified candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedItem {
    pub id: ItemId,
    /// Index of the candidate in the container's report (feed order)
    pub position: usize,
    pub ratio: f64,
}

/// Result of one classification pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityReport {
    /// Items above the threshold, descending ratio, ties in input order
    pub visible: Vec<ClassifiedItem>,
    /// Everything else, in input order
    pub out_of_view: Vec<ClassifiedItem>,
}

impl VisibilityReport {
    pub fn visible_ids(&self) -> Vec<ItemId> {
        self.visible.iter().map(|item| item.id).collect()
    }
}

/// Fraction of `frame`'s height that lies inside `viewport`, in [0, 1]
pub fn visibility_ratio(viewport: &Rect, frame: &Rect) -> f64 {
    if !viewport.is_finite() || !frame.is_finite() || frame.height <= 0.0 {
        return 0.0;
    }

    let overlap = frame.max_y().min(viewport.max_y()) - frame.min_y().max(viewport.min_y());
    if overlap <= 0.0 {
        return 0.0;
    }

    (overlap / frame.height).clamp(0.0, 1.0)
}

/// True when the frame's top edge is above the viewport bottom and its
/// bottom edge is below the viewport top
fn intersects_vertically(viewport: &Rect, frame: &Rect) -> bool {
    frame.min_y() < viewport.max_y() && frame.max_y() > viewport.min_y()
}

/// Stateless classifier, re-run on every scroll position change
#[derive(Debug, Clone, Copy)]
pub struct VisibilityClassifier {
    threshold: f64,
}

impl Default for VisibilityClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_THRESHOLD)
    }
}

impl VisibilityClassifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, viewport: &Rect, candidates: &[Candidate]) -> VisibilityReport {
        let mut report = VisibilityReport::default();

        for (position, candidate) in candidates.iter().enumerate() {
            let ratio = visibility_ratio(viewport, &candidate.frame);
            let item = ClassifiedItem {
                id: candidate.id,
                position,
                ratio,
            };

            if ratio > self.threshold && intersects_vertically(viewport, &candidate.frame) {
                report.visible.push(item);
            } else {
                report.out_of_view.push(item);
            }
        }

        // sort_by is stable, so equal ratios keep input order
        report.visible.sort_by(|a, b| b.ratio.total_cmp(&a.ratio));

        log::trace!(
            "Classified {} candidates: {} visible, {} out of view",
            candidates.len(),
            report.visible.len(),
            report.out_of_view.len()
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SourceLocator;

    fn viewport() -> Rect {
        Rect::new(0.0, 0.0, 390.0, 800.0)
    }

    fn candidate(id: u64, y: f64, height: f64) -> Candidate {
        Candidate {
            id: ItemId(id),
            source: SourceLocator::new(format!("bundle:clip{}", id)),
            frame: Rect::new(0.0, y, 390.0, height),
        }
    }

    #[test]
    fn test_fully_visible_item() {
        let frame = Rect::new(0.0, 0.0, 390.0, 400.0);
        assert_eq!(visibility_ratio(&viewport(), &frame), 1.0);

        let report = VisibilityClassifier::default().classify(&viewport(), &[candidate(1, 0.0, 400.0)]);
        assert_eq!(report.visible_ids(), vec![ItemId(1)]);
        assert!(report.out_of_view.is_empty());
    }

    #[test]
    fn test_barely_visible_item() {
        let frame = Rect::new(0.0, 780.0, 390.0, 400.0);
        let ratio = visibility_ratio(&viewport(), &frame);
        assert!((ratio - 0.05).abs() < 1e-9);

        let report =
            VisibilityClassifier::default().classify(&viewport(), &[candidate(1, 780.0, 400.0)]);
        assert!(report.visible.is_empty());
        assert_eq!(report.out_of_view.len(), 1);
    }

    #[test]
    fn test_threshold_boundary_is_not_visible() {
        // 240 of 400 points on screen: exactly 0.6
        let report =
            VisibilityClassifier::default().classify(&viewport(), &[candidate(1, 560.0, 400.0)]);
        assert!((report.out_of_view[0].ratio - 0.6).abs() < 1e-9);
        assert!(report.visible.is_empty());

        // One point more crosses the threshold
        let report =
            VisibilityClassifier::default().classify(&viewport(), &[candidate(1, 559.0, 400.0)]);
        assert_eq!(report.visible_ids(), vec![ItemId(1)]);
    }

    #[test]
    fn test_offscreen_items_have_zero_ratio() {
        let above = Rect::new(0.0, -500.0, 390.0, 400.0);
        let below = Rect::new(0.0, 800.0, 390.0, 400.0);
        assert_eq!(visibility_ratio(&viewport(), &above), 0.0);
        assert_eq!(visibility_ratio(&viewport(), &below), 0.0);
    }

    #[test]
    fn test_ratio_stays_in_unit_range() {
        // Item taller than the viewport, viewport scrolled inside it
        let tall = Rect::new(0.0, -100.0, 390.0, 2000.0);
        let ratio = visibility_ratio(&viewport(), &tall);
        assert!((0.0..=1.0).contains(&ratio));
        assert!((ratio - 0.4).abs() < 1e-9);

        let degenerate = Rect::new(0.0, 10.0, 390.0, 0.0);
        assert_eq!(visibility_ratio(&viewport(), &degenerate), 0.0);

        let broken = Rect::new(0.0, f64::NAN, 390.0, 400.0);
        assert_eq!(visibility_ratio(&viewport(), &broken), 0.0);
    }

    #[test]
    fn test_ratio_is_monotonic_in_overlap() {
        let mut previous = 0.0;
        for y in (0..=800).rev().step_by(20) {
            let frame = Rect::new(0.0, y as f64, 390.0, 400.0);
            let ratio = visibility_ratio(&viewport(), &frame);
            assert!(ratio >= previous, "ratio decreased at y={}", y);
            previous = ratio;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn test_visible_sorted_by_ratio_with_stable_ties() {
        let candidates = vec![
            candidate(1, -100.0, 400.0), // 0.75
            candidate(2, 300.0, 200.0),  // 1.0
            candidate(3, 500.0, 200.0),  // 1.0
            candidate(4, 700.0, 400.0),  // 0.25
        ];

        let report = VisibilityClassifier::default().classify(&viewport(), &candidates);
        assert_eq!(report.visible_ids(), vec![ItemId(2), ItemId(3), ItemId(1)]);
        assert_eq!(report.visible[0].position, 1);
        assert_eq!(report.out_of_view.len(), 1);
        assert_eq!(report.out_of_view[0].id, ItemId(4));
    }

    #[test]
    fn test_scrolled_viewport() {
        let scrolled = Rect::new(0.0, 1000.0, 390.0, 800.0);
        let frame = Rect::new(0.0, 1100.0, 390.0, 400.0);
        assert_eq!(visibility_ratio(&scrolled, &frame), 1.0);
        assert_eq!(visibility_ratio(&viewport(), &frame), 0.0);
    }
}
