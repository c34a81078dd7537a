//! Neighbor selection for preloading
//!
//! Decides which out-of-view items are likely to scroll into view next. The
//! window is a tunable policy: `ahead` items after the visible window and
//! `behind` items before it, measured in feed positions.

use crate::visibility::{ClassifiedItem, VisibilityReport};
use common::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchWindow {
    pub ahead: usize,
    pub behind: usize,
}

impl Default for PrefetchWindow {
    fn default() -> Self {
        Self {
            ahead: 2,
            behind: 1,
        }
    }
}

impl PrefetchWindow {
    pub fn new(ahead: usize, behind: usize) -> Self {
        Self { ahead, behind }
    }

    /// Out-of-view items expected to become visible next, most likely first
    pub fn upcoming(&self, report: &VisibilityReport) -> Vec<ItemId> {
        let (first, last, anchor) = match visible_span(report) {
            Some((first, last)) => (first, last, None),
            None => match best_partial(report) {
                Some(item) => (item.position, item.position, Some(item.id)),
                None => return Vec::new(),
            },
        };

        let mut ranked: Vec<(usize, bool, ItemId)> = report
            .out_of_view
            .iter()
            .filter(|item| Some(item.id) != anchor)
            .filter_map(|item| {
                if item.position > last && item.position - last <= self.ahead {
                    Some((item.position - last, false, item.id))
                } else if item.position < first && first - item.position <= self.behind {
                    Some((first - item.position, true, item.id))
                } else {
                    None
                }
            })
            .collect();

        // Nearest first; on equal distance the trailing neighbor (false) wins
        ranked.sort_by_key(|(distance, before, _)| (*distance, *before));

        anchor
            .into_iter()
            .chain(ranked.into_iter().map(|(_, _, id)| id))
            .collect()
    }
}

fn visible_span(report: &VisibilityReport) -> Option<(usize, usize)> {
    let first = report.visible.iter().map(|item| item.position).min()?;
    let last = report.visible.iter().map(|item| item.position).max()?;
    Some((first, last))
}

/// Partially visible item with the largest on-screen share
fn best_partial(report: &VisibilityReport) -> Option<&ClassifiedItem> {
    report
        .out_of_view
        .iter()
        .filter(|item| item.ratio > 0.0)
        .max_by(|a, b| a.ratio.total_cmp(&b.ratio))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, position: usize, ratio: f64) -> ClassifiedItem {
        ClassifiedItem {
            id: ItemId(id),
            position,
            ratio,
        }
    }

    fn report(visible: Vec<ClassifiedItem>, out_of_view: Vec<ClassifiedItem>) -> VisibilityReport {
        VisibilityReport {
            visible,
            out_of_view,
        }
    }

    #[test]
    fn test_neighbors_around_visible_window() {
        let report = report(
            vec![item(3, 2, 1.0)],
            vec![
                item(1, 0, 0.0),
                item(2, 1, 0.2),
                item(4, 3, 0.1),
                item(5, 4, 0.0),
                item(6, 5, 0.0),
            ],
        );

        let upcoming = PrefetchWindow::default().upcoming(&report);
        assert_eq!(upcoming, vec![ItemId(4), ItemId(2), ItemId(5)]);
    }

    #[test]
    fn test_window_bounds_are_respected() {
        let report = report(
            vec![item(1, 0, 1.0)],
            vec![item(2, 1, 0.0), item(3, 2, 0.0), item(4, 3, 0.0)],
        );

        let upcoming = PrefetchWindow::new(1, 0).upcoming(&report);
        assert_eq!(upcoming, vec![ItemId(2)]);

        let upcoming = PrefetchWindow::new(0, 0).upcoming(&report);
        assert!(upcoming.is_empty());
    }

    #[test]
    fn test_anchor_on_partial_item_when_nothing_visible() {
        let report = report(
            Vec::new(),
            vec![item(1, 0, 0.3), item(2, 1, 0.5), item(3, 2, 0.0)],
        );

        let upcoming = PrefetchWindow::default().upcoming(&report);
        assert_eq!(upcoming, vec![ItemId(2), ItemId(3), ItemId(1)]);
    }

    #[test]
    fn test_nothing_upcoming_without_anchor() {
        let report = report(Vec::new(), vec![item(1, 0, 0.0), item(2, 1, 0.0)]);
        assert!(PrefetchWindow::default().upcoming(&report).is_empty());
    }
}
