//! Contract-slice temporal resolver.
//!
//! Pure functions over the slices of one contract group. After [`insert`],
//! [`remove`] or [`normalize`] the spans are ordered by `valid_from` and each
//! span ends exactly one day before the next one starts. The last span keeps
//! its own end (open when `None`).

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validity window of one slice. `None` bounds are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSpan {
    pub id: Uuid,
    pub valid_from: Option<NaiveDate>,
    pub valid_till: Option<NaiveDate>,
}

impl SliceSpan {
    pub fn new(id: Uuid, valid_from: Option<NaiveDate>, valid_till: Option<NaiveDate>) -> Self {
        Self {
            id,
            valid_from,
            valid_till,
        }
    }

    /// Whether the window contains the given day.
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.valid_from.map_or(true, |from| from <= day)
            && self.valid_till.map_or(true, |till| day <= till)
    }
}

fn day_before(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(date)
}

/// Order by `valid_from` (open start first), then by id.
pub fn sort(spans: &mut [SliceSpan]) {
    spans.sort_by(|a, b| {
        a.valid_from
            .cmp(&b.valid_from)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Close every span the day before its successor starts.
///
/// Spans sharing a start day are left as they are.
pub fn normalize(spans: &mut [SliceSpan]) {
    sort(spans);
    for i in 1..spans.len() {
        let Some(next_from) = spans[i].valid_from else {
            continue;
        };
        let current = &mut spans[i - 1];
        if current.valid_from.map_or(true, |from| from < next_from) {
            current.valid_till = Some(day_before(next_from));
        }
    }
}

/// Insert (or re-insert) a span.
///
/// The nearest span starting earlier is closed the day before the new span
/// starts; the new span is closed before its successor starts.
pub fn insert(spans: &mut Vec<SliceSpan>, span: SliceSpan) {
    spans.retain(|s| s.id != span.id);
    spans.push(span);
    normalize(spans);
}

/// Remove a span and close the hole it leaves.
///
/// The predecessor runs until the successor starts, or becomes open-ended
/// when the removed span was the last one.
pub fn remove(spans: &mut Vec<SliceSpan>, id: Uuid) -> Option<SliceSpan> {
    sort(spans);
    let position = spans.iter().position(|s| s.id == id)?;
    let removed = spans.remove(position);
    if position == spans.len() && position > 0 {
        spans[position - 1].valid_till = None;
    }
    normalize(spans);
    Some(removed)
}

/// The span used as the contract on the given day.
///
/// Among spans containing the day the earliest start wins; `None` when no
/// span contains it.
#[must_use]
pub fn select_using(spans: &[SliceSpan], today: NaiveDate) -> Option<Uuid> {
    spans
        .iter()
        .filter(|s| s.contains(today))
        .min_by(|a, b| {
            a.valid_from
                .cmp(&b.valid_from)
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|s| s.id)
}

/// Validity of the whole group: earliest start to latest end.
#[must_use]
pub fn group_validity(spans: &[SliceSpan]) -> (Option<NaiveDate>, Option<NaiveDate>) {
    if spans.is_empty() {
        return (None, None);
    }
    let from = if spans.iter().any(|s| s.valid_from.is_none()) {
        None
    } else {
        spans.iter().filter_map(|s| s.valid_from).min()
    };
    let till = if spans.iter().any(|s| s.valid_till.is_none()) {
        None
    } else {
        spans.iter().filter_map(|s| s.valid_till).max()
    };
    (from, till)
}

/// Check the ordering invariant: no overlaps and no gaps between neighbours.
#[must_use]
pub fn is_contiguous(spans: &[SliceSpan]) -> bool {
    let mut ordered = spans.to_vec();
    sort(&mut ordered);
    ordered.windows(2).all(|pair| match (pair[0].valid_till, pair[1].valid_from) {
        (Some(till), Some(from)) => day_before(from) == till,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        let base = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        if offset >= 0 {
            base.checked_add_days(Days::new(offset as u64)).unwrap()
        } else {
            base.checked_sub_days(Days::new((-offset) as u64)).unwrap()
        }
    }

    fn span(from: Option<i64>, till: Option<i64>) -> SliceSpan {
        SliceSpan::new(Uuid::new_v4(), from.map(day), till.map(day))
    }

    #[test]
    fn test_insert_closes_open_predecessor() {
        let first = span(Some(-20), None);
        let mut spans = vec![first];
        let second = span(Some(-10), None);

        insert(&mut spans, second);

        assert_eq!(spans[0].id, first.id);
        assert_eq!(spans[0].valid_till, Some(day(-11)));
        assert_eq!(spans[1].id, second.id);
        assert_eq!(spans[1].valid_till, None);
        assert!(is_contiguous(&spans));
    }

    #[test]
    fn test_insert_between_closes_new_span() {
        let a = span(Some(-30), Some(-1));
        let c = span(Some(0), None);
        let mut spans = vec![a, c];
        let b = span(Some(-10), None);

        insert(&mut spans, b);

        let ids: Vec<Uuid> = spans.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(spans[0].valid_till, Some(day(-11)));
        assert_eq!(spans[1].valid_till, Some(day(-1)));
        assert_eq!(spans[2].valid_till, None);
    }

    #[test]
    fn test_normalize_closes_gaps_and_overlaps() {
        let mut spans = vec![
            span(Some(10), None),
            span(Some(-5), Some(20)),
            span(Some(-30), Some(-25)),
        ];
        normalize(&mut spans);

        assert!(is_contiguous(&spans));
        assert_eq!(spans[0].valid_till, Some(day(-6)));
        assert_eq!(spans[1].valid_till, Some(day(9)));
        assert_eq!(spans[2].valid_till, None);
    }

    #[test]
    fn test_remove_last_reopens_predecessor() {
        let a = span(Some(-20), None);
        let b = span(Some(-10), None);
        let mut spans = vec![a, b];
        normalize(&mut spans);

        let removed = remove(&mut spans, b.id).unwrap();
        assert_eq!(removed.id, b.id);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].valid_till, None);
    }

    #[test]
    fn test_remove_middle_extends_predecessor() {
        let a = span(Some(-30), None);
        let b = span(Some(-20), None);
        let c = span(Some(-10), None);
        let mut spans = vec![a, b, c];
        normalize(&mut spans);

        remove(&mut spans, b.id);
        assert_eq!(spans[0].valid_till, Some(day(-11)));
        assert!(is_contiguous(&spans));
        assert!(remove(&mut spans, Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_select_using_prefers_containing_span() {
        let past = span(Some(-20), Some(-11));
        let current = span(Some(-10), None);
        let spans = vec![past, current];
        assert_eq!(select_using(&spans, day(0)), Some(current.id));
        assert_eq!(select_using(&spans, day(-15)), Some(past.id));
    }

    #[test]
    fn test_select_using_tie_takes_earliest_start() {
        let early = span(Some(-20), None);
        let late = span(Some(-5), None);
        assert_eq!(select_using(&[late, early], day(0)), Some(early.id));
    }

    #[test]
    fn test_select_using_none_when_all_future() {
        let future = span(Some(5), None);
        assert_eq!(select_using(&[future], day(0)), None);
        assert_eq!(select_using(&[], day(0)), None);
    }

    #[test]
    fn test_group_validity_spans_all() {
        let spans = vec![span(Some(5), Some(9)), span(Some(10), None)];
        assert_eq!(group_validity(&spans), (Some(day(5)), None));

        let closed = vec![span(Some(1), Some(3)), span(Some(4), Some(8))];
        assert_eq!(group_validity(&closed), (Some(day(1)), Some(day(8))));
    }
}
