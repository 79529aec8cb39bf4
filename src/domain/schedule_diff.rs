use crate::domain::models::CanonicalInterval;

/// A schedule differs from the baseline unless both lists hold exactly the
/// same intervals in the same order. No baseline always differs.
pub fn differs(baseline: Option<&[CanonicalInterval]>, candidate: &[CanonicalInterval]) -> bool {
    match baseline {
        None => true,
        Some(applied) => applied != candidate,
    }
}
