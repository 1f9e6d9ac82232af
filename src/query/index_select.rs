use super::filter::Operator;
use super::plan::Predicate;
use crate::schema::Index;

/// Number of leading index fields covered by bare equality predicates.
pub fn prefix_len(index: &Index, predicates: &[Predicate]) -> usize {
    index
        .fields
        .iter()
        .take_while(|field| {
            predicates
                .iter()
                .any(|p| p.op == Operator::Eq && p.field == **field)
        })
        .count()
}

/// Picks the index with the strictly longest equality prefix; ties keep the first.
/// Returns the index and its prefix length, or `None` when nothing matches.
pub fn select_index<'a>(indexes: &'a [Index], predicates: &[Predicate]) -> Option<(&'a Index, usize)> {
    let mut best: Option<(&Index, usize)> = None;
    for index in indexes {
        let matched = prefix_len(index, predicates);
        if matched > best.map_or(0, |(_, n)| n) {
            best = Some((index, matched));
        }
    }
    best
}
