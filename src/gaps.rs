//! Gap detection over received sequence numbers.
//!
//! The initial stream is expected to cover every sequence in `1..=max`;
//! whatever is absent must be recovered one packet at a time. Detection is a
//! presence set plus one ascending sweep of the expected range, so cost is
//! linear in `max` rather than quadratic in the number of received packets.
use std::collections::HashSet;

/// Every sequence in `[1, max_seq]` absent from `received`, ascending.
///
/// `max_seq <= 0` means the stream delivered nothing: there is no defined
/// range to fill, so nothing is reported missing. Duplicates in `received`
/// are harmless.
pub fn missing_sequences<I>(received: I, max_seq: i32) -> Vec<i32>
where
    I: IntoIterator<Item = i32>,
{
    if max_seq <= 0 {
        return Vec::new();
    }
    let present: HashSet<i32> = received.into_iter().collect();
    (1..=max_seq).filter(|seq| !present.contains(seq)).collect()
}
