//! Chunker — split a payload into ordered fragments.

use bytes::Bytes;

use crate::wire::Fragment;

/// Split `payload` into consecutive fragments of at most `max_fragment_size`
/// body bytes. The last fragment is marked final.
///
/// An empty payload yields a single empty final fragment, so the receiver
/// always sees a terminator. A payload whose length is an exact multiple of
/// `max_fragment_size` yields only full fragments, with no trailing empty one.
///
/// Bodies are zero-copy slices of `payload`.
pub fn make_fragments(payload: &Bytes, max_fragment_size: usize) -> Vec<Fragment> {
    let size = max_fragment_size.max(1);

    if payload.is_empty() {
        return vec![Fragment {
            is_final: true,
            body: Bytes::new(),
        }];
    }

    let count = payload.len().div_ceil(size);
    (0..count)
        .map(|i| {
            let start = i * size;
            let end = (start + size).min(payload.len());
            Fragment {
                is_final: i + 1 == count,
                body: payload.slice(start..end),
            }
        })
        .collect()
}
