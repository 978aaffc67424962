//! Fixed-size overlapping text chunker.
//!
//! Concatenates a document's unit texts (newline-separated) and slides a
//! character window of `chunk_size` advancing by `chunk_size - overlap`.
//! Each chunk records every unit whose span intersects its window, so an
//! answer citing the chunk can be mapped back to pages/sections/lines.
//!
//! Total work is O(n) in the input length: char boundaries are computed
//! once and the unit cursor only moves forward.

use crate::models::{Chunk, Locator, TextUnit};

/// Splits unit texts into overlapping chunks.
///
/// Guarantees:
/// - every character of the concatenated unit text appears in at least one
///   chunk (the final window is emitted even when shorter than `chunk_size`);
/// - each chunk is at most `chunk_size` characters;
/// - consecutive chunks overlap by `overlap` characters.
///
/// `chunk_size` must be greater than `overlap`; config validation enforces
/// this before the chunker runs.
pub fn chunk_units(units: &[TextUnit], chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    debug_assert!(chunk_size > overlap);

    // Concatenate with single-newline separators, tracking each unit's
    // char span [start, end) in the combined text.
    let mut full = String::new();
    let mut spans: Vec<(usize, usize, Locator)> = Vec::new();
    let mut char_count = 0usize;
    for (i, unit) in units.iter().enumerate() {
        if i > 0 {
            full.push('\n');
            char_count += 1;
        }
        let start = char_count;
        char_count += unit.text.chars().count();
        full.push_str(&unit.text);
        spans.push((start, char_count, unit.locator));
    }
    if full.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the terminal offset, so
    // char-indexed windows can slice without re-scanning.
    let mut boundaries: Vec<usize> = full.char_indices().map(|(b, _)| b).collect();
    boundaries.push(full.len());

    let total = char_count;
    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut unit_cursor = 0usize;
    let mut start = 0usize;
    loop {
        let end = (start + chunk_size).min(total);

        while unit_cursor < spans.len() && spans[unit_cursor].1 <= start {
            unit_cursor += 1;
        }
        let mut source_locators = Vec::new();
        let mut i = unit_cursor;
        while i < spans.len() && spans[i].0 < end {
            source_locators.push(spans[i].2);
            i += 1;
        }

        let text = full[boundaries[start]..boundaries[end]].to_string();
        if !text.is_empty() {
            chunks.push(Chunk {
                text,
                source_locators,
            });
        }

        if end == total {
            break;
        }
        start += step;
    }

    chunks
}
