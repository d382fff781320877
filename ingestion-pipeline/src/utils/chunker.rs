use common::error::AppError;
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};

const TOKEN_CHARS: usize = 4;
const TARGET_TOKENS: usize = 500;
const OVERLAP_TOKENS: usize = 100;
const MARKER_PREFIX: &str = "[Page ";

/// One chunk of a chunked document: its text, byte offsets into the
/// page-marked source, and the page it was drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub content: String,
    pub char_start: usize,
    pub char_end: usize,
    pub page_number: u32,
}

struct PageMarker {
    position: usize,
    end: usize,
    page_number: u32,
}

/// Finds every `[Page N]` marker in `text` and its byte range.
fn find_page_markers(text: &str) -> Vec<PageMarker> {
    let mut markers = Vec::new();
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find(MARKER_PREFIX) {
        let marker_start = search_from + rel;
        let digits_start = marker_start + MARKER_PREFIX.len();
        let digits_end = text[digits_start..]
            .find(']')
            .map(|end| digits_start + end);
        if let Some(digits_end) = digits_end {
            if let Ok(page_number) = text[digits_start..digits_end].trim().parse::<u32>() {
                markers.push(PageMarker {
                    position: marker_start,
                    end: digits_end + 1,
                    page_number,
                });
            }
        }
        search_from = marker_start + MARKER_PREFIX.len();
    }
    markers
}

/// Returns `marked_text[char_start..char_end)` with every `[Page N]` marker
/// byte range cut out, so the marker is opaque to embedding and the LLM
/// prompt alike — only `page_for_span` ever looks at marker positions.
fn strip_markers(marked_text: &str, markers: &[PageMarker], char_start: usize, char_end: usize) -> String {
    let mut result = String::with_capacity(char_end - char_start);
    let mut cursor = char_start;
    for marker in markers.iter().filter(|m| m.position < char_end && m.end > char_start) {
        let seg_end = marker.position.max(cursor).min(char_end);
        if seg_end > cursor {
            result.push_str(&marked_text[cursor..seg_end]);
        }
        cursor = marker.end.min(char_end).max(cursor);
    }
    if cursor < char_end {
        result.push_str(&marked_text[cursor..char_end]);
    }
    result
}

/// The page a chunk spanning `[char_start, char_end)` is attributed to: the
/// last marker inside the span, or failing that the last marker strictly
/// before `char_start`. Center-of-chunk heuristics misassign chunks that
/// straddle a page boundary, so this walks markers in document order instead.
fn page_for_span(markers: &[PageMarker], char_start: usize, char_end: usize) -> Option<u32> {
    let inside = markers
        .iter()
        .filter(|m| m.position >= char_start && m.position < char_end)
        .next_back();
    if let Some(marker) = inside {
        return Some(marker.page_number);
    }
    markers
        .iter()
        .filter(|m| m.position < char_start)
        .next_back()
        .map(|m| m.page_number)
}

/// Splits page-marked text into overlapping, boundary-aware chunks (C4's
/// chunking phase) and returns the total page count alongside them.
pub fn chunk_marked_text(marked_text: &str, page_count: u32) -> Result<Vec<ChunkSpan>, AppError> {
    let markers = find_page_markers(marked_text);

    let capacity = ChunkCapacity::new(TARGET_TOKENS * TOKEN_CHARS)
        .with_max(TARGET_TOKENS * TOKEN_CHARS)
        .map_err(|e| AppError::Validation(format!("invalid chunk capacity: {e}")))?;
    let config = ChunkConfig::new(capacity)
        .with_overlap(OVERLAP_TOKENS * TOKEN_CHARS)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(config);

    let spans: Vec<ChunkSpan> = splitter
        .chunk_indices(marked_text)
        .map(|(char_start, content)| {
            let char_end = char_start + content.len();
            let page_number = page_for_span(&markers, char_start, char_end)
                .or(if page_count > 0 { Some(1) } else { None })
                .unwrap_or(1);
            ChunkSpan {
                content: strip_markers(marked_text, &markers, char_start, char_end),
                char_start,
                char_end,
                page_number,
            }
        })
        .collect();

    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chunk_gets_a_page_number_from_the_pages_it_overlaps() {
        let text = format!(
            "[Page 1]\n{}\n[Page 2]\n{}",
            "first page content ".repeat(50),
            "second page content ".repeat(50)
        );
        let chunks = chunk_marked_text(&text, 2).expect("chunk");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.page_number >= 1 && c.page_number <= 2));
        // later chunks should land on page 2
        assert_eq!(chunks.last().expect("last chunk").page_number, 2);
    }

    #[test]
    fn chunk_before_any_marker_falls_back_to_page_one() {
        let text = "no markers at all here, just plain prose".to_string();
        let chunks = chunk_marked_text(&text, 1).expect("chunk");
        assert!(chunks.iter().all(|c| c.page_number == 1));
    }

    #[test]
    fn page_for_span_prefers_marker_inside_span_over_marker_before_it() {
        let markers = vec![
            PageMarker { position: 0, end: 8, page_number: 1 },
            PageMarker { position: 100, end: 108, page_number: 2 },
        ];
        assert_eq!(page_for_span(&markers, 90, 110), Some(2));
        assert_eq!(page_for_span(&markers, 50, 90), Some(1));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk_marked_text("", 0).expect("chunk");
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_content_has_page_markers_stripped() {
        let text = format!("[Page 1]\n{}\n[Page 2]\n{}", "first page content ".repeat(50), "second page content ".repeat(50));
        let chunks = chunk_marked_text(&text, 2).expect("chunk");
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(!chunk.content.contains("[Page"), "marker leaked into chunk content: {}", chunk.content);
        }
    }
}
