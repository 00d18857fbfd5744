//! Small text utilities shared across the sync paths: the similarity ratio
//! used for user resolution, URL extraction for page back-references, and
//! rendering workspace blocks as markdown.

use crate::models::Block;

/// Similarity ratio between two strings in `0.0..=1.0`.
///
/// Uses the Ratcliff/Obershelp measure: twice the number of matching
/// characters (longest common substring, applied recursively to the
/// unmatched flanks) over the total length of both inputs.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let total = ac.len() + bc.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_total(&ac, &bc) as f64 / total as f64
}

/// Total matched characters across the recursive longest-match split.
fn matched_total(a: &[char], b: &[char]) -> usize {
    let (ai, bi, len) = longest_match(a, b);
    if len == 0 {
        return 0;
    }
    len + matched_total(&a[..ai], &b[..bi]) + matched_total(&a[ai + len..], &b[bi + len..])
}

/// Longest common substring of `a` and `b` as `(start_a, start_b, len)`.
///
/// Inputs here are short handles and display names, so the quadratic scan
/// is fine. Ties resolve to the earliest match in `a`, then in `b`.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut runs = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut next = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let len = runs[j] + 1;
                next[j + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        runs = next;
    }
    best
}

/// Normalize a handle or display name for comparison: lowercase, with the
/// separators trackers allow in usernames (`.`, `_`, `-`) folded to spaces.
pub fn normalize_handle(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '.' | '_' | '-') { ' ' } else { c })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Loose email shape check: one `@`, non-empty local part, dotted domain.
pub fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// First `http(s)://` URL in a block of text, stripped of the punctuation
/// that tends to cling to URLs in prose.
pub fn first_url(text: &str) -> Option<&str> {
    for token in text.split_whitespace() {
        let token = token.trim_start_matches(['<', '(']);
        let token = token.trim_end_matches(['>', ')', '.', ',', ';', ':', '"', '\'']);
        if token.starts_with("http://") || token.starts_with("https://") {
            return Some(token);
        }
    }
    None
}

/// Extract a workspace page id from a page URL.
///
/// Page URLs end in the page's 32-hex-digit id; anything else (query
/// strings, short URLs) yields `None`. The id comes back hyphenated.
pub fn page_id_from_url(url: &str) -> Option<String> {
    let url = url.trim_end_matches('/');
    let chars: Vec<char> = url.chars().collect();
    if chars.len() < 32 {
        return None;
    }
    let tail: String = chars[chars.len() - 32..].iter().collect();
    uuid::Uuid::try_parse(&tail)
        .ok()
        .map(|u| u.hyphenated().to_string())
}

/// Render workspace blocks as markdown, one paragraph per block.
/// Blocks with no visible text are dropped.
pub fn blocks_to_markdown<'a, I>(blocks: I) -> String
where
    I: IntoIterator<Item = &'a Block>,
{
    let mut out = String::new();
    for block in blocks {
        let line = match block.kind.as_str() {
            "heading_1" => format!("# {}", block.text),
            "heading_2" => format!("## {}", block.text),
            "heading_3" => format!("### {}", block.text),
            "bulleted_list_item" => format!("- {}", block.text),
            "numbered_list_item" => format!("1. {}", block.text),
            "to_do" => format!("- [ ] {}", block.text),
            "quote" => format!("> {}", block.text),
            "code" => format!("```\n{}\n```", block.text),
            "divider" => "---".to_string(),
            _ => block.text.clone(),
        };
        if line.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_similarity_identical() {
        assert!(close(similarity("bob smith", "bob smith"), 1.0));
    }

    #[test]
    fn test_similarity_known_ratio() {
        // One three-character run out of eight total characters.
        assert!(close(similarity("abcd", "bcde"), 0.75));
    }

    #[test]
    fn test_similarity_disjoint() {
        assert!(close(similarity("abc", "xyz"), 0.0));
    }

    #[test]
    fn test_similarity_empty() {
        assert!(close(similarity("", ""), 1.0));
        assert!(close(similarity("abc", ""), 0.0));
    }

    #[test]
    fn test_similarity_dotted_handle_needs_normalization() {
        // Raw ratio of a dotted handle against the spaced display name sits
        // just under the match threshold; normalization closes the gap.
        let raw = similarity("bob.smith", "bob smith");
        assert!(raw < 0.9, "raw ratio was {raw}");
        let norm = similarity(
            &normalize_handle("bob.smith"),
            &normalize_handle("Bob Smith"),
        );
        assert!(close(norm, 1.0));
    }

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("Bob.Smith"), "bob smith");
        assert_eq!(normalize_handle("ana_de-la.cruz"), "ana de la cruz");
        assert_eq!(normalize_handle("  Spaced   Name "), "spaced name");
    }

    #[test]
    fn test_is_email() {
        assert!(is_email("bob@example.com"));
        assert!(is_email("first.last@sub.example.org"));
        assert!(!is_email("bob.smith"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("bob@nodot"));
        assert!(!is_email("bob@.com"));
    }

    #[test]
    fn test_first_url() {
        assert_eq!(
            first_url("More information may be found at https://pages.example.com/abc"),
            Some("https://pages.example.com/abc")
        );
        assert_eq!(
            first_url("see <https://a.example.com/x>, then decide"),
            Some("https://a.example.com/x")
        );
        assert_eq!(first_url("no links here"), None);
    }

    #[test]
    fn test_page_id_from_url() {
        let id = page_id_from_url(
            "https://pages.example.com/Fix-login-0123456789abcdef0123456789abcdef",
        );
        assert_eq!(id.as_deref(), Some("01234567-89ab-cdef-0123-456789abcdef"));
        assert_eq!(page_id_from_url("https://pages.example.com/short"), None);
        assert_eq!(
            page_id_from_url("https://pages.example.com/Fix-login-0123456789abcdef?pvs=4"),
            None
        );
    }

    #[test]
    fn test_blocks_to_markdown() {
        let mk = |kind: &str, text: &str| Block {
            id: "b".to_string(),
            kind: kind.to_string(),
            text: text.to_string(),
            created_time: Utc::now(),
        };
        let blocks = vec![
            mk("heading_2", "Findings"),
            mk("paragraph", "The retry loop never fires."),
            mk("bulleted_list_item", "reproduce with two workers"),
            mk("paragraph", "   "),
            mk("code", "cargo run"),
        ];
        let md = blocks_to_markdown(&blocks);
        assert_eq!(
            md,
            "## Findings\n\nThe retry loop never fires.\n\n- reproduce with two workers\n\n```\ncargo run\n```"
        );
    }

    #[test]
    fn test_blocks_to_markdown_empty() {
        let blocks: Vec<Block> = Vec::new();
        assert_eq!(blocks_to_markdown(&blocks), "");
    }
}
