//! Semantic fact extraction from agent replies.
//!
//! A small ordered set of surface patterns; the first one matching a line
//! wins and its single capture group becomes the fact.

use std::sync::OnceLock;

use regex::Regex;

/// Lines outside this length range are never scanned.
const MIN_LINE_CHARS: usize = 10;
const MAX_LINE_CHARS: usize = 500;

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^(?:remember|note|important|fyi):\s*(.+)$",
            r"(?i)\b(?:your|the)\s+(?:name|email|phone|address|birthday|preference)s?\s+(?:is|are)\s+(.+)$",
            r"(?i)\bI\s+(?:always|prefer|like|use|want|need)\s+(.+)$",
            r"(?i)^(?:don'?t\s+forget|keep\s+in\s+mind|worth\s+noting):?\s+(.+)$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect()
    })
}

/// Scan a reply line by line and collect extracted facts, in order.
pub fn extract_facts(reply: &str) -> Vec<String> {
    let mut facts = Vec::new();
    for line in reply.lines() {
        let line = line.trim();
        let len = line.chars().count();
        if !(MIN_LINE_CHARS..=MAX_LINE_CHARS).contains(&len) {
            continue;
        }
        for re in patterns() {
            if let Some(caps) = re.captures(line) {
                if let Some(fact) = caps.get(1) {
                    let fact = fact.as_str().trim();
                    if !fact.is_empty() {
                        facts.push(fact.to_string());
                    }
                }
                break;
            }
        }
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_prefix_extracts_suffix() {
        let facts = extract_facts("Remember: the wifi password is hunter2");
        assert_eq!(facts, vec!["the wifi password is hunter2"]);
    }

    #[test]
    fn attribute_pattern_extracts_value() {
        let facts = extract_facts("Noted, your email is ada@example.test for the invoices.");
        assert_eq!(facts, vec!["ada@example.test for the invoices."]);
    }

    #[test]
    fn preference_pattern_matches_mid_sentence() {
        let facts = extract_facts("Got it, I prefer window seats on long flights.");
        assert_eq!(facts, vec!["window seats on long flights."]);
    }

    #[test]
    fn dont_forget_variants_match() {
        let facts = extract_facts("Don't forget: passport renewal is due in March");
        assert_eq!(facts, vec!["passport renewal is due in March"]);
        let facts = extract_facts("Worth noting the office moves next quarter entirely");
        assert_eq!(facts, vec!["the office moves next quarter entirely"]);
    }

    #[test]
    fn first_matching_pattern_wins_per_line() {
        // "remember:" (pattern 1) beats the embedded "I like" (pattern 3).
        let facts = extract_facts("remember: I like oat milk in coffee");
        assert_eq!(facts, vec!["I like oat milk in coffee"]);
    }

    #[test]
    fn short_and_oversized_lines_are_skipped() {
        assert!(extract_facts("fyi: x").is_empty());
        let long = format!("note: {}", "a".repeat(600));
        assert!(extract_facts(&long).is_empty());
    }

    #[test]
    fn multiple_lines_yield_multiple_facts() {
        let reply = "Here's your summary.\n\
                     Note: the meeting moved to Thursday\n\
                     Some filler text without any markers here.\n\
                     FYI: the invoice was paid yesterday";
        let facts = extract_facts(reply);
        assert_eq!(
            facts,
            vec!["the meeting moved to Thursday", "the invoice was paid yesterday"]
        );
    }

    #[test]
    fn plain_prose_extracts_nothing() {
        assert!(extract_facts("The weather tomorrow looks mild with light rain.").is_empty());
    }
}
