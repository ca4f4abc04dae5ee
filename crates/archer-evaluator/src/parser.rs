use regex::{Regex, RegexBuilder};

/// Parsed-but-not-yet-clamped evaluator response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub score: f64,
    pub coerced: bool,
    pub feedback: String,
    pub improved_output: String,
}

fn label_regex() -> Regex {
    RegexBuilder::new(r"(score|feedback|improved[_\s]?output)\s*[:\-]\s*")
        .case_insensitive(true)
        .build()
        .expect("label regex is valid")
}

/// Splits `text` into its labeled sections by scanning for `SCORE`,
/// `FEEDBACK`, `IMPROVED_OUTPUT` (any casing, `:` or `-` separator);
/// each section runs until the next label or end of string, tolerating
/// extra prose before or after and either separator style.
fn labeled_sections(text: &str) -> std::collections::HashMap<String, String> {
    let regex = label_regex();
    let matches: Vec<_> = regex.find_iter(text).collect();
    let mut sections = std::collections::HashMap::new();

    for (index, m) in matches.iter().enumerate() {
        let label_text = regex
            .captures(&text[m.start()..m.end()])
            .and_then(|c| c.get(1))
            .map(|g| g.as_str().to_ascii_lowercase().replace([' ', '_'], ""))
            .unwrap_or_default();

        let content_start = m.end();
        let content_end = matches.get(index + 1).map(|next| next.start()).unwrap_or(text.len());
        let content = text[content_start..content_end].trim().to_string();
        sections.insert(label_text, content);
    }

    sections
}

fn spelled_digit(word: &str) -> Option<u32> {
    match word.to_ascii_lowercase().as_str() {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        _ => None,
    }
}

/// Extracts a numeric score from free text: a bare integer, `N/5`, a
/// decimal, or a spelled-out digit one..five (e.g. "Score: four").
fn extract_score(text: &str) -> Option<(f64, bool)> {
    let trimmed = text.trim();

    if let Some(captures) = Regex::new(r"^(-?\d+(?:\.\d+)?)\s*/\s*5\b")
        .expect("n/5 regex is valid")
        .captures(trimmed)
    {
        let value: f64 = captures[1].parse().ok()?;
        let is_integer = value.fract() == 0.0;
        return Some((value, !is_integer));
    }

    if let Some(captures) = Regex::new(r"^-?\d+(?:\.\d+)?")
        .expect("number regex is valid")
        .find(trimmed)
    {
        let value: f64 = captures.as_str().parse().ok()?;
        let is_integer = value.fract() == 0.0;
        return Some((value, !is_integer));
    }

    let first_word = trimmed.split_whitespace().next().unwrap_or("");
    if let Some(digit) = spelled_digit(first_word) {
        return Some((digit as f64, false));
    }

    None
}

/// Attempts a full parse of a labeled evaluator response. Returns `None`
/// when any required label is missing or the score cannot be extracted
/// at all — callers treat that as a parse failure eligible for one
/// repair attempt.
pub fn parse_evaluator_response(text: &str) -> Option<ParsedResponse> {
    let sections = labeled_sections(text);

    let score_text = sections.get("score")?;
    let (raw_score, mut coerced) = extract_score(score_text)?;

    let clamped = raw_score.round().clamp(1.0, 5.0);
    if (clamped - raw_score).abs() > f64::EPSILON {
        coerced = true;
    }

    let feedback = sections.get("feedback").cloned().unwrap_or_default();
    let improved_output = sections.get("improvedoutput").cloned().unwrap_or_default();

    Some(ParsedResponse {
        score: clamped,
        coerced,
        feedback,
        improved_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_template() {
        let text = "SCORE: 4\nFEEDBACK: concise\nIMPROVED_OUTPUT: A cat was sitting.";
        let parsed = parse_evaluator_response(text).expect("parses");
        assert_eq!(parsed.score, 4.0);
        assert!(!parsed.coerced);
        assert_eq!(parsed.feedback, "concise");
        assert_eq!(parsed.improved_output, "A cat was sitting.");
    }

    #[test]
    fn tolerates_dash_separator_and_n_of_5_score() {
        let text = "score - 4/5\nfeedback - fine\nimproved_output - better text";
        let parsed = parse_evaluator_response(text).expect("parses");
        assert_eq!(parsed.score, 4.0);
        assert!(!parsed.coerced);
    }

    #[test]
    fn tolerates_spelled_out_digits() {
        let text = "Score: four\nFeedback: solid\nImproved_Output: revised";
        let parsed = parse_evaluator_response(text).expect("parses");
        assert_eq!(parsed.score, 4.0);
    }

    #[test]
    fn tolerates_prose_before_and_after_labels() {
        let text = "Here is my review.\nSCORE: 5\nFEEDBACK: excellent\nIMPROVED_OUTPUT: n/a\nThanks!";
        let parsed = parse_evaluator_response(text).expect("parses");
        assert_eq!(parsed.score, 5.0);
        assert_eq!(parsed.feedback, "excellent");
    }

    #[test]
    fn coerces_out_of_range_scores_by_clamping() {
        let text = "SCORE: 9\nFEEDBACK: too generous\nIMPROVED_OUTPUT: x";
        let parsed = parse_evaluator_response(text).expect("parses");
        assert_eq!(parsed.score, 5.0);
        assert!(parsed.coerced);
    }

    #[test]
    fn coerces_non_integer_scores_by_rounding() {
        let text = "SCORE: 3.6\nFEEDBACK: decent\nIMPROVED_OUTPUT: x";
        let parsed = parse_evaluator_response(text).expect("parses");
        assert_eq!(parsed.score, 4.0);
        assert!(parsed.coerced);
    }

    #[test]
    fn unstructured_prose_fails_to_parse() {
        assert!(parse_evaluator_response("it was fine").is_none());
    }
}
