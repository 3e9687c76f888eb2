//! SpamAssassin verdict parsing
//!
//! The verdict is read from the `X-Spam-Status` header spamd adds, e.g.
//! `Yes, score=8.3 required=5.0 tests=GTUBE autolearn=no`.

/// Header spamd uses to report its verdict
pub const SPAM_STATUS_HEADER: &str = "X-Spam-Status";

const SCORE_MARKER: &str = "score=";

/// Whether the status header marks the message as spam
pub fn is_spam_status(status: &str) -> bool {
    status
        .chars()
        .take(3)
        .flat_map(char::to_uppercase)
        .eq("YES".chars())
}

/// Integer part of the `score=` value in the status header.
///
/// Anything that does not yield a number gives 0: a missing marker, no `.`
/// after it, an empty integer part, or non-numeric text.
pub fn parse_spamassassin_score(status: &str) -> i32 {
    let start = match status.to_ascii_lowercase().find(SCORE_MARKER) {
        Some(pos) => pos + SCORE_MARKER.len(),
        None => return 0,
    };

    let end = match status[start..].find('.') {
        Some(pos) => start + pos,
        None => return 0,
    };

    if end == start {
        return 0;
    }

    leading_int(&status[start..end])
}

/// Leading integer of `s`: optional whitespace and sign, then digits.
/// Saturates at the `i32` bounds.
fn leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = (value * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
    }

    let value = if negative { -value } else { value };
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_spam_status() {
        assert!(is_spam_status("Yes, score=8.3 required=5.0"));
        assert!(is_spam_status("YES"));
        assert!(is_spam_status("yes"));
        assert!(is_spam_status("yEs,"));

        assert!(!is_spam_status("No, score=0.1 required=5.0"));
        assert!(!is_spam_status("Ye"));
        assert!(!is_spam_status(""));
        assert!(!is_spam_status(" Yes"));
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(
            parse_spamassassin_score("Yes, score=8.3 required=5.0 tests=GTUBE"),
            8
        );
        assert_eq!(parse_spamassassin_score("score=10.0"), 10);
        assert_eq!(parse_spamassassin_score("score=12."), 12);
        assert_eq!(parse_spamassassin_score("Yes, SCORE=1000.0"), 1000);
    }

    #[test]
    fn test_parse_score_degrades_to_zero() {
        assert_eq!(parse_spamassassin_score("score=.5"), 0);
        assert_eq!(parse_spamassassin_score("no marker here"), 0);
        assert_eq!(parse_spamassassin_score("scoreX=5.0"), 0);
        assert_eq!(parse_spamassassin_score("score=7"), 0);
        assert_eq!(parse_spamassassin_score("score=abc.0"), 0);
        assert_eq!(parse_spamassassin_score(""), 0);
    }

    #[test]
    fn test_parse_score_leading_integer() {
        assert_eq!(parse_spamassassin_score("score=-3.2 required=5.0"), -3);
        assert_eq!(parse_spamassassin_score("score=12abc.0"), 12);
        assert_eq!(parse_spamassassin_score("score=99999999999.0"), i32::MAX);
    }

    #[test]
    fn test_parse_score_is_deterministic() {
        let header = "Yes, score=8.3 required=5.0 tests=BAYES_99,URIBL_BLACK autolearn=no";
        assert_eq!(
            parse_spamassassin_score(header),
            parse_spamassassin_score(header)
        );
    }
}
