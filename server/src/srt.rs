//! Parsing of SRT-style timestamps embedded in recognizer output.

use once_cell::sync::Lazy;
use regex_lite::Regex;

// The pattern is a literal; failing to compile it is a programming error.
#[allow(clippy::unwrap_used)]
static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2})[,.](\d{3})")
        .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtSegment {
    pub begin_time: Option<u64>,
    pub end_time: Option<u64>,
    pub text: String,
}

/// Extract the first `HH:MM:SS,mmm --> HH:MM:SS,mmm` range and the text
/// that follows it. Content without a timestamp line passes through as
/// plain text.
pub fn parse_srt(content: &str) -> SrtSegment {
    let Some(captures) = TIMESTAMP.captures(content) else {
        return SrtSegment {
            begin_time: None,
            end_time: None,
            text: content.trim().to_string(),
        };
    };

    let ms = |h: &str, m: &str, s: &str, milli: &str| -> Option<u64> {
        let h: u64 = h.parse().ok()?;
        let m: u64 = m.parse().ok()?;
        let s: u64 = s.parse().ok()?;
        let milli: u64 = milli.parse().ok()?;
        Some(((h * 60 + m) * 60 + s) * 1000 + milli)
    };
    let begin_time = ms(&captures[1], &captures[2], &captures[3], &captures[4]);
    let end_time = ms(&captures[5], &captures[6], &captures[7], &captures[8]);

    let matched = captures.get(0).map(|m| m.end()).unwrap_or(0);
    let mut text = content[matched..].trim().to_string();
    if text.is_empty() {
        // Timestamp-only payload; fall back to whatever preceded it,
        // minus any sequence number line.
        text = content[..captures.get(0).map(|m| m.start()).unwrap_or(0)]
            .lines()
            .filter(|line| line.parse::<u64>().is_err() && !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();
    }

    SrtSegment {
        begin_time,
        end_time,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_timestamp_and_text() {
        let segment = parse_srt("1\n00:00:01,000 --> 00:00:02,500\nhello world");
        assert_eq!(
            segment,
            SrtSegment {
                begin_time: Some(1000),
                end_time: Some(2500),
                text: "hello world".to_string(),
            }
        );
    }

    #[test]
    fn dot_separated_millis_also_accepted() {
        let segment = parse_srt("00:01:00.250 --> 00:01:03.000\nsegment text");
        assert_eq!(segment.begin_time, Some(60250));
        assert_eq!(segment.end_time, Some(63000));
        assert_eq!(segment.text, "segment text");
    }

    #[test]
    fn plain_text_passes_through() {
        let segment = parse_srt("just words");
        assert_eq!(
            segment,
            SrtSegment {
                begin_time: None,
                end_time: None,
                text: "just words".to_string(),
            }
        );
    }
}
