/// Text utilities shared by the collectors
pub mod text {
    /// Strip tags from an HTML snippet and collapse whitespace.
    pub fn extract_text_from_html(html: &str) -> String {
        let stripped = html
            .chars()
            .fold((String::new(), false), |(mut text, in_tag), c| match c {
                '<' => (text, true),
                '>' if in_tag => {
                    // keep words on either side of a tag apart
                    text.push(' ');
                    (text, false)
                }
                _ if !in_tag => {
                    text.push(c);
                    (text, in_tag)
                }
                _ => (text, in_tag),
            })
            .0;
        collapse_whitespace(&decode_entities(&stripped))
    }

    fn decode_entities(s: &str) -> String {
        s.replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&ndash;", "-")
            .replace("&mdash;", "-")
            .replace("&amp;", "&")
    }

    pub fn collapse_whitespace(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Truncate to at most `max_chars` characters, breaking at a word when possible.
    pub fn smart_truncate(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let truncated: String = text.chars().take(max_chars).collect();
        match truncated.rfind(' ') {
            Some(last_space) if last_space > 0 => format!("{}...", &truncated[..last_space]),
            _ => format!("{}...", truncated),
        }
    }

    /// Read an engagement number out of free text such as "1,234 stars" or "2.5k".
    pub fn parse_score(raw: &str) -> Option<f64> {
        let trimmed = raw.trim();
        let start = trimmed.find(|c: char| c.is_ascii_digit())?;
        let number: String = trimmed[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
            .filter(|c| *c != ',')
            .collect();
        let value: f64 = number.trim_end_matches('.').parse().ok()?;
        let suffix = trimmed[start..]
            .chars()
            .skip_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
            .next()
            .map(|c| c.to_ascii_lowercase());
        let value = match suffix {
            Some('k') => value * 1_000.0,
            Some('m') => value * 1_000_000.0,
            _ => value,
        };
        value.is_finite().then_some(value)
    }
}

/// Time utilities
pub mod time {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

    /// Parse the timestamp shapes sources actually emit: RFC 3339, RFC 2822,
    /// naive date-times (taken as UTC), bare dates and unix seconds.
    pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
            return Some(dt.with_timezone(&Utc));
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
        if let Ok(secs) = s.parse::<i64>() {
            return from_unix(secs);
        }
        None
    }

    /// Unix seconds, or milliseconds when the value is too large to be seconds.
    pub fn from_unix(value: i64) -> Option<DateTime<Utc>> {
        if value > 100_000_000_000 {
            DateTime::<Utc>::from_timestamp_millis(value)
        } else {
            DateTime::<Utc>::from_timestamp(value, 0)
        }
    }

    /// Format duration in human-readable form
    pub fn format_duration(duration: std::time::Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1_000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.1}s", duration.as_secs_f64())
        } else {
            format!("{}m{}s", millis / 60_000, (millis % 60_000) / 1_000)
        }
    }
}
