use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use regex::Regex;

/// A single day's reported hours, normalized to minute offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkInput {
    pub date: NaiveDate,
    pub start_min: i32,
    pub end_min: i32,
    pub break_min: i32,
    /// True iff the text carried no explicit date, i.e. the entry is "today"
    /// and eligible to become a quick-pick template.
    pub from_template_candidate: bool,
}

/// Classification of a free-text mark message. Rejections are a value,
/// never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Work(WorkInput),
    DayOff { date: NaiveDate },
    NoMatch,
}

const DAY_MIN: i32 = 24 * 60;

fn work_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)^\s*
              (?:(?P<d>\d{1,2})[./-](?P<m>\d{1,2})[./-](?P<y>\d{4}|\d{2})\s+)?
              (?P<start>\d{1,2}(?::\d{1,2})?)
              \s*-\s*
              (?P<end>\d{1,2}(?::\d{1,2})?)
              (?:\s*-\s*(?P<brk>\d{1,2}(?::\d{1,2})?))?
              \s*$",
        )
        .expect("work regex")
    })
}

fn dayoff_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)^\s*
              (?:(?P<d>\d{1,2})[./-](?P<m>\d{1,2})[./-](?P<y>\d{4}|\d{2})\s+)?
              0\s*$",
        )
        .expect("dayoff regex")
    })
}

fn period_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)^\s*
              (?P<d1>\d{1,2})[./-](?P<m1>\d{1,2})[./-](?P<y1>\d{4}|\d{2})
              \s*-\s*
              (?P<d2>\d{1,2})[./-](?P<m2>\d{1,2})[./-](?P<y2>\d{4}|\d{2})
              \s*$",
        )
        .expect("period regex")
    })
}

/// `H` or `H:MM`; missing minutes default to 0. The minute field is taken
/// literally, so `7:5` is 7h + 5min.
fn to_minutes(token: &str) -> Option<i32> {
    match token.split_once(':') {
        Some((h, m)) => Some(h.parse::<i32>().ok()? * 60 + m.parse::<i32>().ok()?),
        None => Some(token.parse::<i32>().ok()? * 60),
    }
}

/// Two-digit years are anchored in the 2000s.
fn norm_year(y: i32) -> i32 {
    if y < 100 {
        2000 + y
    } else {
        y
    }
}

fn date_from_captures(caps: &regex::Captures, d: &str, m: &str, y: &str) -> Option<NaiveDate> {
    let day: u32 = caps.name(d)?.as_str().parse().ok()?;
    let month: u32 = caps.name(m)?.as_str().parse().ok()?;
    let year: i32 = caps.name(y)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(norm_year(year), month, day)
}

/// The user's "today": `now_utc` shifted into their zone.
pub fn today_in(tz: Tz, now_utc: DateTime<Utc>) -> NaiveDate {
    now_utc.with_timezone(&tz).date_naive()
}

/// Classify a mark message: `[D.M.Y] start-end[-break]` or `[D.M.Y] 0`.
pub fn parse_mark(text: &str, tz: Tz, now_utc: DateTime<Utc>) -> Parsed {
    if let Some(caps) = dayoff_re().captures(text) {
        let date = if caps.name("d").is_some() {
            match date_from_captures(&caps, "d", "m", "y") {
                Some(d) => d,
                None => return Parsed::NoMatch,
            }
        } else {
            today_in(tz, now_utc)
        };
        return Parsed::DayOff { date };
    }

    let caps = match work_re().captures(text) {
        Some(c) => c,
        None => return Parsed::NoMatch,
    };
    let has_date = caps.name("d").is_some();
    let date = if has_date {
        match date_from_captures(&caps, "d", "m", "y") {
            Some(d) => d,
            None => return Parsed::NoMatch,
        }
    } else {
        today_in(tz, now_utc)
    };

    let start = caps.name("start").and_then(|m| to_minutes(m.as_str()));
    let end = caps.name("end").and_then(|m| to_minutes(m.as_str()));
    let brk = match caps.name("brk") {
        Some(m) => to_minutes(m.as_str()),
        None => Some(0),
    };
    let (start, end, brk) = match (start, end, brk) {
        (Some(s), Some(e), Some(b)) => (s, e, b),
        _ => return Parsed::NoMatch,
    };

    if !(0..DAY_MIN).contains(&start) || !(1..=DAY_MIN).contains(&end) {
        return Parsed::NoMatch;
    }
    if start >= end {
        return Parsed::NoMatch;
    }
    if brk < 0 || brk > end - start {
        return Parsed::NoMatch;
    }

    Parsed::Work(WorkInput {
        date,
        start_min: start,
        end_min: end,
        break_min: brk,
        from_template_candidate: !has_date,
    })
}

/// Report range: `D.M.Y - D.M.Y`, both bounds required, start ≤ end.
pub fn parse_period(text: &str) -> Option<(NaiveDate, NaiveDate)> {
    let caps = period_re().captures(text)?;
    let from = date_from_captures(&caps, "d1", "m1", "y1")?;
    let to = date_from_captures(&caps, "d2", "m2", "y2")?;
    if from > to {
        return None;
    }
    Some((from, to))
}

/// Baseline: `D.M.Y, H+:MM` where the hour counts cumulative worked time and
/// may exceed 23. The date must not lie in the future relative to `today`.
pub fn parse_baseline(text: &str, today: NaiveDate) -> Option<(NaiveDate, i32)> {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    let date_re = DATE_RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})[./-](\d{1,2})[./-](\d{4}|\d{2})\b").expect("baseline date regex")
    });
    let time_re = TIME_RE
        .get_or_init(|| Regex::new(r"(\d{1,3})\s*:\s*(\d{2})").expect("baseline time regex"));

    let caps = date_re.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(norm_year(year), month, day)?;
    if date > today {
        return None;
    }

    // Search past the date token so "25.10.2025, 56:30" does not bind the
    // time pattern inside the date.
    let rest = &text[caps.get(0).map(|m| m.end()).unwrap_or(0)..];
    let tcaps = time_re.captures(rest)?;
    let hours: i32 = tcaps[1].parse().ok()?;
    let minutes: i32 = tcaps[2].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    Some((date, hours * 60 + minutes))
}

/// Reminder time: strict `HH:MM` (00-23:00-59) or the literal `off`.
/// Returns minutes since midnight; 0 disables.
pub fn parse_reminder(text: &str) -> Option<i32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"^\s*([01]\d|2[0-3]):([0-5]\d)\s*$").expect("reminder regex"));

    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("off") {
        return Some(0);
    }
    let caps = re.captures(text)?;
    let hours: i32 = caps[1].parse().ok()?;
    let minutes: i32 = caps[2].parse().ok()?;
    Some(hours * 60 + minutes)
}

/// IANA timezone name, e.g. `Europe/Warsaw`.
pub fn parse_timezone(text: &str) -> Option<Tz> {
    text.trim().parse::<Tz>().ok()
}

pub fn fmt_hhmm(total_min: i32) -> String {
    format!("{:02}:{:02}", total_min / 60, total_min % 60)
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// `HH:MM–HH:MM`, with a trailing `-HH:MM` when a break is present.
pub fn fmt_range(start_min: i32, end_min: i32, break_min: i32) -> String {
    if break_min > 0 {
        format!(
            "{}–{}-{}",
            fmt_hhmm(start_min),
            fmt_hhmm(end_min),
            fmt_hhmm(break_min)
        )
    } else {
        format!("{}–{}", fmt_hhmm(start_min), fmt_hhmm(end_min))
    }
}
