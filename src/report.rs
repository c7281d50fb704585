use chrono::{Datelike, Duration, NaiveDate};

use crate::db::models::WorkEntry;
use crate::parse::{fmt_date, fmt_hhmm, fmt_range};

/// Telegram rejects messages past 4096 chars; leave headroom for framing.
pub const REPORT_CHAR_LIMIT: usize = 3900;

const WEEKDAYS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];

const HEADER: &str = "    Date    | Dw |       Time        | Total";
const RULE: &str = "------------+----+-------------------+-------";

/// Render a range of ledger rows as a fixed-width table plus the total
/// worked minutes. Pure over its input; the ledger is untouched.
pub fn aggregate(entries: &[WorkEntry]) -> (String, i64) {
    let mut rows = Vec::with_capacity(entries.len());
    let mut total: i64 = 0;

    for e in entries {
        let worked = (e.end_min - e.start_min - e.break_min) as i64;
        total += worked;
        let label = WEEKDAYS[e.work_date.weekday().num_days_from_monday() as usize];
        rows.push(format!(
            " {} | {} | {:<17} | {}",
            fmt_date(e.work_date),
            label,
            fmt_range(e.start_min, e.end_min, e.break_min),
            fmt_hhmm(worked as i32),
        ));
    }

    let mut text = String::new();
    text.push_str(HEADER);
    text.push('\n');
    text.push_str(RULE);
    text.push('\n');
    for row in &rows {
        text.push_str(row);
        text.push('\n');
    }
    text.push_str(&format!("Total: {}", fmt_hhmm(total as i32)));

    (truncate_for_display(text, rows.len(), REPORT_CHAR_LIMIT), total)
}

/// Display-only truncation: drop the oldest rows until the table fits,
/// marking the cut with an ellipsis line. The underlying entries are kept.
fn truncate_for_display(text: String, row_count: usize, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text;
    }
    let mut lines: Vec<&str> = text.lines().collect();
    // lines: header, rule, rows..., total
    let mut dropped = 0;
    while dropped < row_count {
        dropped += 1;
        lines.remove(2);
        // Prospective output: every line plus its newline, the ellipsis
        // line, minus the trailing newline popped below.
        let len: usize = lines.iter().map(|l| l.chars().count() + 1).sum::<usize>()
            + " …\n".chars().count()
            - 1;
        if len <= cap {
            break;
        }
    }
    let mut out = String::new();
    out.push_str(lines[0]);
    out.push('\n');
    out.push_str(lines[1]);
    out.push('\n');
    out.push_str(" …\n");
    for line in &lines[2..] {
        out.push_str(line);
        out.push('\n');
    }
    out.pop();
    out
}

/// First and last day of the month containing `today`.
pub fn current_month(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = today.with_day(1).unwrap_or(today);
    (first, last_day_of_month(first))
}

/// First and last day of the month before the one containing `today`,
/// including the December→January rollover.
pub fn previous_month(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_current = today.with_day(1).unwrap_or(today);
    let last_of_prev = first_of_current - Duration::days(1);
    let first = last_of_prev.with_day(1).unwrap_or(last_of_prev);
    (first, last_of_prev)
}

fn last_day_of_month(first: NaiveDate) -> NaiveDate {
    let (next_y, next_m) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    NaiveDate::from_ymd_opt(next_y, next_m, 1)
        .map(|d| d - Duration::days(1))
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(d: NaiveDate, start: i32, end: i32, brk: i32) -> WorkEntry {
        WorkEntry {
            user_id: 1,
            work_date: d,
            start_min: start,
            end_min: end,
            break_min: brk,
        }
    }

    #[test]
    fn single_monday_row() {
        let (text, total) = aggregate(&[entry(date(2025, 1, 6), 540, 1020, 60)]);
        assert_eq!(total, 420);
        assert!(text.contains(" 06.01.2025 | Mo | 09:00–17:00-01:00 | 07:00"));
        assert!(text.ends_with("Total: 07:00"));
    }

    #[test]
    fn multi_day_totals_accumulate() {
        let entries = vec![
            entry(date(2025, 1, 6), 540, 1020, 60),
            entry(date(2025, 1, 7), 480, 960, 0),
        ];
        let (text, total) = aggregate(&entries);
        assert_eq!(total, 420 + 480);
        assert!(text.contains("| Tu | 08:00–16:00"));
        assert!(text.ends_with("Total: 15:00"));
    }

    #[test]
    fn empty_range_renders_zero_total() {
        let (text, total) = aggregate(&[]);
        assert_eq!(total, 0);
        assert!(text.ends_with("Total: 00:00"));
    }

    #[test]
    fn header_and_rule_are_aligned() {
        let (text, _) = aggregate(&[entry(date(2025, 1, 6), 540, 1020, 0)]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], RULE);
    }

    #[test]
    fn oversized_report_is_truncated_from_the_front() {
        let entries: Vec<WorkEntry> = (0..200)
            .map(|i| entry(date(2025, 1, 1) + Duration::days(i % 28), 540, 1020, 30))
            .collect();
        let (text, total) = aggregate(&entries);
        assert!(text.chars().count() <= REPORT_CHAR_LIMIT);
        assert!(text.contains('…'));
        // the total still covers every entry, not just the visible ones
        assert_eq!(total, 200 * 450);
        assert!(text.ends_with(&format!("Total: {}", fmt_hhmm(200 * 450))));
    }

    #[test]
    fn truncation_drops_only_as_many_rows_as_needed() {
        // 8 lines: header, rule, 5 rows, total. Dropping exactly one row
        // brings the output to 28 chars, so a tighter cap must not cost a
        // second row.
        let text = "H\nR\nrow1\nrow2\nrow3\nrow4\nrow5\nT".to_string();
        let out = truncate_for_display(text, 5, 28);
        assert_eq!(out, "H\nR\n …\nrow2\nrow3\nrow4\nrow5\nT");
        assert_eq!(out.chars().count(), 28);
    }

    #[test]
    fn month_ranges() {
        assert_eq!(
            current_month(date(2025, 1, 15)),
            (date(2025, 1, 1), date(2025, 1, 31))
        );
        assert_eq!(
            current_month(date(2024, 2, 10)),
            (date(2024, 2, 1), date(2024, 2, 29))
        );
        assert_eq!(
            previous_month(date(2025, 1, 15)),
            (date(2024, 12, 1), date(2024, 12, 31))
        );
        assert_eq!(
            previous_month(date(2025, 3, 1)),
            (date(2025, 2, 1), date(2025, 2, 28))
        );
        assert_eq!(
            current_month(date(2025, 12, 31)),
            (date(2025, 12, 1), date(2025, 12, 31))
        );
    }
}
