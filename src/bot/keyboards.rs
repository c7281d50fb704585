use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::db::models::Template;
use crate::parse::fmt_range;

/// Quick-pick keyboard for the mark prompt: one row per template (most
/// recent first), then the day-off and help buttons.
pub fn work_keyboard(templates: &[Template]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    for t in templates.iter().take(4) {
        rows.push(vec![InlineKeyboardButton::callback(
            fmt_range(t.start_min, t.end_min, t.break_min),
            format!("tpl:{}:{}:{}", t.start_min, t.end_min, t.break_min),
        )]);
    }
    rows.push(vec![
        InlineKeyboardButton::callback("Day off", "dayoff"),
        InlineKeyboardButton::callback("Help", "help"),
    ]);
    InlineKeyboardMarkup::new(rows)
}

pub fn report_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Current month", "rep:cur"),
        InlineKeyboardButton::callback("Previous month", "rep:prev"),
    ]])
}

pub fn settings_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("Baseline", "set:baseline")],
        vec![InlineKeyboardButton::callback("Reminder", "set:reminder")],
        vec![InlineKeyboardButton::callback("Timezone", "set:tz")],
    ])
}
