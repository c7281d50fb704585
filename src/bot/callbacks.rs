use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::MessageId;

use crate::bot::{
    enter_flow, ensure_access, reminders, send_report, AppState, HELP_TEXT, INTERNAL_ERROR_TEXT,
};
use crate::dialog::Flow;
use crate::parse::{self, fmt_date, fmt_hhmm, fmt_range};
use crate::report;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let data = match q.data.as_deref() {
        Some(d) => d,
        None => return Ok(()),
    };
    let user_id = q.from.id.0 as i64;
    let origin = q.message.as_ref().map(|m| (m.chat().id, m.id()));
    let chat_id = origin.map(|(c, _)| c).unwrap_or(ChatId(user_id));

    if !ensure_access(&bot, &state, &q.from, chat_id).await? {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    }

    // ── Template quick-pick ────────────────────────────────────────
    if let Some(payload) = data.strip_prefix("tpl:") {
        let triple = match parse_template_payload(payload) {
            Some(t) => t,
            None => {
                bot.answer_callback_query(&q.id).await?;
                return Ok(());
            }
        };
        let (start, end, brk) = triple;

        let settings = match state.settings_for(user_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("settings fetch failed for {user_id}: {e:#}");
                bot.answer_callback_query(&q.id).text(INTERNAL_ERROR_TEXT).await?;
                return Ok(());
            }
        };
        let today = parse::today_in(settings.tz(), Utc::now());

        if let Err(e) = state.db.upsert_entry(user_id, today, start, end, brk).await {
            tracing::error!("entry upsert failed for {user_id}: {e:#}");
            bot.answer_callback_query(&q.id).text(INTERNAL_ERROR_TEXT).await?;
            return Ok(());
        }
        // Applying a template is a dateless entry: refresh its recency.
        if let Err(e) = state.db.touch_template(user_id, start, end, brk).await {
            tracing::error!("template touch failed for {user_id}: {e:#}");
        }

        retire_control(&bot, &state, origin).await;
        bot.answer_callback_query(&q.id).await?;
        let worked = end - start - brk;
        bot.send_message(
            chat_id,
            format!(
                "Recorded {}: {} (worked {})",
                fmt_date(today),
                fmt_range(start, end, brk),
                fmt_hhmm(worked)
            ),
        )
        .await?;
        return Ok(());
    }

    // ── Day off ────────────────────────────────────────────────────
    if data == "dayoff" {
        let settings = match state.settings_for(user_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("settings fetch failed for {user_id}: {e:#}");
                bot.answer_callback_query(&q.id).text(INTERNAL_ERROR_TEXT).await?;
                return Ok(());
            }
        };
        let today = parse::today_in(settings.tz(), Utc::now());
        if let Err(e) = state.db.delete_entry(user_id, today).await {
            tracing::error!("entry delete failed for {user_id}: {e:#}");
            bot.answer_callback_query(&q.id).text(INTERNAL_ERROR_TEXT).await?;
            return Ok(());
        }
        retire_control(&bot, &state, origin).await;
        bot.answer_callback_query(&q.id).await?;
        bot.send_message(chat_id, format!("Marked {} as a day off.", fmt_date(today)))
            .await?;
        return Ok(());
    }

    // ── Canned reports ─────────────────────────────────────────────
    if let Some(which) = data.strip_prefix("rep:") {
        let settings = match state.settings_for(user_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("settings fetch failed for {user_id}: {e:#}");
                bot.answer_callback_query(&q.id).text(INTERNAL_ERROR_TEXT).await?;
                return Ok(());
            }
        };
        let today = parse::today_in(settings.tz(), Utc::now());
        let (from, to) = match which {
            "cur" => report::current_month(today),
            "prev" => report::previous_month(today),
            _ => {
                bot.answer_callback_query(&q.id).await?;
                return Ok(());
            }
        };
        retire_control(&bot, &state, origin).await;
        bot.answer_callback_query(&q.id).await?;
        send_report(&bot, &state, chat_id, user_id, from, to).await?;
        return Ok(());
    }

    // ── Settings sub-flows ─────────────────────────────────────────
    if let Some(which) = data.strip_prefix("set:") {
        let (flow, prompt) = match which {
            "baseline" => (
                Flow::Baseline,
                "Enter the baseline date and accumulated time (example: 25.10.2025, 56:30). /cancel to abort.",
            ),
            "reminder" => (
                Flow::Reminder,
                "Enter the reminder time as HH:MM (24h), or 'off' to disable. /cancel to abort.",
            ),
            "tz" => (
                Flow::Timezone,
                "Enter your IANA timezone (example: Europe/Warsaw). /cancel to abort.",
            ),
            _ => {
                bot.answer_callback_query(&q.id).await?;
                return Ok(());
            }
        };
        // Hide the menu that launched the flow; it is restored on exit.
        retire_control(&bot, &state, origin).await;
        enter_flow(
            &bot,
            &state,
            user_id,
            flow,
            origin.map(|(c, m)| (c.0, m.0)),
        )
        .await;
        bot.answer_callback_query(&q.id).await?;
        bot.send_message(chat_id, prompt).await?;
        return Ok(());
    }

    // ── Help ───────────────────────────────────────────────────────
    if data == "help" {
        bot.answer_callback_query(&q.id).await?;
        bot.send_message(chat_id, HELP_TEXT).await?;
        return Ok(());
    }

    bot.answer_callback_query(&q.id).await?;
    Ok(())
}

fn parse_template_payload(payload: &str) -> Option<(i32, i32, i32)> {
    let mut parts = payload.split(':');
    let start: i32 = parts.next()?.parse().ok()?;
    let end: i32 = parts.next()?.parse().ok()?;
    let brk: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    // Same bounds the text grammar enforces.
    if !(0..1440).contains(&start) || !(1..=1440).contains(&end) || start >= end {
        return None;
    }
    if brk < 0 || brk > end - start {
        return None;
    }
    Some((start, end, brk))
}

/// Cancel a control message's expiry timer and take its keyboard down.
async fn retire_control(bot: &Bot, state: &AppState, origin: Option<(ChatId, MessageId)>) {
    if let Some((chat_id, message_id)) = origin {
        reminders::cancel_kb_expire(state, chat_id, message_id);
        reminders::clear_markup(bot, chat_id, message_id).await;
    }
}
