use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;

use crate::bot::{
    arm_flow_timeout, ensure_access, finish_flow, reminders, send_report, AppState, HELP_TEXT,
    INTERNAL_ERROR_TEXT,
};
use crate::dialog::{Flow, PendingInput};
use crate::parse::{self, fmt_date, fmt_hhmm, fmt_range, Parsed};
use crate::scheduler::JobKey;

/// Free-text entry point: a pending flow consumes the text first; otherwise
/// it is classified as a period request or a work/day-off mark.
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let from = match msg.from.as_ref() {
        Some(u) => u,
        None => return Ok(()),
    };
    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };
    if !ensure_access(&bot, &state, from, msg.chat.id).await? {
        return Ok(());
    }
    let user_id = from.id.0 as i64;

    if let Some(pending) = state.dialogs.peek(user_id) {
        // Input cancels the silence timeout before any validation runs.
        state.scheduler.cancel(JobKey::FlowTimeout { user_id });
        return handle_flow_input(&bot, &msg, &state, user_id, pending, text).await;
    }

    if let Some((from_date, to_date)) = parse::parse_period(text) {
        return send_report(&bot, &state, msg.chat.id, user_id, from_date, to_date).await;
    }

    let settings = match state.settings_for(user_id).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("settings fetch failed for {user_id}: {e:#}");
            bot.send_message(msg.chat.id, INTERNAL_ERROR_TEXT).await?;
            return Ok(());
        }
    };

    match parse::parse_mark(text, settings.tz(), Utc::now()) {
        Parsed::Work(w) => {
            if let Err(e) = state
                .db
                .upsert_entry(user_id, w.date, w.start_min, w.end_min, w.break_min)
                .await
            {
                tracing::error!("entry upsert failed for {user_id}: {e:#}");
                bot.send_message(msg.chat.id, INTERNAL_ERROR_TEXT).await?;
                return Ok(());
            }
            if w.from_template_candidate {
                // The entry is already saved; template recency is best-effort.
                if let Err(e) = state
                    .db
                    .touch_template(user_id, w.start_min, w.end_min, w.break_min)
                    .await
                {
                    tracing::error!("template touch failed for {user_id}: {e:#}");
                }
            }
            let worked = w.end_min - w.start_min - w.break_min;
            bot.send_message(
                msg.chat.id,
                format!(
                    "Recorded {}: {} (worked {})",
                    fmt_date(w.date),
                    fmt_range(w.start_min, w.end_min, w.break_min),
                    fmt_hhmm(worked)
                ),
            )
            .await?;
        }

        Parsed::DayOff { date } => {
            if let Err(e) = state.db.delete_entry(user_id, date).await {
                tracing::error!("entry delete failed for {user_id}: {e:#}");
                bot.send_message(msg.chat.id, INTERNAL_ERROR_TEXT).await?;
                return Ok(());
            }
            bot.send_message(msg.chat.id, format!("Marked {} as a day off.", fmt_date(date)))
                .await?;
        }

        Parsed::NoMatch => {
            bot.send_message(
                msg.chat.id,
                format!("I didn't recognize that.\n\n{HELP_TEXT}"),
            )
            .await?;
        }
    }

    Ok(())
}

/// One step of a waiting flow. Valid input saves, confirms, and restores the
/// originating menu; invalid input re-prompts and re-arms a fresh timeout.
async fn handle_flow_input(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    user_id: i64,
    pending: PendingInput,
    text: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let chat_id = msg.chat.id;

    let settings = match state.settings_for(user_id).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("settings fetch failed for {user_id}: {e:#}");
            state.dialogs.clear(user_id);
            bot.send_message(chat_id, INTERNAL_ERROR_TEXT).await?;
            return Ok(());
        }
    };

    match pending.flow {
        Flow::Baseline => {
            let today = parse::today_in(settings.tz(), Utc::now());
            match parse::parse_baseline(text, today) {
                Some((date, minutes)) => {
                    if let Err(e) = state.db.set_baseline(user_id, date, minutes).await {
                        tracing::error!("baseline save failed for {user_id}: {e:#}");
                        state.dialogs.clear(user_id);
                        bot.send_message(chat_id, INTERNAL_ERROR_TEXT).await?;
                        return Ok(());
                    }
                    finish_flow(bot, state, user_id).await;
                    bot.send_message(
                        chat_id,
                        format!("Saved: date {}, baseline {}", fmt_date(date), fmt_hhmm(minutes)),
                    )
                    .await?;
                }
                None => {
                    reprompt(
                        bot,
                        state,
                        user_id,
                        chat_id,
                        "Invalid format. Example: 25.10.2025, 56:30 (separators '.', '/' or '-'; \
                         the date must not be in the future).",
                    )
                    .await?;
                }
            }
        }

        Flow::Reminder => {
            match parse::parse_reminder(text) {
                Some(minutes) => {
                    if let Err(e) = state.db.set_reminder_minutes(user_id, minutes).await {
                        tracing::error!("reminder save failed for {user_id}: {e:#}");
                        state.dialogs.clear(user_id);
                        bot.send_message(chat_id, INTERNAL_ERROR_TEXT).await?;
                        return Ok(());
                    }
                    reminders::schedule_user_reminder(bot, state, user_id, minutes, settings.tz());
                    finish_flow(bot, state, user_id).await;
                    let confirmation = if minutes > 0 {
                        format!("Reminder set for {}, Monday–Saturday.", fmt_hhmm(minutes))
                    } else {
                        "Reminder disabled.".to_string()
                    };
                    bot.send_message(chat_id, confirmation).await?;
                }
                None => {
                    reprompt(
                        bot,
                        state,
                        user_id,
                        chat_id,
                        "Invalid time. Use HH:MM between 00:00 and 23:59, or 'off'.",
                    )
                    .await?;
                }
            }
        }

        Flow::Timezone => {
            match parse::parse_timezone(text) {
                Some(tz) => {
                    if let Err(e) = state.db.set_timezone(user_id, tz.name()).await {
                        tracing::error!("timezone save failed for {user_id}: {e:#}");
                        state.dialogs.clear(user_id);
                        bot.send_message(chat_id, INTERNAL_ERROR_TEXT).await?;
                        return Ok(());
                    }
                    // The reminder, if any, must start firing in the new zone.
                    reminders::schedule_user_reminder(
                        bot,
                        state,
                        user_id,
                        settings.reminder_minutes,
                        tz,
                    );
                    finish_flow(bot, state, user_id).await;
                    bot.send_message(chat_id, format!("Timezone set to {}.", tz.name()))
                        .await?;
                }
                None => {
                    reprompt(
                        bot,
                        state,
                        user_id,
                        chat_id,
                        "That's not a timezone I know. Use an IANA name like Europe/Warsaw.",
                    )
                    .await?;
                }
            }
        }

        Flow::UserId => {
            let candidate = text.trim();
            let target: Option<i64> = if candidate.len() <= 20 {
                candidate.parse().ok().filter(|id| *id > 0)
            } else {
                None
            };
            match target {
                Some(target_id) => {
                    if let Err(e) = state.db.upsert_user(target_id, None).await {
                        tracing::error!("user provisioning failed: {e:#}");
                        state.dialogs.clear(user_id);
                        bot.send_message(chat_id, INTERNAL_ERROR_TEXT).await?;
                        return Ok(());
                    }
                    finish_flow(bot, state, user_id).await;
                    bot.send_message(chat_id, format!("User {target_id} can now use the bot."))
                        .await?;
                }
                None => {
                    reprompt(
                        bot,
                        state,
                        user_id,
                        chat_id,
                        "Send a plain positive number, e.g. 123456789.",
                    )
                    .await?;
                }
            }
        }
    }

    Ok(())
}

/// Invalid flow input: name what was expected and restart the 60 s window.
async fn reprompt(
    bot: &Bot,
    state: &Arc<AppState>,
    user_id: i64,
    chat_id: ChatId,
    text: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    bot.send_message(chat_id, text).await?;
    arm_flow_timeout(state, user_id);
    Ok(())
}
