use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use teloxide::prelude::*;
use teloxide::types::MessageId;

use crate::bot::{keyboards, AppState};
use crate::scheduler::JobKey;

/// Inline keyboards auto-hide after this many seconds of inactivity.
pub const KEYBOARD_TTL_SECS: u64 = 60;
/// A waiting flow is silently abandoned after this many seconds.
pub const FLOW_TIMEOUT_SECS: u64 = 60;

/// Retract a message's inline keyboard. Cosmetic: the message may already
/// be deleted, so failures are logged and swallowed.
pub async fn clear_markup(bot: &Bot, chat_id: ChatId, message_id: MessageId) {
    if let Err(e) = bot.edit_message_reply_markup(chat_id, message_id).await {
        tracing::debug!("clearing keyboard {}:{} failed: {e}", chat_id, message_id.0);
    }
}

/// Arm (or restart) the auto-hide countdown for a control message.
pub fn schedule_kb_expire(bot: &Bot, state: &Arc<AppState>, chat_id: ChatId, message_id: MessageId) {
    let bot = bot.clone();
    state.scheduler.schedule_once(
        JobKey::Expire {
            chat_id: chat_id.0,
            message_id: message_id.0,
        },
        Duration::from_secs(KEYBOARD_TTL_SECS),
        async move { clear_markup(&bot, chat_id, message_id).await },
    );
}

pub fn cancel_kb_expire(state: &AppState, chat_id: ChatId, message_id: MessageId) {
    state.scheduler.cancel(JobKey::Expire {
        chat_id: chat_id.0,
        message_id: message_id.0,
    });
}

/// (Re)schedule a user's Mon–Sat reminder; `minutes <= 0` disables it.
pub fn schedule_user_reminder(
    bot: &Bot,
    state: &Arc<AppState>,
    user_id: i64,
    minutes: i32,
    tz: Tz,
) {
    let scheduler = state.scheduler.clone();
    let bot = bot.clone();
    let state = Arc::clone(state);
    scheduler.schedule_recurring(JobKey::Reminder { user_id }, minutes, tz, move || {
        send_reminder(bot.clone(), Arc::clone(&state), user_id)
    });
}

/// The reminder itself: the same "log your time" prompt a /mark produces,
/// quick-pick templates included, auto-hiding like any other control.
pub async fn send_reminder(bot: Bot, state: Arc<AppState>, user_id: i64) {
    let templates = match state.db.list_templates(user_id).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("reminder for {user_id}: template fetch failed: {e:#}");
            Vec::new()
        }
    };
    match bot
        .send_message(ChatId(user_id), "Log your work time:")
        .reply_markup(keyboards::work_keyboard(&templates))
        .await
    {
        Ok(msg) => schedule_kb_expire(&bot, &state, msg.chat.id, msg.id),
        Err(e) => tracing::warn!("reminder for {user_id} could not be delivered: {e}"),
    }
}

/// Rebuild every recurring reminder from persisted settings. One-shot
/// keyboard expiries are deliberately not recovered across restarts.
pub async fn restore_reminders(bot: &Bot, state: &Arc<AppState>) -> anyhow::Result<()> {
    let rows = state.db.list_reminder_settings().await?;
    let count = rows.len();
    for settings in rows {
        schedule_user_reminder(
            bot,
            state,
            settings.user_id,
            settings.reminder_minutes,
            settings.tz(),
        );
    }
    tracing::info!("restored {count} reminder job(s)");
    Ok(())
}
