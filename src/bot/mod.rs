pub mod callbacks;
pub mod commands;
pub mod handlers;
pub mod keyboards;
pub mod reminders;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::MessageId;

use crate::config::AppConfig;
use crate::db::models::UserSettings;
use crate::db::Database;
use crate::dialog::{arm_silence_timeout, Dialogs, Flow, PendingInput};
use crate::parse::{self, fmt_date};
use crate::report;
use crate::scheduler::{JobKey, Scheduler};

/// Shared application state, accessible from all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub scheduler: Scheduler,
    pub dialogs: Dialogs,
}

impl AppState {
    /// Settings with lazy-default creation: a fresh row gets today's date in
    /// the default zone, zero baseline, and the reminder disabled.
    pub async fn settings_for(&self, user_id: i64) -> anyhow::Result<UserSettings> {
        let today = parse::today_in(self.config.default_tz(), Utc::now());
        self.db
            .get_or_create_settings(user_id, today, &self.config.default_timezone)
            .await
    }
}

pub const INTERNAL_ERROR_TEXT: &str = "Something went wrong on our side. Please try again.";

pub const HELP_TEXT: &str = "\
Log your hours as free text:
  9-17:30            today, 09:00–17:30
  9-18-0:45          with a 45 min break
  24.12.25 8-16      explicit date
  0                  day off (today)
  25.10.2025 0       day off on a date

Reports: /report, or send a range like 1.1.25-31.1.25.
Settings: /settings (baseline, reminder, timezone).";

/// Build the teloxide update handler tree.
pub fn build_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    let command_handler = Update::filter_message()
        .filter_command::<commands::BotCommand>()
        .endpoint(commands::handle_command);

    let callback_handler = Update::filter_callback_query().endpoint(callbacks::handle_callback);

    let message_handler = Update::filter_message().endpoint(handlers::handle_message);

    dptree::entry()
        .branch(command_handler)
        .branch(callback_handler)
        .branch(message_handler)
}

/// Access gate: the admin is always allowed (and kept in the allow-list);
/// everyone else must have been provisioned with /user. Strangers get a
/// notice telling them what to send the administrator.
pub async fn ensure_access(
    bot: &Bot,
    state: &AppState,
    user: &teloxide::types::User,
    chat_id: ChatId,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let user_id = user.id.0 as i64;
    if state.config.is_admin(user_id) {
        if let Err(e) = state.db.upsert_user(user_id, user.username.as_deref()).await {
            tracing::error!("admin upsert failed: {e:#}");
        }
        return Ok(true);
    }
    match state.db.get_user(user_id).await {
        Ok(Some(_)) => Ok(true),
        Ok(None) => {
            bot.send_message(
                chat_id,
                format!(
                    "Hello {}. Please send your ID: {} to the administrator.",
                    user.full_name(),
                    user_id
                ),
            )
            .await?;
            Ok(false)
        }
        Err(e) => {
            tracing::error!("access check failed for {user_id}: {e:#}");
            bot.send_message(chat_id, INTERNAL_ERROR_TEXT).await?;
            Ok(false)
        }
    }
}

/// Enter a waiting state and arm the silence timeout that quietly returns
/// the user to Idle. A displaced flow gets its hidden control message back,
/// menu restored and auto-hide re-armed, so it is not left orphaned.
pub async fn enter_flow(
    bot: &Bot,
    state: &Arc<AppState>,
    user_id: i64,
    flow: Flow,
    control: Option<(i64, i32)>,
) {
    let displaced = state.dialogs.begin(user_id, PendingInput { flow, control });
    if let Some((chat_id, message_id)) = displaced_control(displaced, control) {
        restore_control(bot, state, ChatId(chat_id), MessageId(message_id)).await;
    }
    arm_flow_timeout(state, user_id);
}

/// The control message a newly begun flow displaces, unless the new flow
/// took over the same message.
fn displaced_control(
    displaced: Option<PendingInput>,
    control: Option<(i64, i32)>,
) -> Option<(i64, i32)> {
    displaced
        .and_then(|p| p.control)
        .filter(|c| Some(*c) != control)
}

pub fn arm_flow_timeout(state: &Arc<AppState>, user_id: i64) {
    arm_silence_timeout(
        &state.scheduler,
        &state.dialogs,
        user_id,
        Duration::from_secs(reminders::FLOW_TIMEOUT_SECS),
    );
}

/// Universal /cancel: reset to Idle unconditionally and retract whatever
/// control message the flow had hidden.
pub async fn cancel_flow(bot: &Bot, state: &Arc<AppState>, user_id: i64) {
    state.scheduler.cancel(JobKey::FlowTimeout { user_id });
    if let Some(pending) = state.dialogs.take(user_id) {
        if let Some((chat_id, message_id)) = pending.control {
            reminders::cancel_kb_expire(state, ChatId(chat_id), MessageId(message_id));
            reminders::clear_markup(bot, ChatId(chat_id), MessageId(message_id)).await;
        }
    }
}

/// Successful flow exit: restore the menu the flow hid and give it a fresh
/// auto-hide window.
pub async fn finish_flow(bot: &Bot, state: &Arc<AppState>, user_id: i64) {
    if let Some(pending) = state.dialogs.take(user_id) {
        if let Some((chat_id, message_id)) = pending.control {
            restore_control(bot, state, ChatId(chat_id), MessageId(message_id)).await;
        }
    }
}

/// Put the settings menu back on a control message and give it a fresh
/// auto-hide window.
async fn restore_control(bot: &Bot, state: &Arc<AppState>, chat_id: ChatId, message_id: MessageId) {
    if let Err(e) = bot
        .edit_message_reply_markup(chat_id, message_id)
        .reply_markup(keyboards::settings_keyboard())
        .await
    {
        tracing::debug!("restoring menu {}:{} failed: {e}", chat_id, message_id.0);
    }
    reminders::schedule_kb_expire(bot, state, chat_id, message_id);
}

/// Fetch a range and deliver it as a report. An empty range is answered with
/// a short notice rather than an empty table.
pub async fn send_report(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    from: chrono::NaiveDate,
    to: chrono::NaiveDate,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let entries = match state.db.fetch_range(user_id, from, to).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("range fetch failed for {user_id}: {e:#}");
            bot.send_message(chat_id, INTERNAL_ERROR_TEXT).await?;
            return Ok(());
        }
    };
    if entries.is_empty() {
        bot.send_message(
            chat_id,
            format!("No entries between {} and {}.", fmt_date(from), fmt_date(to)),
        )
        .await?;
        return Ok(());
    }
    let (table, _total) = report::aggregate(&entries);
    bot.send_message(chat_id, table).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displaced_control_surfaces_the_old_menu() {
        let old = Some(PendingInput {
            flow: Flow::Baseline,
            control: Some((100, 7)),
        });
        assert_eq!(displaced_control(old, None), Some((100, 7)));
        assert_eq!(displaced_control(old, Some((200, 9))), Some((100, 7)));
    }

    #[test]
    fn displaced_control_ignores_idle_and_same_message() {
        assert_eq!(displaced_control(None, Some((100, 7))), None);
        let no_control = Some(PendingInput {
            flow: Flow::UserId,
            control: None,
        });
        assert_eq!(displaced_control(no_control, Some((100, 7))), None);
        let same = Some(PendingInput {
            flow: Flow::Reminder,
            control: Some((100, 7)),
        });
        assert_eq!(displaced_control(same, Some((100, 7))), None);
    }
}
