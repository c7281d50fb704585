use std::sync::Arc;

use teloxide::macros::BotCommands;
use teloxide::prelude::*;

use crate::bot::{
    cancel_flow, enter_flow, ensure_access, keyboards, reminders, AppState, HELP_TEXT,
    INTERNAL_ERROR_TEXT,
};
use crate::dialog::Flow;
use crate::parse::{fmt_date, fmt_hhmm};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum BotCommand {
    #[command(description = "Log work time or a day off")]
    Mark,
    #[command(description = "Show a timesheet report")]
    Report,
    #[command(description = "Bot settings")]
    Settings,
    #[command(description = "Allow a new user (admin)")]
    User,
    #[command(description = "Cancel the current action")]
    Cancel,
    #[command(description = "Show help")]
    Help,
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: BotCommand,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let from = match msg.from.as_ref() {
        Some(u) => u,
        None => return Ok(()),
    };
    if !ensure_access(&bot, &state, from, msg.chat.id).await? {
        return Ok(());
    }
    let user_id = from.id.0 as i64;

    match cmd {
        BotCommand::Mark => {
            let templates = match state.db.list_templates(user_id).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("template fetch failed for {user_id}: {e:#}");
                    bot.send_message(msg.chat.id, INTERNAL_ERROR_TEXT).await?;
                    return Ok(());
                }
            };
            let sent = bot
                .send_message(msg.chat.id, "Log your work time:")
                .reply_markup(keyboards::work_keyboard(&templates))
                .await?;
            reminders::schedule_kb_expire(&bot, &state, sent.chat.id, sent.id);
        }

        BotCommand::Report => {
            let sent = bot
                .send_message(
                    msg.chat.id,
                    "Choose a report period, or send a range like 1.1.25-31.1.25:",
                )
                .reply_markup(keyboards::report_keyboard())
                .await?;
            reminders::schedule_kb_expire(&bot, &state, sent.chat.id, sent.id);
        }

        BotCommand::Settings => {
            let settings = match state.settings_for(user_id).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("settings fetch failed for {user_id}: {e:#}");
                    bot.send_message(msg.chat.id, INTERNAL_ERROR_TEXT).await?;
                    return Ok(());
                }
            };
            let reminder = if settings.reminder_minutes > 0 {
                format!("{} (Mon–Sat)", fmt_hhmm(settings.reminder_minutes))
            } else {
                "off".to_string()
            };
            let text = format!(
                "Settings\nBaseline: {} at {}\nReminder: {}\nTimezone: {}",
                fmt_date(settings.baseline_date),
                fmt_hhmm(settings.baseline_worked_min),
                reminder,
                settings.timezone,
            );
            let sent = bot
                .send_message(msg.chat.id, text)
                .reply_markup(keyboards::settings_keyboard())
                .await?;
            reminders::schedule_kb_expire(&bot, &state, sent.chat.id, sent.id);
        }

        BotCommand::User => {
            if !state.config.is_admin(user_id) {
                bot.send_message(msg.chat.id, "Only the administrator can add users.")
                    .await?;
                return Ok(());
            }
            enter_flow(&bot, &state, user_id, Flow::UserId, None).await;
            bot.send_message(
                msg.chat.id,
                "Send the numeric Telegram ID of the user to allow. /cancel to abort.",
            )
            .await?;
        }

        BotCommand::Cancel => {
            cancel_flow(&bot, &state, user_id).await;
            bot.send_message(msg.chat.id, "Canceled.").await?;
        }

        BotCommand::Help => {
            bot.send_message(msg.chat.id, HELP_TEXT).await?;
        }
    }

    Ok(())
}
