//! Time-boxed user prompt fragments that feed the generation prompt.

use crate::{event::*, helper::now_unix, log_event, persistent_state::PromptEntry, plugin::*};
use anyhow::Result;
use serenity::all::{Message, UserId};
use std::time::Duration;

pub struct PluginPrompt;

#[serenity::async_trait]
impl Plugin for PluginPrompt {
    fn name(&self) -> &'static str {
        "prompt"
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{}prompt add <minutes> <text> - add a prompt fragment for the given time\n\
             {}prompt list - list the active prompts\n\
             {}prompt clear - remove all active prompts",
            prefix, prefix, prefix
        ))
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, args)) = event.bot_cmd(ctx, "prompt").await else {
            return Ok(EventHandled::No);
        };

        match args.first().map(String::as_str) {
            Some("add") => add(ctx, msg, &args[1..]).await,
            Some("list") => list(ctx, msg).await,
            Some("clear") => clear(ctx, msg).await,
            _ => {
                msg.reply(ctx.cache_http, "Invalid subcommand.  See `;help`")
                    .await?;
                Ok(EventHandled::Yes)
            }
        }
    }
}

async fn add(ctx: &Context<'_>, msg: &Message, args: &[String]) -> Result<EventHandled> {
    let minutes = args.first().and_then(|arg| arg.parse::<u64>().ok());
    let text = args[1.min(args.len())..].join(" ");

    let (Some(minutes), false) = (minutes, text.is_empty()) else {
        msg.reply(ctx.cache_http, "Usage: `;prompt add <minutes> <text>`")
            .await?;
        return Ok(EventHandled::Yes);
    };
    if minutes == 0 {
        msg.reply(ctx.cache_http, "The prompt needs at least one minute.")
            .await?;
        return Ok(EventHandled::Yes);
    }

    let user = msg.author.id;
    let now = now_unix();
    let entry = PromptEntry {
        text: text.clone(),
        start_unix: now,
        duration_secs: minutes * 60,
    };
    let end_unix = entry.end_unix();

    {
        let mut pstate = ctx.pstate.write().await;
        if let Some(existing) = pstate.generator.prompts.get(&user) {
            if !existing.expired(now) {
                let minutes_left = (existing.end_unix() - now).div_ceil(60);
                msg.reply(
                    ctx.cache_http,
                    format!(
                        "You already have a prompt active for another {} minute(s).",
                        minutes_left
                    ),
                )
                .await?;
                return Ok(EventHandled::Yes);
            }
        }

        pstate.generator.prompts.insert(user, entry);
        pstate.save().await?;
    }

    msg.reply(
        ctx.cache_http,
        format!("🖊️ Prompt \"{}\" has been added until <t:{}:t>.", text, end_unix),
    )
    .await?;

    schedule_expiry(ctx, user, now, minutes * 60);
    Ok(EventHandled::Yes)
}

/// Prompts expire on their own schedule, independent of the generation
/// cycle.  The removal is announced in the target channel.
fn schedule_expiry(ctx: &Context<'_>, user: UserId, start_unix: u64, duration_secs: u64) {
    let pstate = ctx.pstate.clone();
    let discord = ctx.cache_http.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(duration_secs)).await;

        let removed = {
            let mut pstate = pstate.write().await;
            // Only remove the entry this timer was armed for; the user may
            // have cleared and re-added in the meantime.
            match pstate.generator.prompts.get(&user) {
                Some(entry) if entry.start_unix == start_unix => {
                    let text = entry.text.clone();
                    pstate.generator.prompts.remove(&user);
                    if let Err(err) = pstate.save().await {
                        log_event!("Failed to persist prompt expiry: {}", err);
                    }
                    Some((text, pstate.generator.target_channel))
                }
                _ => None,
            }
        };

        if let Some((text, Some(channel))) = removed {
            if let Err(err) = channel
                .say(&discord.http, format!("🖊️ Prompt \"{}\" has expired.", text))
                .await
            {
                log_event!("Failed to announce prompt expiry: {}", err);
            }
        }
    });
}

async fn list(ctx: &Context<'_>, msg: &Message) -> Result<EventHandled> {
    let now = now_unix();
    let mut lines: Vec<String> = {
        let pstate = ctx.pstate.read().await;
        pstate
            .generator
            .prompts
            .values()
            .filter(|entry| !entry.expired(now))
            .map(|entry| format!("- \"{}\" ending <t:{}:R>", entry.text, entry.end_unix()))
            .collect()
    };

    if lines.is_empty() {
        msg.reply(ctx.cache_http, "There are no active prompts.")
            .await?;
        return Ok(EventHandled::Yes);
    }

    lines.sort_unstable();
    msg.reply(
        ctx.cache_http,
        format!("The following prompts are active:\n{}", lines.join("\n")),
    )
    .await?;
    Ok(EventHandled::Yes)
}

async fn clear(ctx: &Context<'_>, msg: &Message) -> Result<EventHandled> {
    {
        let mut pstate = ctx.pstate.write().await;
        pstate.generator.prompts.clear();
        pstate.save().await?;
    }

    msg.reply(ctx.cache_http, "Prompts cleared.").await?;
    Ok(EventHandled::Yes)
}
