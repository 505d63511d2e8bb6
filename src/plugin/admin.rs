//! Owner-only maintenance commands for the durable store.

use crate::{event::*, helper::MessageHelper, persistent_state::PersistentState, plugin::*};
use anyhow::Result;
use serenity::all::Message;

pub struct PluginAdmin;

#[serenity::async_trait]
impl Plugin for PluginAdmin {
    fn name(&self) -> &'static str {
        "admin"
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{}init - create the state file if it doesn't exist (owner only)\n\
             {}cleardatabase - reset the whole store to defaults (owner only)",
            prefix, prefix
        ))
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        if let Some((msg, _)) = event.bot_cmd(ctx, "init").await {
            return init(ctx, msg).await;
        }
        if let Some((msg, _)) = event.bot_cmd(ctx, "cleardatabase").await {
            return clear_database(ctx, msg).await;
        }

        Ok(EventHandled::No)
    }
}

async fn init(ctx: &Context<'_>, msg: &Message) -> Result<EventHandled> {
    if !msg.is_from_owner(ctx).await {
        msg.reply(ctx.cache_http, "Only a bot owner can initialise the store.")
            .await?;
        return Ok(EventHandled::Yes);
    }

    let created = ctx.pstate.read().await.save_if_missing().await?;

    let reply = if created {
        "⚙️ State file has been initialised."
    } else {
        "⚙️ State file already initialised."
    };
    msg.reply(ctx.cache_http, reply).await?;
    Ok(EventHandled::Yes)
}

async fn clear_database(ctx: &Context<'_>, msg: &Message) -> Result<EventHandled> {
    if !msg.is_from_owner(ctx).await {
        msg.reply(ctx.cache_http, "Only a bot owner can clear the store.")
            .await?;
        return Ok(EventHandled::Yes);
    }

    {
        let mut pstate = ctx.pstate.write().await;
        *pstate = PersistentState::default();
        pstate.save().await?;
    }

    msg.reply(ctx.cache_http, "Database has been cleared.")
        .await?;
    Ok(EventHandled::Yes)
}
