//! Owner command to pick the channel generated posts are sent to.

use crate::{event::*, helper::MessageHelper, plugin::*};
use anyhow::Result;
use serenity::all::ChannelId;

pub struct PluginChannel;

#[serenity::async_trait]
impl Plugin for PluginChannel {
    fn name(&self) -> &'static str {
        "setchannel"
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{}setchannel <#channel> - where generated images are posted (owner only)",
            prefix
        ))
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Some((msg, args)) = event.bot_cmd(ctx, "setchannel").await else {
            return Ok(EventHandled::No);
        };

        if !msg.is_from_owner(ctx).await {
            msg.reply(
                ctx.cache_http,
                "Only a bot owner can set the target channel.",
            )
            .await?;
            return Ok(EventHandled::Yes);
        }

        let channel_id = match args.first().map(|arg| parse_channel(arg)) {
            Some(Some(id)) => id,
            _ => {
                msg.reply(ctx.cache_http, "Usage: `;setchannel <#channel>`")
                    .await?;
                return Ok(EventHandled::Yes);
            }
        };

        if channel_id.to_channel(ctx.cache_http).await.is_err() {
            msg.reply(
                ctx.cache_http,
                "I can't see that channel, so I can't post there.",
            )
            .await?;
            return Ok(EventHandled::Yes);
        }

        {
            let mut pstate = ctx.pstate.write().await;
            pstate.generator.target_channel = Some(channel_id);
            pstate.save().await?;
        }

        msg.reply(
            ctx.cache_http,
            format!("<#{}> set as the generation channel.", channel_id),
        )
        .await?;
        Ok(EventHandled::Yes)
    }
}

/// Accepts both a channel mention (`<#123>`) and a raw id.
fn parse_channel(arg: &str) -> Option<ChannelId> {
    let raw = arg
        .strip_prefix("<#")
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(arg);

    raw.parse::<ChannelId>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mentions_and_raw_ids() {
        assert_eq!(parse_channel("<#1234>"), Some(ChannelId::new(1234)));
        assert_eq!(parse_channel("1234"), Some(ChannelId::new(1234)));
        assert_eq!(parse_channel("#general"), None);
        assert_eq!(parse_channel("<#notanumber>"), None);
    }
}
