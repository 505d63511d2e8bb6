//! Start and stop commands for the generation cycle.

use crate::{
    event::*,
    generator::Cycle,
    persistent_state::{GeneratorState, VotingMode},
    plugin::*,
    volatile_state::CycleGuard,
};
use anyhow::Result;
use serenity::all::Message;

pub struct PluginGenerator;

#[serenity::async_trait]
impl Plugin for PluginGenerator {
    fn name(&self) -> &'static str {
        "generator"
    }

    async fn usage(&self, ctx: &Context<'_>) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{}start [reactions|buttons] - start posting generated images\n\
             {}stop - stop the generator after the current window",
            prefix, prefix
        ))
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        if let Some((msg, args)) = event.bot_cmd(ctx, "start").await {
            return start(ctx, msg, args).await;
        }
        if let Some((msg, _)) = event.bot_cmd(ctx, "stop").await {
            return stop(ctx, msg).await;
        }

        Ok(EventHandled::No)
    }
}

async fn start(ctx: &Context<'_>, msg: &Message, args: Vec<String>) -> Result<EventHandled> {
    let mode = match args.first() {
        None => VotingMode::Reactions,
        Some(arg) => match VotingMode::parse(arg) {
            Some(mode) => mode,
            None => {
                msg.reply(
                    ctx.cache_http,
                    format!("Unknown voting mode `{}`.  See `;help`", arg),
                )
                .await?;
                return Ok(EventHandled::Yes);
            }
        },
    };

    if mode == VotingMode::Poll {
        msg.reply(ctx.cache_http, "Poll voting is not implemented yet.")
            .await?;
        return Ok(EventHandled::Yes);
    }

    if ctx.pstate.read().await.generator.active || ctx.vstate.read().await.cycle.running() {
        msg.reply(
            ctx.cache_http,
            "The generator is already active. Stop it with `;stop` before starting a new one.",
        )
        .await?;
        return Ok(EventHandled::Yes);
    }

    let Some(channel) = ctx.pstate.read().await.generator.target_channel else {
        msg.reply(
            ctx.cache_http,
            "A target channel has not been set. Use `;setchannel` to target a channel first.",
        )
        .await?;
        return Ok(EventHandled::Yes);
    };

    if channel.to_channel(ctx.cache_http).await.is_err() {
        msg.reply(
            ctx.cache_http,
            "The target channel couldn't be found. Try setting it again with `;setchannel`.",
        )
        .await?;
        return Ok(EventHandled::Yes);
    }

    if !ctx.vstate.write().await.cycle.try_claim() {
        // Another start slipped in between the check above and now.
        msg.reply(ctx.cache_http, "The generator is already active.")
            .await?;
        return Ok(EventHandled::Yes);
    }

    let interval_ms = {
        let mut pstate = ctx.pstate.write().await;
        pstate.generator.active = true;
        pstate.generator.voting_mode = mode;
        match pstate.save().await {
            Ok(()) => pstate.generator.interval_ms,
            Err(err) => {
                // Nothing was spawned, so nothing will ever release the
                // guard; undo the half-finished start before surfacing the
                // error or every later start would be rejected.
                rollback_start(&mut pstate.generator, &mut ctx.vstate.write().await.cycle);
                return Err(err);
            }
        }
    };

    Cycle::spawn(ctx);

    msg.reply(
        ctx.cache_http,
        format!(
            "🔄 Starting generation at {} second intervals.",
            interval_ms / 1000
        ),
    )
    .await?;
    Ok(EventHandled::Yes)
}

/// Undo a start that claimed the cycle slot but never spawned the cycle.
fn rollback_start(generator: &mut GeneratorState, cycle: &mut CycleGuard) {
    generator.active = false;
    cycle.release();
}

async fn stop(ctx: &Context<'_>, msg: &Message) -> Result<EventHandled> {
    if !ctx.pstate.read().await.generator.active {
        msg.reply(
            ctx.cache_http,
            "The generator has not been started. Use `;start` to begin generations.",
        )
        .await?;
        return Ok(EventHandled::Yes);
    }

    {
        let mut pstate = ctx.pstate.write().await;
        pstate.generator.active = false;
        pstate.save().await?;
    }

    msg.reply(
        ctx.cache_http,
        "Generator stopped. A feedback window already in flight will finish first.",
    )
    .await?;
    Ok(EventHandled::Yes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_start_releases_claim_for_retry() {
        let mut generator = GeneratorState::default();
        let mut cycle = CycleGuard::new();

        // A start claims the slot and flips the record on before persisting.
        assert!(cycle.try_claim());
        generator.active = true;
        generator.voting_mode = VotingMode::Buttons;

        rollback_start(&mut generator, &mut cycle);

        // The next start must find both the record and the slot free again.
        assert!(!generator.active);
        assert!(cycle.try_claim());
    }
}
