use crate::{event::*, generator::Cycle, log_event, log_internal, logging::PrintColor, plugin::*};
use anyhow::Result;

/// Logs the connection and resumes a generator that was active when the
/// process last stopped.
pub struct PluginReady;

#[serenity::async_trait]
impl Plugin for PluginReady {
    fn name(&self) -> &'static str {
        "Ready"
    }

    async fn usage(&self, _ctx: &Context<'_>) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        let Event::Ready(ready) = event else {
            return Ok(EventHandled::No);
        };

        log_event!("Connected as {}", ready.user.color());

        let resumable = {
            let generator = &ctx.pstate.read().await.generator;
            generator.active && generator.target_channel.is_some()
        };

        if resumable && ctx.vstate.write().await.cycle.try_claim() {
            log_internal!("Generator was active at shutdown; resuming");
            Cycle::spawn(ctx);
        }

        Ok(EventHandled::Yes)
    }
}
