pub use crate::context::Context;
use crate::event::EventHandled;
use anyhow::Result;

mod admin;
mod channel;
mod generator;
mod help;
mod prompt;
mod ready;
mod shadow;

#[serenity::async_trait]
pub trait Plugin: Sync + Send {
    /// Plugin name.  Used for debug
    fn name(&self) -> &'static str;
    /// Help message lines.  None if no help message
    async fn usage(&self, ctx: &Context<'_>) -> Option<String>;
    /// Potentially handle event.  Returns:
    /// - Ok(EventHandled::Yes) if the event has been handled and no other plugin should attempt to
    ///   handle it
    /// - Ok(EventHandled::No) if another plugin should attempt to handle the event
    /// - Err if an error occurred
    async fn handle(&self, ctx: &Context<'_>, event: &crate::event::Event)
        -> Result<EventHandled>;
}

/// Ordered list of available plugins
pub fn plugins() -> Vec<Box<dyn Plugin>> {
    use crate::plugin::*;

    vec![
        // Core bot operations
        Box::new(ready::PluginReady),
        Box::new(help::PluginHelp),
        // Generator control and configuration
        Box::new(generator::PluginGenerator),
        Box::new(channel::PluginChannel),
        Box::new(prompt::PluginPrompt),
        Box::new(admin::PluginAdmin),
        // Passive observer of posts and reactions.
        // Keep last; it never handles events exclusively.
        Box::new(shadow::PluginShadow),
    ]
}
