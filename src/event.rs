//! The Serenity crate we're using for the Discord API is designed around callbacks to handle
//! events.  However, this does not mesh well with our plugin framework here.  To resolve this,
//! this module translates the callbacks to a distinct Event enum.

use crate::{context::Context, log_event};
use serenity::all::{Message, Reaction, Ready};

/// A Discord event
pub enum Event {
    Ready(Ready),
    Message(Message),
    ReactionAdd(Reaction),
}

impl Event {
    // When an event occurs, iterate over all the plugins to see if any can/should handle it.
    pub async fn handle(self, ctx: Context<'_>) {
        for plugin in crate::plugin::plugins() {
            match plugin.handle(&ctx, &self).await {
                Ok(EventHandled::Yes) => return,
                Ok(EventHandled::No) => continue,
                Err(err) => log_event!("Error in plugin {}: {}", plugin.name(), err),
            }
        }
    }

    // Check if a message should be interpreted as a special bot command.
    //
    // These are typically prefixed with a semicolon, e.g. `;start buttons`.
    // Returns the message and the arguments following the command word.
    pub async fn bot_cmd(&self, ctx: &Context<'_>, cmd: &str) -> Option<(&Message, Vec<String>)> {
        let Event::Message(msg) = self else {
            return None;
        };

        let prefix = ctx.cfg.read().await.general.command_prefix.clone();
        let mut words = msg.content.split_ascii_whitespace();
        let name = words.next()?.strip_prefix(prefix.as_str())?;
        if name != cmd {
            return None;
        }

        Some((msg, words.map(str::to_owned).collect()))
    }
}

pub enum EventHandled {
    Yes,
    No,
}
