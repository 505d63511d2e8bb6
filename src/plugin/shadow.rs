//! Shadow reactions: predict which emoji a user would react with and react
//! on their behalf when they don't.
//!
//! Every unicode reaction a user adds to one of the bot's posts is
//! remembered.  When the next image is posted, each remembered user gets a
//! short grace period to react themselves; if they stay silent, the bot
//! builds a one-off badge (their avatar with the predicted emoji overlaid),
//! uploads it as a short-lived guild emoji, reacts with it, and tells the
//! user over DM.  This subsystem shares no state with the generation cycle;
//! it only watches the same message and reaction events.

use crate::{event::*, log_event, plugin::*};
use anyhow::{anyhow, Result};
use serenity::all::{
    CreateAttachment, GuildId, Message, Reaction, ReactionCollector, ReactionType, UserId,
};
use std::time::Duration;

/// How long a user gets to react on their own before the shadow steps in.
const REACTION_GRACE: Duration = Duration::from_secs(10);

const TWEMOJI_PNG_BASE: &str = "https://cdn.jsdelivr.net/gh/twemoji/twemoji@14.0.2/assets/72x72";

pub struct PluginShadow;

#[serenity::async_trait]
impl Plugin for PluginShadow {
    fn name(&self) -> &'static str {
        "shadow"
    }

    async fn usage(&self, _ctx: &Context<'_>) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
        if !ctx.cfg.read().await.shadow.enabled {
            return Ok(EventHandled::No);
        }

        match event {
            Event::ReactionAdd(reaction) => on_reaction(ctx, reaction).await,
            Event::Message(msg) => on_message(ctx, msg).await,
            _ => Ok(EventHandled::No),
        }
    }
}

async fn on_reaction(ctx: &Context<'_>, reaction: &Reaction) -> Result<EventHandled> {
    // Only reactions from humans on the bot's own posts matter.
    let Some(user_id) = reaction.user_id else {
        return Ok(EventHandled::No);
    };
    let user = user_id.to_user(ctx.cache_http).await?;
    if user.bot {
        return Ok(EventHandled::No);
    }
    let message = reaction.message(ctx.cache_http).await?;
    if message.author.id != ctx.cache.current_user().id {
        return Ok(EventHandled::No);
    }

    match &reaction.emoji {
        ReactionType::Custom { name: Some(name), .. }
            if *name == shadow_emoji_name(&user.name) =>
        {
            // The user adopted the reaction made in their name.
            log_event!("{} confirmed their shadow reaction", user.name);
        }
        ReactionType::Custom { name: Some(name), .. } if is_shadow_emoji(name) => {
            // Shadow reactions are single-use decorations, not open
            // invitations; reacting to someone else's gets undone.
            reaction.delete(ctx.cache_http).await?;
        }
        ReactionType::Unicode(emoji) => {
            ctx.vstate
                .write()
                .await
                .last_reactions
                .record(user_id, emoji.clone());
        }
        _ => {}
    }

    // Other plugins may also want to see reactions.
    Ok(EventHandled::No)
}

async fn on_message(ctx: &Context<'_>, msg: &Message) -> Result<EventHandled> {
    if msg.author.id != ctx.cache.current_user().id || !msg.content.starts_with("🎨") {
        return Ok(EventHandled::No);
    }
    let Some(guild_id) = msg.guild_id else {
        return Ok(EventHandled::No);
    };

    // Predictions were collected on the previous post; rotating to a new
    // source message empties the cache.
    let predicted = ctx.vstate.write().await.last_reactions.drain();

    for (user_id, emoji) in predicted {
        let discord = ctx.cache_http.clone();
        let message = msg.clone();

        tokio::spawn(async move {
            if let Err(err) = shadow_user(discord, message, guild_id, user_id, emoji).await {
                log_event!("Shadow reaction for {} failed: {}", user_id, err);
            }
        });
    }

    Ok(EventHandled::No)
}

async fn shadow_user(
    discord: serenity::all::Context,
    message: Message,
    guild_id: GuildId,
    user_id: UserId,
    emoji: String,
) -> Result<()> {
    // Give the user their grace period to react themselves.
    let reacted = ReactionCollector::new(&discord)
        .message_id(message.id)
        .author_id(user_id)
        .timeout(REACTION_GRACE)
        .await;
    if reacted.is_some() {
        return Ok(());
    }

    let member = guild_id.member(&discord, user_id).await?;
    let avatar = reqwest::get(member.face()).await?.bytes().await?;
    let glyph = fetch_twemoji(&emoji).await?;
    let badge = compose_badge(&avatar, &glyph)?;

    let name = shadow_emoji_name(&member.user.name);
    let image_data = CreateAttachment::bytes(badge, "shadow.png").to_base64();
    let guild_emoji = guild_id
        .create_emoji(&discord.http, &name, &image_data)
        .await?;
    message
        .react(&discord, ReactionType::from(guild_emoji.clone()))
        .await?;
    guild_id.delete_emoji(&discord.http, guild_emoji.id).await?;

    let dm = member.user.create_dm_channel(&discord).await?;
    dm.say(
        &discord.http,
        format!(
            "👤 Shadow Bot reacted with {} to {} for you.",
            emoji,
            message.link()
        ),
    )
    .await?;

    log_event!("Shadowed {} with {}", member.user.name, emoji);
    Ok(())
}

async fn fetch_twemoji(emoji: &str) -> Result<Vec<u8>> {
    let code = twemoji_codepoint(emoji);
    let url = format!("{}/{}.png", TWEMOJI_PNG_BASE, code);

    let response = reqwest::get(&url).await?;
    if !response.status().is_success() {
        return Err(anyhow!("No twemoji image for {} ({})", emoji, code));
    }

    Ok(response.bytes().await?.to_vec())
}

/// Twemoji file names are the hyphen-joined hex codepoints of the emoji,
/// without a trailing variation selector.
fn twemoji_codepoint(emoji: &str) -> String {
    let code = emoji
        .chars()
        .map(|c| format!("{:x}", c as u32))
        .collect::<Vec<_>>()
        .join("-");

    match code.strip_suffix("-fe0f") {
        Some(stripped) => stripped.to_owned(),
        None => code,
    }
}

/// Whether a custom emoji is one of the bot's own one-off shadow emojis,
/// as opposed to a guild emoji that happens to start with "shadow".
fn is_shadow_emoji(name: &str) -> bool {
    name.starts_with("shadow_")
}

/// Discord emoji names allow 2-32 word characters.  Dots are common in
/// usernames, so they get spelled out rather than dropped.
fn shadow_emoji_name(username: &str) -> String {
    let mut name = String::from("shadow_");
    for c in username.replace('.', "dot").chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            name.push(c);
        }
    }
    name.truncate(32);
    name
}

/// 128x128 badge: circular-cropped avatar in the top-left, emoji glyph in
/// the bottom-right.
fn compose_badge(avatar: &[u8], glyph: &[u8]) -> Result<Vec<u8>> {
    use image::{imageops, imageops::FilterType, DynamicImage, RgbaImage};

    let avatar = image::load_from_memory(avatar)?
        .resize_exact(96, 96, FilterType::Lanczos3)
        .to_rgba8();
    let avatar = circular_crop(avatar);
    let glyph = image::load_from_memory(glyph)?
        .resize_exact(64, 64, FilterType::Lanczos3)
        .to_rgba8();

    let mut canvas = RgbaImage::new(128, 128);
    imageops::overlay(&mut canvas, &avatar, 5, 5);
    imageops::overlay(&mut canvas, &glyph, 59, 59);

    let mut buffer = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas).write_to(&mut buffer, image::ImageOutputFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Zero out the alpha of every pixel outside the inscribed circle.
fn circular_crop(mut img: image::RgbaImage) -> image::RgbaImage {
    let (width, height) = img.dimensions();
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;
    let radius = center_x.min(center_y);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - center_x;
        let dy = y as f32 + 0.5 - center_y;
        if dx * dx + dy * dy > radius * radius {
            pixel.0[3] = 0;
        }
    }

    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn twemoji_codepoints_match_cdn_naming() {
        assert_eq!(twemoji_codepoint("👍"), "1f44d");
        assert_eq!(twemoji_codepoint("🔥"), "1f525");
        // Variation selector is dropped.
        assert_eq!(twemoji_codepoint("☺\u{fe0f}"), "263a");
        // Multi-codepoint emoji keep their joiners.
        assert_eq!(twemoji_codepoint("👁\u{200d}🗨"), "1f441-200d-1f5e8");
    }

    #[test]
    fn only_the_bots_shadow_emojis_are_recognized() {
        assert!(is_shadow_emoji("shadow_alice"));
        assert!(is_shadow_emoji(&shadow_emoji_name("foo.bar")));

        // A guild's own emoji that merely starts with "shadow" is not ours.
        assert!(!is_shadow_emoji("shadowfax"));
        assert!(!is_shadow_emoji("fire"));
    }

    #[test]
    fn shadow_names_are_discord_safe() {
        assert_eq!(shadow_emoji_name("alice"), "shadow_alice");
        assert_eq!(shadow_emoji_name("foo.bar"), "shadow_foodotbar");
        assert_eq!(shadow_emoji_name("weird-émoji!"), "shadow_weirdmoji");

        let long = shadow_emoji_name("averyveryverylongusernameindeed123456");
        assert_eq!(long.len(), 32);
        assert!(long.starts_with("shadow_"));
    }

    #[test]
    fn circular_crop_clears_corners_keeps_center() {
        let img = RgbaImage::from_pixel(96, 96, Rgba([10, 20, 30, 255]));
        let cropped = circular_crop(img);

        assert_eq!(cropped.get_pixel(0, 0).0[3], 0);
        assert_eq!(cropped.get_pixel(95, 0).0[3], 0);
        assert_eq!(cropped.get_pixel(0, 95).0[3], 0);
        assert_eq!(cropped.get_pixel(95, 95).0[3], 0);
        assert_eq!(cropped.get_pixel(48, 48).0[3], 255);
    }

    #[test]
    fn composed_badge_is_a_png() {
        let avatar = {
            let img = RgbaImage::from_pixel(32, 32, Rgba([200, 100, 50, 255]));
            let mut buffer = std::io::Cursor::new(Vec::new());
            image::DynamicImage::ImageRgba8(img)
                .write_to(&mut buffer, image::ImageOutputFormat::Png)
                .unwrap();
            buffer.into_inner()
        };
        let glyph = avatar.clone();

        let badge = compose_badge(&avatar, &glyph).unwrap();
        assert_eq!(&badge[..8], b"\x89PNG\r\n\x1a\n");
    }
}
