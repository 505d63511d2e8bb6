//! The recurring generate → post → collect feedback → tally loop.
//!
//! One spawned task per active generator.  Each tick re-reads the generator
//! record, so a stop command is honored at the next tick boundary; a window
//! already in flight completes first.

use crate::{
    config::Config,
    context,
    helper::now_unix,
    inference::InferenceRequest,
    log_event,
    logging::AsyncPrintColor,
    persistent_state::{PersistentState, PostRecord, Vote, VotingMode},
    volatile_state::VolatileState,
};
use anyhow::Result;
use serenity::all::{
    ButtonStyle, ChannelId, ComponentInteractionCollector, CreateActionRow, CreateAttachment,
    CreateButton, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
    EditMessage, Message, ReactionType, UserId,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;

pub struct Cycle {
    cfg: Arc<RwLock<Config>>,
    pstate: Arc<RwLock<PersistentState>>,
    vstate: Arc<RwLock<VolatileState>>,
    discord: serenity::all::Context,
}

impl Cycle {
    /// Spawn the cycle task.  The caller must have claimed the volatile
    /// cycle guard first; the task releases it when it halts.
    pub fn spawn(ctx: &context::Context<'_>) {
        let cycle = Cycle {
            cfg: ctx.cfg.clone(),
            pstate: ctx.pstate.clone(),
            vstate: ctx.vstate.clone(),
            discord: ctx.cache_http.clone(),
        };

        tokio::spawn(async move { cycle.run().await });
    }

    async fn run(self) {
        loop {
            // Tick boundary: re-read the generator record so stop commands
            // and config changes are observed between iterations.
            let tick = {
                let mut pstate = self.pstate.write().await;
                let generator = &mut pstate.generator;
                if !generator.active {
                    None
                } else if let Some(channel) = generator.target_channel {
                    Some((
                        channel,
                        Duration::from_millis(generator.interval_ms.max(1)),
                        generator.voting_mode,
                    ))
                } else {
                    // Should not happen: start refuses to activate without a
                    // channel.  Deactivate rather than spin.
                    generator.active = false;
                    if let Err(err) = pstate.save().await {
                        log_event!("Failed to persist generator halt: {}", err);
                    }
                    None
                }
            };

            let Some((channel, window, mode)) = tick else {
                break;
            };

            if let Err(err) = self.iteration(channel, window, mode).await {
                log_event!("Generation iteration failed: {}", err);
                // The schedule survives a failed iteration; wait out the
                // interval before trying again.
                tokio::time::sleep(window).await;
            }
        }

        self.vstate.write().await.cycle.release();
        log_event!("Generator halted");
    }

    /// One pass of generate, post, collect, tally.
    async fn iteration(&self, channel: ChannelId, window: Duration, mode: VotingMode) -> Result<()> {
        let prompt = self.next_prompt(mode).await;
        let inference_url = self.cfg.read().await.inference.url.clone();
        let response = InferenceRequest::new(&prompt).post(&inference_url).await?;

        let post = self
            .send_post(channel, &response.image_url, mode == VotingMode::Buttons)
            .await?;
        log_event!(
            "Posted generation to \"{}\" (prompt: {})",
            channel.color(&self.discord.http).await,
            prompt,
        );

        let record = PostRecord::new(
            post.id,
            channel,
            prompt,
            response.seed.map(|s| s.to_string()),
            response.image_url,
            now_unix(),
        );
        {
            let mut pstate = self.pstate.write().await;
            pstate.posts.push(record);
            if let Err(err) = pstate.save().await {
                log_event!("Failed to persist new post: {}", err);
            }
        }

        match mode {
            VotingMode::Buttons => self.collect_votes(post, window).await,
            // Poll voting is rejected at the start command; if a state file
            // claims it anyway, fall back to the reaction snapshot.
            VotingMode::Reactions | VotingMode::Poll => {
                self.snapshot_reactions(post, window).await
            }
        }
    }

    /// Build the prompt for the next generation from the active user
    /// prompts, biased in vote mode toward a liked previous post.
    async fn next_prompt(&self, mode: VotingMode) -> String {
        let mut pstate = self.pstate.write().await;
        let fresh = match pstate.generator.live_prompt(now_unix()) {
            Some(prompt) => prompt,
            None => self.cfg.read().await.inference.default_prompt.clone(),
        };

        if mode == VotingMode::Buttons {
            biased_prompt(pstate.posts.latest(), fresh)
        } else {
            fresh
        }
    }

    async fn send_post(&self, channel: ChannelId, image_url: &str, buttons: bool) -> Result<Message> {
        let attachment = CreateAttachment::url(&self.discord.http, image_url).await?;
        let mut message = CreateMessage::new()
            .content("🎨 New generation")
            .add_file(attachment);
        if buttons {
            message = message.components(vec![vote_buttons(0, 0, false)]);
        }

        channel
            .send_message(&self.discord.http, message)
            .await
            .map_err(Into::into)
    }

    /// Button sub-mode: accept upvote/downvote interactions on this post for
    /// the length of the window, then grey the buttons out with the final
    /// tally.
    async fn collect_votes(&self, post: Message, window: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + window;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            let Some(interaction) = ComponentInteractionCollector::new(&self.discord)
                .message_id(post.id)
                .timeout(remaining)
                .filter(|i| matches!(i.data.custom_id.as_str(), "upvote" | "downvote"))
                .await
            else {
                break;
            };

            let vote = match interaction.data.custom_id.as_str() {
                "upvote" => Vote::Up,
                _ => Vote::Down,
            };
            let voter = interaction.user.id;

            let tally = {
                let mut pstate = self.pstate.write().await;
                let Some(record) = pstate.posts.get_mut(post.id) else {
                    log_event!("No post record for message {}; ignoring vote", post.id);
                    continue;
                };

                if record.register_vote(voter, vote) {
                    let tally = (record.upvotes, record.downvotes);
                    if let Err(err) = pstate.save().await {
                        log_event!("Failed to persist vote: {}", err);
                    }
                    Some(tally)
                } else {
                    None
                }
            };

            let response = match tally {
                Some((up, down)) => {
                    log_event!(
                        "Vote from {} on {}: {} up, {} down",
                        voter.color(&self.discord.http).await,
                        post.id,
                        up,
                        down,
                    );
                    CreateInteractionResponse::UpdateMessage(
                        CreateInteractionResponseMessage::new()
                            .components(vec![vote_buttons(up, down, false)]),
                    )
                }
                None => CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("You have already voted on this image.")
                        .ephemeral(true),
                ),
            };

            if let Err(err) = interaction
                .create_response(&self.discord.http, response)
                .await
            {
                log_event!("Failed to answer vote interaction: {}", err);
            }
        }

        let (up, down) = {
            let mut pstate = self.pstate.write().await;
            match pstate.posts.get_mut(post.id) {
                Some(record) => (record.upvotes, record.downvotes),
                None => (0, 0),
            }
        };

        let mut post = post;
        post.edit(
            &self.discord,
            EditMessage::new().components(vec![vote_buttons(up, down, true)]),
        )
        .await?;
        log_event!("Vote window closed on {}: {} up, {} down", post.id, up, down);

        Ok(())
    }

    /// Reaction sub-mode: no live collector.  Sleep out the window, then
    /// snapshot the full reaction state in one pass so removed reactions are
    /// never over-counted.
    async fn snapshot_reactions(&self, post: Message, window: Duration) -> Result<()> {
        tokio::time::sleep(window).await;

        // The message object from send time is stale; re-fetch it for the
        // live reaction state.
        let message = post.channel_id.message(&self.discord, post.id).await?;

        let mut snapshot: HashMap<String, Vec<UserId>> = HashMap::new();
        for reaction in &message.reactions {
            let mut reactors: Vec<UserId> = Vec::new();
            let mut cursor: Option<UserId> = None;
            loop {
                let page: Vec<UserId> = message
                    .reaction_users(
                        &self.discord.http,
                        reaction.reaction_type.clone(),
                        Some(REACTION_PAGE as u8),
                        cursor,
                    )
                    .await?
                    .into_iter()
                    .map(|u| u.id)
                    .collect();
                cursor = page_cursor(&page);
                reactors.extend(page);
                if cursor.is_none() {
                    break;
                }
            }
            snapshot.insert(emoji_name(&reaction.reaction_type), reactors);
        }

        let summary = summarize(&snapshot);
        {
            let mut pstate = self.pstate.write().await;
            match pstate.posts.get_mut(post.id) {
                Some(record) => {
                    record.apply_reaction_snapshot(snapshot);
                    if let Err(err) = pstate.save().await {
                        log_event!("Failed to persist reaction tally: {}", err);
                    }
                }
                None => log_event!("No post record for message {}; dropping tally", post.id),
            }
        }

        message
            .reply(&self.discord, format!("Reactions received: {}", summary))
            .await?;
        message.delete_reactions(&self.discord.http).await?;
        log_event!("Reaction window closed on {}: {}", post.id, summary);

        Ok(())
    }
}

/// Discord returns reactors in pages of at most 100.
const REACTION_PAGE: usize = 100;

/// Cursor for the next page of reactors, or None when a short page marks
/// the end.
fn page_cursor(page: &[UserId]) -> Option<UserId> {
    if page.len() < REACTION_PAGE {
        None
    } else {
        page.last().copied()
    }
}

/// Vote mode keeps riding a liked direction: a previous post with at least
/// one vote and no downvote majority contributes its prompt again.  In every
/// other case (first post, vote tie at zero, downvoted post) the freshly
/// assembled prompt takes over.
fn biased_prompt(previous: Option<&PostRecord>, fresh: String) -> String {
    match previous {
        Some(p) if p.upvotes + p.downvotes > 0 && p.upvotes >= p.downvotes => p.prompt.clone(),
        _ => fresh,
    }
}

fn vote_buttons(up: u32, down: u32, disabled: bool) -> CreateActionRow {
    let style = |live| if disabled { ButtonStyle::Secondary } else { live };

    CreateActionRow::Buttons(vec![
        CreateButton::new("upvote")
            .label(format!("👍 ({})", up))
            .style(style(ButtonStyle::Success))
            .disabled(disabled),
        CreateButton::new("downvote")
            .label(format!("👎 ({})", down))
            .style(style(ButtonStyle::Danger))
            .disabled(disabled),
    ])
}

/// The plain emoji name, matching how tallies are keyed in the post store.
fn emoji_name(reaction: &ReactionType) -> String {
    match reaction {
        ReactionType::Unicode(s) => s.clone(),
        ReactionType::Custom { name, .. } => name.clone().unwrap_or_default(),
        other => other.to_string(),
    }
}

fn summarize(snapshot: &HashMap<String, Vec<UserId>>) -> String {
    if snapshot.is_empty() {
        return "none".to_string();
    }

    let mut parts: Vec<String> = snapshot
        .iter()
        .map(|(emoji, users)| format!("{} x{}", emoji, users.len()))
        .collect();
    parts.sort_unstable();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenity::all::{ChannelId, MessageId};

    fn post_with_votes(prompt: &str, up: u32, down: u32) -> PostRecord {
        let mut post = PostRecord::new(
            MessageId::new(1),
            ChannelId::new(2),
            prompt.to_string(),
            None,
            "https://img.example/1.png".to_string(),
            0,
        );
        post.upvotes = up;
        post.downvotes = down;
        post
    }

    #[test]
    fn liked_post_carries_its_prompt_forward() {
        let previous = post_with_votes("neon city", 3, 2);
        assert_eq!(
            biased_prompt(Some(&previous), "fresh".to_string()),
            "neon city"
        );

        // Ties count as liked.
        let tied = post_with_votes("neon city", 2, 2);
        assert_eq!(biased_prompt(Some(&tied), "fresh".to_string()), "neon city");
    }

    #[test]
    fn downvoted_or_unvoted_post_falls_back_to_fresh_prompt() {
        let disliked = post_with_votes("neon city", 1, 3);
        assert_eq!(biased_prompt(Some(&disliked), "fresh".to_string()), "fresh");

        let unvoted = post_with_votes("neon city", 0, 0);
        assert_eq!(biased_prompt(Some(&unvoted), "fresh".to_string()), "fresh");

        assert_eq!(biased_prompt(None, "fresh".to_string()), "fresh");
    }

    #[test]
    fn summarize_sorts_and_counts() {
        let mut snapshot = HashMap::new();
        snapshot.insert("🔥".to_string(), vec![UserId::new(1)]);
        snapshot.insert("👍".to_string(), vec![UserId::new(1), UserId::new(2)]);

        assert_eq!(summarize(&snapshot), "👍 x2, 🔥 x1");
        assert_eq!(summarize(&HashMap::new()), "none");
    }

    #[test]
    fn reactor_pages_end_on_a_short_page() {
        let full: Vec<UserId> = (1..=100).map(UserId::new).collect();
        assert_eq!(page_cursor(&full), Some(UserId::new(100)));

        // A short (or empty) page is the last one.
        let short: Vec<UserId> = (1..=3).map(UserId::new).collect();
        assert_eq!(page_cursor(&short), None);
        assert_eq!(page_cursor(&[]), None);
    }

    #[test]
    fn emoji_name_unwraps_reaction_types() {
        assert_eq!(emoji_name(&ReactionType::Unicode("👍".to_string())), "👍");

        let custom = ReactionType::Custom {
            animated: false,
            id: serenity::all::EmojiId::new(5),
            name: Some("shadow_alice".to_string()),
        };
        assert_eq!(emoji_name(&custom), "shadow_alice");
    }
}
