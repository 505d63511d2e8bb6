use anyhow::{anyhow, Result};
use serenity::all::{ChannelId, MessageId, UserId};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
};
use tokio::io::AsyncReadExt;

const STATE_PATH_REL_HOME: &str = ".config/musebot/state.toml";

const DEFAULT_INTERVAL_MS: u64 = 30_000;

/// State which persists across sessions: the generator record and the
/// history of generated posts.
#[derive(Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PersistentState {
    pub generator: GeneratorState,
    pub posts: PostLog,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GeneratorState {
    /// Whether the generation cycle is currently scheduled.  Must only be
    /// true while `target_channel` is set.
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_channel: Option<ChannelId>,
    /// Time between generations, which is also the feedback window length.
    pub interval_ms: u64,
    pub voting_mode: VotingMode,
    /// Time-boxed prompt fragments submitted by users, keyed by submitter.
    pub prompts: HashMap<UserId, PromptEntry>,
}

impl Default for GeneratorState {
    fn default() -> Self {
        Self {
            active: false,
            target_channel: None,
            interval_ms: DEFAULT_INTERVAL_MS,
            voting_mode: VotingMode::Reactions,
            prompts: HashMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotingMode {
    Reactions,
    Buttons,
    Poll,
}

impl VotingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reactions" => Some(Self::Reactions),
            "buttons" => Some(Self::Buttons),
            "poll" => Some(Self::Poll),
            _ => None,
        }
    }
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct PromptEntry {
    pub text: String,
    pub start_unix: u64,
    pub duration_secs: u64,
}

impl PromptEntry {
    pub fn end_unix(&self) -> u64 {
        self.start_unix + self.duration_secs
    }

    pub fn expired(&self, now_unix: u64) -> bool {
        now_unix > self.end_unix()
    }
}

impl GeneratorState {
    /// Drop expired prompt entries and join the survivors into one
    /// generation prompt.  Returns None when no prompts are active.
    pub fn live_prompt(&mut self, now_unix: u64) -> Option<String> {
        self.prompts.retain(|_, entry| !entry.expired(now_unix));
        if self.prompts.is_empty() {
            return None;
        }

        // HashMap order is arbitrary; sort so the prompt is stable from one
        // tick to the next.
        let mut texts: Vec<&str> = self.prompts.values().map(|e| e.text.as_str()).collect();
        texts.sort_unstable();
        Some(texts.join(", "))
    }
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
pub struct PostLog(pub Vec<PostRecord>);

impl PostLog {
    pub fn push(&mut self, post: PostRecord) {
        self.0.push(post);
    }

    pub fn get_mut(&mut self, message_id: MessageId) -> Option<&mut PostRecord> {
        self.0.iter_mut().find(|p| p.message_id == message_id)
    }

    pub fn latest(&self) -> Option<&PostRecord> {
        self.0.last()
    }
}

/// One generated post.  Mutated only during its feedback window; afterwards
/// it is read-only history.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct PostRecord {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    pub image_url: String,
    pub created_unix: u64,
    pub upvotes: u32,
    pub downvotes: u32,
    /// Users who have cast a vote or reaction on this post.
    pub voters: HashSet<UserId>,
    /// Reaction-mode tally: emoji name to the users who reacted with it.
    pub reactions: HashMap<String, Vec<UserId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

impl PostRecord {
    pub fn new(
        message_id: MessageId,
        channel_id: ChannelId,
        prompt: String,
        seed: Option<String>,
        image_url: String,
        created_unix: u64,
    ) -> Self {
        Self {
            message_id,
            channel_id,
            prompt,
            seed,
            image_url,
            created_unix,
            upvotes: 0,
            downvotes: 0,
            voters: HashSet::new(),
            reactions: HashMap::new(),
        }
    }

    /// Returns false without touching the tallies when the user has
    /// already voted on this post.
    pub fn register_vote(&mut self, user: UserId, vote: Vote) -> bool {
        if !self.voters.insert(user) {
            return false;
        }

        match vote {
            Vote::Up => self.upvotes += 1,
            Vote::Down => self.downvotes += 1,
        }
        true
    }

    /// Replace the tally with a fresh snapshot of the live reaction state.
    /// Overwriting rather than accumulating guarantees that reactions
    /// removed during the window are not over-counted.
    pub fn apply_reaction_snapshot(&mut self, snapshot: HashMap<String, Vec<UserId>>) {
        self.voters = snapshot.values().flatten().copied().collect();
        self.reactions = snapshot;
    }
}

impl PersistentState {
    fn state_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(STATE_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    /// Load the state from disk, or start from defaults if no file exists
    /// yet.
    pub async fn load() -> Result<Self> {
        let path = Self::state_path()?;

        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(anyhow!(
                    "Could not open state at `{}`: {}",
                    path.to_string_lossy(),
                    e
                ))
            }
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents).await.map_err(|e| {
            anyhow!(
                "Could not read state at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let pstate: PersistentState = toml::from_str(&contents).map_err(|e| {
            anyhow!(
                "Could not parse state at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        Ok(pstate)
    }

    pub async fn save(&self) -> Result<()> {
        let path = Self::state_path()?;
        let pstate_str =
            toml::to_string_pretty(&self).map_err(|e| anyhow!("Could not serialize state: {}", e))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                anyhow!(
                    "Could not create directory `{}`: {}",
                    parent.to_string_lossy(),
                    e
                )
            })?;
        }

        // Create a temporary file in the same directory.
        let tmp_path = path.with_extension("toml.new");

        tokio::fs::write(&tmp_path, pstate_str).await.map_err(|e| {
            anyhow!(
                "Could not write state to temporary file `{}`: {}",
                tmp_path.to_string_lossy(),
                e
            )
        })?;

        // Atomically rename the temporary file over the target file.
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            anyhow!(
                "Could not rename temporary file `{}` to `{}`: {}",
                tmp_path.to_string_lossy(),
                path.to_string_lossy(),
                e
            )
        })?;

        Ok(())
    }

    /// Write the current state to disk only if no state file exists yet.
    /// Returns whether a file was created.
    pub async fn save_if_missing(&self) -> Result<bool> {
        let path = Self::state_path()?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post() -> PostRecord {
        PostRecord::new(
            MessageId::new(10),
            ChannelId::new(20),
            "a quiet harbor".to_string(),
            Some("42".to_string()),
            "https://img.example/1.png".to_string(),
            1_000,
        )
    }

    #[test]
    fn each_user_votes_at_most_once() {
        let mut post = sample_post();
        let users: Vec<UserId> = (1..=5).map(UserId::new).collect();

        assert!(post.register_vote(users[0], Vote::Up));
        assert!(post.register_vote(users[1], Vote::Up));
        assert!(post.register_vote(users[2], Vote::Down));
        assert!(post.register_vote(users[3], Vote::Up));
        assert!(post.register_vote(users[4], Vote::Down));

        // Re-votes change nothing, regardless of direction.
        assert!(!post.register_vote(users[0], Vote::Up));
        assert!(!post.register_vote(users[0], Vote::Down));
        assert!(!post.register_vote(users[2], Vote::Up));

        assert_eq!(post.upvotes, 3);
        assert_eq!(post.downvotes, 2);
        assert_eq!(post.upvotes + post.downvotes, users.len() as u32);
    }

    #[test]
    fn reaction_snapshot_overwrites_previous_tally() {
        let mut post = sample_post();

        let mut first = HashMap::new();
        first.insert("👍".to_string(), vec![UserId::new(1), UserId::new(2)]);
        first.insert("🔥".to_string(), vec![UserId::new(3)]);
        post.apply_reaction_snapshot(first);
        assert_eq!(post.voters.len(), 3);

        // User 2 removed their reaction before the window closed; the second
        // snapshot is the whole truth.
        let mut second = HashMap::new();
        second.insert("👍".to_string(), vec![UserId::new(1)]);
        post.apply_reaction_snapshot(second);

        assert_eq!(post.reactions.len(), 1);
        assert_eq!(post.reactions["👍"], vec![UserId::new(1)]);
        assert_eq!(post.voters, HashSet::from([UserId::new(1)]));
    }

    #[test]
    fn live_prompt_drops_expired_entries() {
        let mut gen = GeneratorState::default();
        gen.prompts.insert(
            UserId::new(1),
            PromptEntry {
                text: "neon city".to_string(),
                start_unix: 100,
                duration_secs: 60,
            },
        );
        gen.prompts.insert(
            UserId::new(2),
            PromptEntry {
                text: "heavy rain".to_string(),
                start_unix: 100,
                duration_secs: 600,
            },
        );

        // First entry expired at t=160; only the second survives.
        assert_eq!(gen.live_prompt(200), Some("heavy rain".to_string()));
        assert_eq!(gen.prompts.len(), 1);

        // Expiry is inclusive of the end instant.
        let mut gen = GeneratorState::default();
        gen.prompts.insert(
            UserId::new(1),
            PromptEntry {
                text: "neon city".to_string(),
                start_unix: 100,
                duration_secs: 60,
            },
        );
        assert_eq!(gen.live_prompt(160), Some("neon city".to_string()));
    }

    #[test]
    fn live_prompt_joins_in_stable_order() {
        let mut gen = GeneratorState::default();
        for (i, text) in ["zebra stripes", "amber light", "misty hills"].iter().enumerate() {
            gen.prompts.insert(
                UserId::new(i as u64 + 1),
                PromptEntry {
                    text: text.to_string(),
                    start_unix: 0,
                    duration_secs: 100,
                },
            );
        }

        assert_eq!(
            gen.live_prompt(50),
            Some("amber light, misty hills, zebra stripes".to_string())
        );
    }

    #[test]
    fn live_prompt_empty_when_nothing_active() {
        let mut gen = GeneratorState::default();
        assert_eq!(gen.live_prompt(0), None);

        gen.prompts.insert(
            UserId::new(1),
            PromptEntry {
                text: "old".to_string(),
                start_unix: 0,
                duration_secs: 1,
            },
        );
        assert_eq!(gen.live_prompt(100), None);
        assert!(gen.prompts.is_empty());
    }

    #[test]
    fn voting_mode_parses_known_names() {
        assert_eq!(VotingMode::parse("reactions"), Some(VotingMode::Reactions));
        assert_eq!(VotingMode::parse("Buttons"), Some(VotingMode::Buttons));
        assert_eq!(VotingMode::parse("POLL"), Some(VotingMode::Poll));
        assert_eq!(VotingMode::parse("stars"), None);
    }

    #[test]
    fn state_round_trips_through_toml() {
        let mut state = PersistentState::default();
        state.generator.active = true;
        state.generator.target_channel = Some(ChannelId::new(77));
        state.generator.voting_mode = VotingMode::Buttons;
        let mut post = sample_post();
        post.register_vote(UserId::new(5), Vote::Up);
        state.posts.push(post);

        let serialized = toml::to_string_pretty(&state).unwrap();
        let parsed: PersistentState = toml::from_str(&serialized).unwrap();

        assert!(parsed.generator.active);
        assert_eq!(parsed.generator.target_channel, Some(ChannelId::new(77)));
        assert_eq!(parsed.generator.voting_mode, VotingMode::Buttons);
        let post = parsed.posts.latest().unwrap();
        assert_eq!(post.message_id, MessageId::new(10));
        assert_eq!(post.upvotes, 1);
        assert!(post.voters.contains(&UserId::new(5)));
    }
}
