use crate::{config::Config, persistent_state::PersistentState, volatile_state::VolatileState};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Collection of data that is shared across events.  The locks are behind
/// `Arc` so long-lived tasks (the generation cycle, prompt expiry timers)
/// can hold clones past the lifetime of the event that spawned them.
pub struct Context<'a> {
    // Musebot's own context types
    pub cfg: &'a Arc<RwLock<Config>>,
    pub pstate: &'a Arc<RwLock<PersistentState>>,
    pub vstate: &'a Arc<RwLock<VolatileState>>,
    // Discord/Serenity context types
    pub cache: &'a Arc<serenity::all::Cache>,
    pub cache_http: &'a CacheHttp,
}

/// Many Serenity functions take a `impl CacheHttp` in order to first check the cache if the item
/// is available and fall back to an http request otherwise.  The most readily available type that
/// impl's this is named very differently in a way that could be confusing, and so we alias it.
pub type CacheHttp = serenity::all::Context;
