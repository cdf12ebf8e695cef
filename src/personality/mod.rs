//! Personalities and their append-only evolution history.
//!
//! A personality is the bot's base behavior profile: a name, a base prompt,
//! and an active flag of which exactly one is set across the store. Evolved
//! traits are layered on top of the base prompt through [`EvolutionLog`]
//! entries; the newest entry for the active personality is the effective
//! trait set. History is never edited — rollback and reset append new
//! entries.

pub mod evolution;
pub mod store;

pub use evolution::EvolutionManager;
pub use store::PersonalityStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configurable behavior profile. Exactly one is active at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Human-facing name.
    pub name: String,
    /// The prompt that defines the personality's base behavior.
    pub base_prompt: String,
    /// Whether this personality drives context assembly right now.
    pub is_active: bool,
    /// UTC creation time.
    pub created_at: DateTime<Utc>,
}

/// One append-only entry of a personality's trait history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionLog {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// The personality this entry belongs to.
    pub personality_id: String,
    /// Free-form trait text layered atop the base prompt. May be empty
    /// (a reset entry).
    pub traits: String,
    /// Why this entry was written (evolution, rollback, reset).
    pub reason: String,
    /// UTC commit time; newest entry wins trait resolution.
    pub created_at: DateTime<Utc>,
}

/// Partial update for [`PersonalityStore::update`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonalityUpdate {
    pub name: Option<String>,
    pub base_prompt: Option<String>,
}

/// Immutable view of the active personality taken at task start, so a
/// concurrent activate/evolve never partially affects an in-flight task.
#[derive(Debug, Clone)]
pub struct PersonaSnapshot {
    pub personality_id: String,
    pub name: String,
    pub base_prompt: String,
    /// Trait text of the newest evolution log, if any log exists.
    pub traits: Option<String>,
    /// Id of the newest evolution log, if any log exists.
    pub log_id: Option<String>,
}

impl PersonaSnapshot {
    /// The trait text to layer onto the base prompt, if there is any.
    /// Reset entries (empty traits) yield `None`.
    pub fn effective_traits(&self) -> Option<&str> {
        self.traits.as_deref().filter(|t| !t.trim().is_empty())
    }
}
