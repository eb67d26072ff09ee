//! Match Identifiers
//!
//! Short, human-shareable match codes: five upper-case alphanumerics.
//! Codes typed back by players are trimmed and upper-cased before lookup.

use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;

/// Length of a match code.
pub const MATCH_ID_LEN: usize = 5;

/// Characters a match code is drawn from.
pub const MATCH_ID_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A normalized match code.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatchId(String);

impl MatchId {
    /// Draw a fresh code. Uniqueness is the registry's job.
    pub fn generate(rng: &mut DeterministicRng) -> Self {
        let code = (0..MATCH_ID_LEN)
            .filter_map(|_| rng.choose(MATCH_ID_ALPHABET))
            .map(|&b| b as char)
            .collect();
        Self(code)
    }

    /// Parse a code typed by a player.
    ///
    /// Surrounding whitespace is ignored and letters are upper-cased.
    /// Returns `None` if the result is not a well-formed code.
    pub fn parse(raw: &str) -> Option<Self> {
        let code = raw.trim().to_ascii_uppercase();
        let well_formed = code.len() == MATCH_ID_LEN
            && code.bytes().all(|b| MATCH_ID_ALPHABET.contains(&b));
        well_formed.then_some(Self(code))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MatchId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("malformed match id {raw:?}"))
    }
}

impl From<MatchId> for String {
    fn from(id: MatchId) -> Self {
        id.0
    }
}

impl std::fmt::Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
