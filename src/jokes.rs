//! Joke collections and random selection.

use std::str::FromStr;
use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Curated dad jokes.
pub const DAD_JOKES: &[&str] = &[
    "Why don't scientists trust atoms? Because they make up everything!",
    "I'm reading a book about anti-gravity. It's impossible to put down!",
    "Why did the scarecrow win an award? He was outstanding in his field!",
    "I used to hate facial hair, but then it grew on me.",
    "Why don't eggs tell jokes? They'd crack each other up!",
    "I'm afraid for the calendar. Its days are numbered.",
    "What do you call a fake noodle? An impasta!",
    "Why did the bicycle fall over? Because it was two-tired!",
    "I only know 25 letters of the alphabet. I don't know y.",
    "What did the ocean say to the beach? Nothing, it just waved.",
];

/// Curated mom jokes.
pub const MOM_JOKES: &[&str] = &[
    "I brought you into this world, and I can take you out of it!",
    "Because I said so, that's why!",
    "If your friends jumped off a bridge, would you do it too?",
    "I'm not just talking to hear myself speak!",
    "Money doesn't grow on trees, you know!",
    "Don't make me turn this car around!",
    "You'll understand when you're older.",
    "I'm not your maid! Clean up after yourself!",
    "Close the door! Were you raised in a barn?",
    "If you can't say something nice, don't say anything at all.",
];

/// Kind of joke to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JokeKind {
    Dad,
    Mom,
}

impl JokeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JokeKind::Dad => "dad",
            JokeKind::Mom => "mom",
        }
    }

    fn collection(self) -> &'static [&'static str] {
        match self {
            JokeKind::Dad => DAD_JOKES,
            JokeKind::Mom => MOM_JOKES,
        }
    }
}

/// Returned when parsing an unknown joke kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid joke type: {0}. Must be 'dad' or 'mom'")]
pub struct InvalidJokeKind(pub String);

impl FromStr for JokeKind {
    type Err = InvalidJokeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dad" => Ok(JokeKind::Dad),
            "mom" => Ok(JokeKind::Mom),
            other => Err(InvalidJokeKind(other.to_string())),
        }
    }
}

/// Picks random jokes from the built-in collections.
///
/// A seeded generator produces a reproducible sequence, which the tests rely on.
#[derive(Debug)]
pub struct JokeGenerator {
    rng: Mutex<StdRng>,
}

impl JokeGenerator {
    /// Generator seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Generator with a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn dad_joke(&self) -> &'static str {
        self.joke(JokeKind::Dad)
    }

    pub fn mom_joke(&self) -> &'static str {
        self.joke(JokeKind::Mom)
    }

    /// Pick a joke of the given kind.
    pub fn joke(&self, kind: JokeKind) -> &'static str {
        let jokes = kind.collection();
        // A poisoned lock still holds a usable RNG
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        jokes.choose(&mut *rng).copied().unwrap_or(jokes[0])
    }
}

impl Default for JokeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collections_are_populated() {
        assert_eq!(DAD_JOKES.len(), 10);
        assert_eq!(MOM_JOKES.len(), 10);
    }

    #[test]
    fn test_jokes_come_from_the_right_collection() {
        let generator = JokeGenerator::new();
        for _ in 0..20 {
            assert!(DAD_JOKES.contains(&generator.dad_joke()));
            assert!(MOM_JOKES.contains(&generator.mom_joke()));
        }
    }

    #[test]
    fn test_seeded_generators_agree() {
        let a = JokeGenerator::with_seed(42);
        let b = JokeGenerator::with_seed(42);
        let left: Vec<_> = (0..5).map(|_| a.dad_joke()).collect();
        let right: Vec<_> = (0..5).map(|_| b.dad_joke()).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("dad".parse::<JokeKind>().unwrap(), JokeKind::Dad);
        assert_eq!("mom".parse::<JokeKind>().unwrap(), JokeKind::Mom);
        let err = "uncle".parse::<JokeKind>().unwrap_err();
        assert!(err.to_string().contains("uncle"));
    }

    #[test]
    fn test_joke_by_kind() {
        let generator = JokeGenerator::with_seed(7);
        assert!(MOM_JOKES.contains(&generator.joke(JokeKind::Mom)));
        assert_eq!(JokeKind::Dad.as_str(), "dad");
    }
}
