//! Racer name generation

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "slimy", "speedy", "sleepy", "brave", "shiny", "grumpy", "turbo", "mossy", "gentle",
    "cosmic", "soggy", "dapper", "zesty", "lucky", "sneaky", "mighty", "wobbly", "fancy",
    "rusty", "spiral", "velvet", "crunchy", "gloomy", "jolly",
];

const NOUNS: &[&str] = &[
    "shell", "slug", "garden", "leaf", "pebble", "comet", "drizzle", "trail", "mushroom",
    "clover", "puddle", "acorn", "lettuce", "fern", "nebula", "biscuit", "glider", "whisker",
    "rocket", "snail", "moss", "dewdrop",
];

/// Generate an `adjective-noun` racer name
pub fn generate_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("buggy");
    let noun = NOUNS.choose(rng).copied().unwrap_or("snail");
    format!("{adjective}-{noun}")
}
