//! Adventurer names for the starter roster.
//!
//! Deterministic: the same stream always yields the same names.

use crate::rng::GuildRng;

pub fn adventurer_name(rng: &mut GuildRng) -> String {
    let given = rng.pick(GIVEN_NAMES).copied().unwrap_or("Nameless");
    let epithet = rng.pick(EPITHETS).copied().unwrap_or("the Unknown");
    format!("{given} {epithet}")
}

const GIVEN_NAMES: &[&str] = &[
    "Aldric", "Brenna", "Cassia", "Dorian", "Elspeth", "Fenwick", "Garrick", "Hilde",
    "Isolde", "Jorund", "Kestrel", "Lucan", "Marisol", "Nerys", "Osric", "Perrin",
    "Quillon", "Rowena", "Sigrun", "Tobias", "Ulric", "Vesna", "Wystan", "Yara",
];

const EPITHETS: &[&str] = &[
    "the Bold", "Ironhand", "the Quiet", "Stormborn", "of the Marches", "Ashwalker",
    "the Lucky", "Greycloak", "the Younger", "Thornheart", "the Wanderer", "Blackbriar",
];
