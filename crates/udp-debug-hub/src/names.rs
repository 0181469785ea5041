// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client name generation.

use parking_lot::Mutex;

/// Source of candidate client names. Uniqueness is enforced by the coordinator.
pub trait NameSource: Send + Sync {
    fn next_name(&self) -> String;
}

const CONSONANTS: &[u8] = b"bcdfghjklmnprstvz";
const VOWELS: &[u8] = b"aeiou";
const MIN_SYLLABLES: usize = 2;
const MAX_SYLLABLES: usize = 5;

/// Pronounceable first names built from 2 to 5 consonant-vowel syllables.
pub struct SyllableNames {
    rng: Mutex<fastrand::Rng>,
}

impl SyllableNames {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    /// Deterministic sequence, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
        }
    }
}

impl Default for SyllableNames {
    fn default() -> Self {
        Self::new()
    }
}

impl NameSource for SyllableNames {
    fn next_name(&self) -> String {
        let mut rng = self.rng.lock();
        let syllables = rng.usize(MIN_SYLLABLES..=MAX_SYLLABLES);
        let mut name = String::with_capacity(syllables * 2);
        for i in 0..syllables {
            let consonant = CONSONANTS[rng.usize(..CONSONANTS.len())] as char;
            let vowel = VOWELS[rng.usize(..VOWELS.len())] as char;
            if i == 0 {
                name.push(consonant.to_ascii_uppercase());
            } else {
                name.push(consonant);
            }
            name.push(vowel);
        }
        name
    }
}
