//! Console password generation.
//!
//! Characters that are easy to confuse when read off a screen (`0 O o 1 l I`,
//! `|`) and characters that need quoting in shells (quotes, backslash, backtick,
//! space) are never emitted.

use rand::{rngs::OsRng, seq::SliceRandom, Rng};

const LOWER: &[u8] = b"abcdefghijkmnpqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"~!@#$%^&*()_+-=[]{}:;<>,.?/";

/// Shortest password the policy will produce.
pub const MIN_LENGTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    #[error("length {length} is below the minimum of {min}")]
    TooShort { length: usize, min: usize },
    #[error("{digits} digits + {symbols} symbols leave no room for upper and lower case in {length} characters")]
    ClassesExceedLength { length: usize, digits: usize, symbols: usize },
    #[error("cannot draw {wanted} distinct characters from a pool of {pool}")]
    PoolExhausted { wanted: usize, pool: usize },
}

/// Composition rules for generated passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub length: usize,
    /// Exact number of digits.
    pub digits: usize,
    /// Exact number of symbols.
    pub symbols: usize,
    pub allow_repeat: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self { Self { length: MIN_LENGTH, digits: 3, symbols: 3, allow_repeat: true } }
}

impl PasswordPolicy {
    pub fn validate(&self) -> Result<(), PasswordError> {
        if self.length < MIN_LENGTH {
            return Err(PasswordError::TooShort { length: self.length, min: MIN_LENGTH });
        }
        if self.digits + self.symbols + 2 > self.length {
            return Err(PasswordError::ClassesExceedLength { length: self.length, digits: self.digits, symbols: self.symbols });
        }
        if !self.allow_repeat {
            let letters = self.length - self.digits - self.symbols;
            for (wanted, pool) in [(self.digits, DIGITS.len()), (self.symbols, SYMBOLS.len()), (letters, LOWER.len() + UPPER.len())] {
                if wanted > pool {
                    return Err(PasswordError::PoolExhausted { wanted, pool });
                }
            }
        }
        Ok(())
    }

    /// Draw a password from the OS CSPRNG.
    pub fn generate(&self) -> Result<String, PasswordError> {
        self.validate()?;
        let letters: Vec<u8> = LOWER.iter().chain(UPPER.iter()).copied().collect();
        let mut used: Vec<u8> = Vec::with_capacity(self.length);
        self.draw(LOWER, 1, &mut used);
        self.draw(UPPER, 1, &mut used);
        self.draw(DIGITS, self.digits, &mut used);
        self.draw(SYMBOLS, self.symbols, &mut used);
        let rest = self.length - used.len();
        self.draw(&letters, rest, &mut used);
        used.shuffle(&mut OsRng);
        Ok(used.into_iter().map(char::from).collect())
    }

    fn draw(&self, pool: &[u8], n: usize, out: &mut Vec<u8>) {
        let mut taken = 0;
        while taken < n {
            let c = pool[OsRng.gen_range(0..pool.len())];
            if !self.allow_repeat && out.contains(&c) { continue; }
            out.push(c);
            taken += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(s: &str, pool: &[u8]) -> usize { s.bytes().filter(|b| pool.contains(b)).count() }

    #[test]
    fn default_policy_composition() {
        for _ in 0..50 {
            let p = PasswordPolicy::default().generate().unwrap();
            assert_eq!(p.len(), 20);
            assert_eq!(count(&p, DIGITS), 3);
            assert_eq!(count(&p, SYMBOLS), 3);
            assert!(count(&p, LOWER) >= 1);
            assert!(count(&p, UPPER) >= 1);
            assert!(!p.chars().any(|c| "0Oo1lI|'\"`\\ ".contains(c)), "ambiguous char in {}", p);
        }
    }

    #[test]
    fn no_repeat_policy_yields_distinct_chars() {
        let policy = PasswordPolicy { allow_repeat: false, ..Default::default() };
        let p = policy.generate().unwrap();
        let mut chars: Vec<char> = p.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        assert_eq!(chars.len(), 20);
    }

    #[test]
    fn rejects_weak_or_impossible_policies() {
        let short = PasswordPolicy { length: 12, ..Default::default() };
        assert!(matches!(short.generate(), Err(PasswordError::TooShort { .. })));
        let crowded = PasswordPolicy { length: 20, digits: 10, symbols: 9, allow_repeat: true };
        assert!(matches!(crowded.validate(), Err(PasswordError::ClassesExceedLength { .. })));
        let exhausted = PasswordPolicy { length: 24, digits: 9, symbols: 3, allow_repeat: false };
        assert!(matches!(exhausted.validate(), Err(PasswordError::PoolExhausted { wanted: 9, .. })));
    }

    #[test]
    fn passwords_differ() {
        let policy = PasswordPolicy::default();
        assert_ne!(policy.generate().unwrap(), policy.generate().unwrap());
    }
}
