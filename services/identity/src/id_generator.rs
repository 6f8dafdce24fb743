use crate::config::{ConfigError, IdentifierConfig};
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashSet;

/// Generates short, URL-safe public identifiers
///
/// Symbols are drawn uniformly from the configured alphabet using the
/// operating system CSPRNG. Uniqueness is not checked here; the identity
/// table's unique index rejects collisions.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    alphabet: Vec<char>,
    size: usize,
}

impl IdGenerator {
    /// Create a generator, rejecting alphabets that would bias or break ids
    pub fn new(alphabet: &str, size: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "identifier.size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let symbols: Vec<char> = alphabet.chars().collect();
        if symbols.is_empty() {
            return Err(ConfigError::MissingRequired("identifier.alphabet".to_string()));
        }

        let distinct: HashSet<char> = symbols.iter().copied().collect();
        if distinct.len() != symbols.len() {
            return Err(ConfigError::InvalidValue {
                key: "identifier.alphabet".to_string(),
                message: "contains repeated symbols".to_string(),
            });
        }

        Ok(Self {
            alphabet: symbols,
            size,
        })
    }

    pub fn from_config(config: &IdentifierConfig) -> Result<Self, ConfigError> {
        Self::new(&config.alphabet, config.size)
    }

    /// Generate one identifier
    pub fn generate(&self) -> String {
        let mut rng = OsRng;
        (0..self.size)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect()
    }

    /// Generate `count` independent identifiers
    pub fn generate_batch(&self, count: usize) -> Vec<String> {
        (0..count).map(|_| self.generate()).collect()
    }
}
