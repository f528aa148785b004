//! Text tokenization for the message classifier.
//!
//! Messages are normalized (NFC, lowercase), split into Treebank-style word
//! tokens, and each token is reduced to a base form. The default base form is
//! a WordNet-style noun lemma, so `"Running Dogs"` becomes `["running", "dog"]`.

use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use stop_words::{get, LANGUAGE};
use unicode_normalization::UnicodeNormalization;

use crate::error::{PipelineError, Result};

/// How tokens are reduced to a base form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalizer {
    /// WordNet-style noun lemmatization
    Lemma,
    /// Snowball English stemming
    Stem,
}

impl FromStr for Normalizer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lemma" | "lemmatize" => Ok(Self::Lemma),
            "stem" => Ok(Self::Stem),
            other => Err(format!("unknown normalizer {other:?}, expected \"lemma\" or \"stem\"")),
        }
    }
}

impl fmt::Display for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lemma => write!(f, "lemma"),
            Self::Stem => write!(f, "stem"),
        }
    }
}

/// Serializable tokenizer settings, stored alongside a trained model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerSettings {
    pub normalizer: Normalizer,
    pub remove_stopwords: bool,
    /// Texts longer than this many characters are truncated before tokenizing
    pub max_text_length: usize,
}

impl Default for TokenizerSettings {
    fn default() -> Self {
        Self {
            normalizer: Normalizer::Lemma,
            remove_stopwords: false,
            max_text_length: 10000,
        }
    }
}

/// Word tokenizer with lemmatization
pub struct Tokenizer {
    settings: TokenizerSettings,
    word_regex: Regex,
    stemmer: Stemmer,
    stopwords: HashSet<String>,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("settings", &self.settings)
            .field("stopwords", &self.stopwords.len())
            .finish_non_exhaustive()
    }
}

impl Tokenizer {
    /// Create a tokenizer for the given settings
    pub fn new(settings: TokenizerSettings) -> Result<Self> {
        // Words may carry inner hyphens, periods or apostrophes; anything else
        // that is not whitespace becomes a single-character token.
        let word_regex = Regex::new(r"\w+(?:[-'’.]\w+)*|[^\w\s]").map_err(|e| {
            PipelineError::InvalidConfig(format!("Failed to compile word regex: {e}"))
        })?;

        let stopwords: HashSet<String> = if settings.remove_stopwords {
            get(LANGUAGE::English).iter().map(ToString::to_string).collect()
        } else {
            HashSet::new()
        };

        Ok(Self {
            settings,
            word_regex,
            stemmer: Stemmer::create(Algorithm::English),
            stopwords,
        })
    }

    /// Settings this tokenizer was built with
    #[must_use]
    pub const fn settings(&self) -> &TokenizerSettings {
        &self.settings
    }

    /// Tokenize a message: normalize, lowercase, split into words, lemmatize, strip
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let text = truncate_chars(text, self.settings.max_text_length);
        let normalized = text.nfc().collect::<String>().to_lowercase();

        self.word_regex
            .find_iter(&normalized)
            .flat_map(|m| split_clitics(m.as_str()))
            .filter(|token| !self.stopwords.contains(token))
            .map(|token| self.normalize_token(&token).trim().to_string())
            .filter(|token| !token.is_empty())
            .collect()
    }

    /// Tokenize a batch of messages
    #[must_use]
    pub fn tokenize_all(&self, texts: &[String]) -> Vec<Vec<String>> {
        texts.iter().map(|text| self.tokenize(text)).collect()
    }

    fn normalize_token(&self, token: &str) -> String {
        match self.settings.normalizer {
            Normalizer::Lemma => lemmatize_noun(token),
            Normalizer::Stem => self.stemmer.stem(token).into_owned(),
        }
    }
}

/// Tokenize with the default settings
pub fn tokenize(text: &str) -> Result<Vec<String>> {
    Ok(Tokenizer::new(TokenizerSettings::default())?.tokenize(text))
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Split English clitics off a lowercase word token ("can't" -> "ca", "n't").
fn split_clitics(token: &str) -> Vec<String> {
    let token = token.replace('’', "'");
    if !token.contains('\'') {
        return vec![token];
    }

    if let Some(stem) = token.strip_suffix("n't") {
        if !stem.is_empty() {
            return vec![stem.to_string(), "n't".to_string()];
        }
    }

    for clitic in ["'s", "'ll", "'re", "'ve", "'d", "'m"] {
        if let Some(stem) = token.strip_suffix(clitic) {
            if !stem.is_empty() {
                return vec![stem.to_string(), clitic.to_string()];
            }
        }
    }

    vec![token]
}

/// Irregular plurals, checked before any suffix rule
const NOUN_EXCEPTIONS: &[(&str, &str)] = &[
    ("children", "child"),
    ("women", "woman"),
    ("feet", "foot"),
    ("teeth", "tooth"),
    ("geese", "goose"),
    ("mice", "mouse"),
    ("lice", "louse"),
    ("oxen", "ox"),
    ("data", "datum"),
    ("criteria", "criterion"),
    ("phenomena", "phenomenon"),
    ("analyses", "analysis"),
    ("crises", "crisis"),
    ("diagnoses", "diagnosis"),
    ("wolves", "wolf"),
    ("knives", "knife"),
    ("lives", "life"),
    ("leaves", "leaf"),
    ("wives", "wife"),
    ("halves", "half"),
    ("shelves", "shelf"),
    ("thieves", "thief"),
    ("loaves", "loaf"),
    ("calves", "calf"),
];

/// Words that look plural but are their own lemma
const NOUN_INVARIANTS: &[&str] = &[
    "news", "series", "species", "means", "physics", "mathematics", "politics",
    "economics", "measles", "diabetes", "thanks", "always", "perhaps", "does",
    "yes", "its", "his", "hers", "ours", "yours", "theirs", "whereas", "specimen",
    "abdomen", "omen", "regimen", "stamen", "clothes",
];

/// "-oes" plurals that keep their final "e"
const OES_KEEP_E: &[&str] = &["shoes", "toes", "canoes", "hoes", "oboes", "floes", "foes"];

/// Reduce a lowercase token to its noun lemma using WordNet-style detachment
/// rules. Without the WordNet dictionary the rules are guarded heuristically.
#[must_use]
pub fn lemmatize_noun(token: &str) -> String {
    if let Some((_, lemma)) = NOUN_EXCEPTIONS.iter().find(|(word, _)| *word == token) {
        return (*lemma).to_string();
    }

    if token.chars().count() < 4
        || NOUN_INVARIANTS.contains(&token)
        || !token.chars().all(char::is_alphanumeric)
    {
        return token.to_string();
    }

    if token.ends_with("ss") || token.ends_with("us") || token.ends_with("is") {
        return token.to_string();
    }

    if let Some(stem) = token.strip_suffix("men") {
        return format!("{stem}man");
    }

    if let Some(stem) = token.strip_suffix("ies") {
        // "cities" -> "city", but "ties" -> "tie"
        return if token.len() > 4 {
            format!("{stem}y")
        } else {
            format!("{stem}ie")
        };
    }

    for suffix in ["ches", "shes", "xes", "zes", "sses"] {
        if token.ends_with(suffix) {
            return token[..token.len() - 2].to_string();
        }
    }

    if token.ends_with("oes") && !OES_KEEP_E.contains(&token) {
        return token[..token.len() - 2].to_string();
    }

    if let Some(stem) = token.strip_suffix('s') {
        return stem.to_string();
    }

    token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lemmatizes_and_lowercases() {
        let tokens = tokenize("Running Dogs").expect("Failed to tokenize");
        assert_eq!(tokens, vec!["running", "dog"]);
    }

    #[test]
    fn test_tokenize_splits_punctuation_and_clitics() {
        let tokens = tokenize("We can't find water, please help!").expect("Failed to tokenize");
        assert_eq!(
            tokens,
            vec!["we", "ca", "n't", "find", "water", ",", "please", "help", "!"]
        );
    }

    #[test]
    fn test_lemmatize_noun_rules() {
        assert_eq!(lemmatize_noun("cities"), "city");
        assert_eq!(lemmatize_noun("churches"), "church");
        assert_eq!(lemmatize_noun("boxes"), "box");
        assert_eq!(lemmatize_noun("houses"), "house");
        assert_eq!(lemmatize_noun("firemen"), "fireman");
        assert_eq!(lemmatize_noun("volcanoes"), "volcano");
        assert_eq!(lemmatize_noun("shoes"), "shoe");
        assert_eq!(lemmatize_noun("children"), "child");
        assert_eq!(lemmatize_noun("glass"), "glass");
        assert_eq!(lemmatize_noun("virus"), "virus");
        assert_eq!(lemmatize_noun("news"), "news");
        assert_eq!(lemmatize_noun("gas"), "gas");
    }

    #[test]
    fn test_stem_normalizer() {
        let tokenizer = Tokenizer::new(TokenizerSettings {
            normalizer: Normalizer::Stem,
            ..TokenizerSettings::default()
        })
        .expect("Failed to create tokenizer");

        assert_eq!(tokenizer.tokenize("Running Dogs"), vec!["run", "dog"]);
    }

    #[test]
    fn test_stopword_removal() {
        let tokenizer = Tokenizer::new(TokenizerSettings {
            remove_stopwords: true,
            ..TokenizerSettings::default()
        })
        .expect("Failed to create tokenizer");

        let tokens = tokenizer.tokenize("this is a sample sentence");
        assert!(!tokens.contains(&"this".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(tokens.contains(&"sample".to_string()));
    }

    #[test]
    fn test_max_text_length_truncates() {
        let tokenizer = Tokenizer::new(TokenizerSettings {
            max_text_length: 5,
            ..TokenizerSettings::default()
        })
        .expect("Failed to create tokenizer");

        assert_eq!(tokenizer.tokenize("water food shelter"), vec!["water"]);
    }
}
