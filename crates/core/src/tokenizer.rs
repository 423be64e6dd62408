use std::{
    collections::{BTreeMap, HashMap},
    fmt::Write as _,
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::prompt_tokens::{DEFAULT_CHAT_TEMPLATE, END_OF_TEXT, IM_END, IM_START, IMAGE_PLACEHOLDER};

pub const VOCAB_FILE: &str = "vocab.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Alternative spelling of the image token in some exports.
pub const ALT_IMAGE_TOKEN: &str = "<|image|>";
/// Image token id of the reference FastVLM vocabulary.
pub const FALLBACK_IMAGE_TOKEN_ID: u32 = 151_646;

/// Byte-level marker for a leading space.
const SPACE_MARKER: char = 'Ġ';

/// Byte-level word tokenizer backed by `vocab.json` and the special tokens of
/// `tokenizer_config.json`.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    special_tokens: BTreeMap<String, u32>,
    // Longest first so that overlapping specials match greedily.
    special_patterns: Vec<(String, u32)>,
    chat_template: String,
}

enum Piece<'t> {
    Special(u32),
    Text(&'t str),
}

impl Tokenizer {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let vocab_path = model_dir.join(VOCAB_FILE);
        let vocab = read_json(&vocab_path)?;
        let config_path = model_dir.join(TOKENIZER_CONFIG_FILE);
        let config = read_json(&config_path)?;
        let tokenizer = Self::from_json(&vocab, &config)?;
        info!(
            vocab = tokenizer.vocab_size(),
            special = tokenizer.special_tokens.len(),
            "tokenizer loaded"
        );
        Ok(tokenizer)
    }

    pub fn from_json(vocab: &Value, config: &Value) -> Result<Self> {
        let vocab = vocab
            .as_object()
            .context("vocabulary must be a JSON object of token -> id")?;
        let config = config
            .as_object()
            .context("tokenizer config must be a JSON object")?;

        let mut token_to_id = HashMap::with_capacity(vocab.len());
        let mut id_to_token = HashMap::with_capacity(vocab.len());
        for (token, id) in vocab {
            let Some(id) = id.as_u64().and_then(|id| u32::try_from(id).ok()) else {
                debug!(%token, "skipping vocabulary entry without an integer id");
                continue;
            };
            token_to_id.insert(token.clone(), id);
            id_to_token.insert(id, token.clone());
        }

        let mut special_tokens = BTreeMap::new();
        if let Some(added) = config.get("added_tokens_decoder").and_then(Value::as_object) {
            for (id, entry) in added {
                let Ok(id) = id.parse::<u32>() else {
                    warn!(%id, "skipping added token with a non-numeric id");
                    continue;
                };
                let Some(content) = entry.get("content").and_then(Value::as_str) else {
                    continue;
                };
                debug!(content, id, "special token");
                special_tokens.insert(content.to_string(), id);
                id_to_token.insert(id, content.to_string());
            }
        }

        let chat_template = match config.get("chat_template").and_then(Value::as_str) {
            Some(template) => template.to_string(),
            None => {
                info!("tokenizer config has no chat template; using the ChatML default");
                DEFAULT_CHAT_TEMPLATE.to_string()
            }
        };

        let mut special_patterns: Vec<(String, u32)> = special_tokens
            .iter()
            .filter(|(content, _)| !content.is_empty())
            .map(|(content, &id)| (content.clone(), id))
            .collect();
        special_patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Ok(Self {
            token_to_id,
            id_to_token,
            special_tokens,
            special_patterns,
            chat_template,
        })
    }

    /// Number of entries in `vocab.json`.
    pub fn vocab_size(&self) -> usize {
        self.token_to_id.len()
    }

    /// One past the largest id known to the vocabulary or the special tokens.
    pub fn full_vocab_size(&self) -> usize {
        self.id_to_token
            .keys()
            .max()
            .map_or(0, |&max| max as usize + 1)
    }

    pub fn chat_template(&self) -> &str {
        &self.chat_template
    }

    pub fn special_token(&self, content: &str) -> Option<u32> {
        self.special_tokens.get(content).copied()
    }

    pub fn special_tokens(&self) -> &BTreeMap<String, u32> {
        &self.special_tokens
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    /// Whether `id` names a vocabulary entry or a special token.
    pub fn is_known_id(&self, id: u32) -> bool {
        self.id_to_token.contains_key(&id)
    }

    pub fn image_token_id(&self) -> u32 {
        self.special_token(IMAGE_PLACEHOLDER)
            .or_else(|| self.special_token(ALT_IMAGE_TOKEN))
            .unwrap_or(FALLBACK_IMAGE_TOKEN_ID)
    }

    /// Token ids that end generation when picked.
    pub fn stop_token_ids(&self) -> Vec<u32> {
        [IM_END, END_OF_TEXT, IM_START]
            .into_iter()
            .filter_map(|content| self.special_token(content))
            .collect()
    }

    fn split_special<'t>(&self, text: &'t str) -> Vec<Piece<'t>> {
        let mut pieces = Vec::new();
        let mut start = 0;
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            if let Some((content, id)) = self
                .special_patterns
                .iter()
                .find(|(content, _)| rest.starts_with(content.as_str()))
            {
                if start < pos {
                    pieces.push(Piece::Text(&text[start..pos]));
                }
                pieces.push(Piece::Special(*id));
                pos += content.len();
                start = pos;
                continue;
            }
            pos += rest.chars().next().map_or(1, char::len_utf8);
        }
        if start < text.len() {
            pieces.push(Piece::Text(&text[start..]));
        }
        pieces
    }

    /// Splits `text` into token ids.
    ///
    /// Special tokens are cut out first and always map to their own id. The
    /// remaining text is split on whitespace; every word after the first gets
    /// the byte-level space marker. Words missing from the vocabulary fall back
    /// to one lookup per character, and characters still missing are dropped.
    pub fn tokenize(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        if self.token_to_id.is_empty() {
            warn!("vocabulary is empty; cannot tokenize");
            return ids;
        }

        let mut word_index = 0usize;
        let mut specials = 0usize;
        for piece in self.split_special(text) {
            match piece {
                Piece::Special(id) => {
                    ids.push(id);
                    specials += 1;
                    word_index += 1;
                }
                Piece::Text(chunk) => {
                    for word in chunk.split_whitespace() {
                        let word = if word_index == 0 {
                            word.to_string()
                        } else {
                            format!("{SPACE_MARKER}{word}")
                        };
                        word_index += 1;
                        self.push_word(&word, &mut ids);
                    }
                }
            }
        }
        debug!(tokens = ids.len(), specials, "tokenized text");
        ids
    }

    fn push_word(&self, word: &str, ids: &mut Vec<u32>) {
        if let Some(&id) = self.token_to_id.get(word) {
            ids.push(id);
            return;
        }
        let mut buf = [0u8; 4];
        for ch in word.chars() {
            let piece: &str = ch.encode_utf8(&mut buf);
            match self.token_to_id.get(piece) {
                Some(&id) => ids.push(id),
                None => warn!(piece, "unknown token piece"),
            }
        }
    }

    /// Turns ids back into text.
    ///
    /// Structural tokens are skipped and unknown ids render as `<unk_ID>`. The
    /// space marker becomes a plain space and surrounding whitespace is trimmed.
    pub fn detokenize(&self, ids: &[u32]) -> String {
        let skipped: Vec<u32> = [END_OF_TEXT, IM_END, IM_START, IMAGE_PLACEHOLDER]
            .into_iter()
            .filter_map(|content| self.special_token(content))
            .collect();

        let mut text = String::new();
        for &id in ids {
            if skipped.contains(&id) {
                continue;
            }
            match self.id_to_token.get(&id) {
                Some(token) => text.push_str(token),
                None => {
                    warn!(id, "unknown token id");
                    let _ = write!(text, "<unk_{id}>");
                }
            }
        }
        text.replace(SPACE_MARKER, " ")
            .trim_matches([' ', '\t', '\n', '\r'])
            .to_string()
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
