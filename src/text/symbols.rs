//! Symbol vocabulary for the spectrogram synthesizer.
//!
//! The vocabulary is closed: padding, an end-of-sequence marker, ASCII
//! letters, a handful of punctuation marks and ARPAbet phonemes. ARPAbet
//! tokens are written inside curly braces, e.g. `Turn left on {HH AW1 S T AH0 N} Street.`
//!
//! Lookup is lenient: anything outside the vocabulary is dropped instead of
//! failing the whole utterance.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Padding symbol, id 0.
pub const PAD: &str = "_";

/// End-of-sequence marker appended to every sequence.
pub const EOS: &str = "<eos>";

const CHARACTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!'\"(),-.:;? ";

const ARPABET_VOWELS: &[&str] = &[
    "AA", "AE", "AH", "AO", "AW", "AY", "EH", "ER", "EY", "IH", "IY", "OW", "OY", "UH", "UW",
];

const ARPABET_CONSONANTS: &[&str] = &[
    "B", "CH", "D", "DH", "F", "G", "HH", "JH", "K", "L", "M", "N", "NG", "P", "R", "S", "SH",
    "T", "TH", "V", "W", "Y", "Z", "ZH",
];

/// Prefix that keeps ARPAbet symbols distinct from plain letters.
const ARPABET_PREFIX: char = '@';

struct Vocabulary {
    symbols: Vec<String>,
    ids: HashMap<String, u32>,
}

fn vocabulary() -> &'static Vocabulary {
    static VOCAB: OnceLock<Vocabulary> = OnceLock::new();
    VOCAB.get_or_init(|| {
        let mut symbols = vec![PAD.to_string(), EOS.to_string()];
        symbols.extend(CHARACTERS.chars().map(String::from));
        for vowel in ARPABET_VOWELS {
            symbols.push(format!("{ARPABET_PREFIX}{vowel}"));
            for stress in 0..3 {
                symbols.push(format!("{ARPABET_PREFIX}{vowel}{stress}"));
            }
        }
        for consonant in ARPABET_CONSONANTS {
            symbols.push(format!("{ARPABET_PREFIX}{consonant}"));
        }

        let ids = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();
        Vocabulary { symbols, ids }
    })
}

/// Number of symbols in the vocabulary.
pub fn vocabulary_size() -> usize {
    vocabulary().symbols.len()
}

/// Id of a symbol, if it is part of the vocabulary.
pub fn symbol_id(symbol: &str) -> Option<u32> {
    vocabulary().ids.get(symbol).copied()
}

/// Id of the end-of-sequence marker.
pub fn eos_id() -> u32 {
    // EOS is always at index 1
    1
}

/// Whether an id belongs to an ARPAbet phoneme.
pub fn is_phoneme(id: u32) -> bool {
    vocabulary()
        .symbols
        .get(id as usize)
        .is_some_and(|s| s.starts_with(ARPABET_PREFIX))
}

/// Convert text into symbol ids, terminated by [`EOS`].
///
/// Characters outside the vocabulary and unknown ARPAbet tokens are skipped.
/// An unterminated `{` is treated as an unknown character.
pub fn text_to_sequence(text: &str) -> Vec<u32> {
    let mut sequence = Vec::with_capacity(text.len() + 1);
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(after_brace) = rest.strip_prefix('{')
            && let Some(close) = after_brace.find('}')
        {
            for token in after_brace[..close].split_whitespace() {
                let symbol = format!("{ARPABET_PREFIX}{}", token.to_ascii_uppercase());
                if let Some(id) = symbol_id(&symbol) {
                    sequence.push(id);
                }
            }
            rest = &after_brace[close + 1..];
            continue;
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            let mut buf = [0u8; 4];
            if let Some(id) = symbol_id(c.encode_utf8(&mut buf)) {
                sequence.push(id);
            }
        }
        rest = chars.as_str();
    }

    sequence.push(eos_id());
    sequence
}

/// Convert ids back into readable text.
///
/// EOS becomes a space, the result is trimmed and capitalized (first
/// character upper case, the rest lower case). ARPAbet ids render as their
/// bare phoneme name inside braces.
pub fn sequence_to_text(sequence: &[u32]) -> String {
    let vocab = vocabulary();
    let joined: String = sequence
        .iter()
        .filter_map(|&id| vocab.symbols.get(id as usize))
        .map(|symbol| {
            if symbol == EOS {
                " ".to_string()
            } else if let Some(phoneme) = symbol.strip_prefix(ARPABET_PREFIX) {
                format!("{{{phoneme}}}")
            } else {
                symbol.clone()
            }
        })
        .collect();

    let trimmed = joined.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}
