//! Character-grid OCR output decoding
//!
//! The plate OCR model emits one class distribution per character slot. The
//! axis order of that grid is not fixed across exports, so
//! [`classify_slot_layout`] inspects the shape before decoding.

use crate::session::ModelOutput;
use common::scans::DecodedText;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Digits, uppercase letters and the pad symbol
pub const DEFAULT_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_";
pub const DEFAULT_PAD: char = '_';
pub const DEFAULT_SLOTS: usize = 9;

/// Symbols indexed by OCR class id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alphabet {
    symbols: Vec<char>,
    pad: char,
}

impl Alphabet {
    /// Fails when the pad symbol is not part of `symbols` or a symbol repeats
    pub fn new(symbols: &str, pad: char) -> Result<Self, String> {
        let symbols: Vec<char> = symbols.chars().collect();
        if !symbols.contains(&pad) {
            return Err(format!("pad symbol '{}' is not in the alphabet", pad));
        }
        for (i, c) in symbols.iter().enumerate() {
            if symbols[..i].contains(c) {
                return Err(format!("symbol '{}' appears more than once", c));
            }
        }
        Ok(Self { symbols, pad })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn pad(&self) -> char {
        self.pad
    }

    pub fn symbol(&self, class: usize) -> Option<char> {
        self.symbols.get(class).copied()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_ALPHABET.chars().collect(),
            pad: DEFAULT_PAD,
        }
    }
}

/// Axis order of an OCR output grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLayout {
    /// `[.., slots, classes]`: slot outer, class inner
    SlotsFirst,
    /// `[.., classes, slots]`: class outer, slot inner
    ClassesFirst,
}

/// Classify an OCR output by locating the alphabet-sized axis.
///
/// `None` means neither the last axis nor an earlier one matches the alphabet.
pub fn classify_slot_layout(shape: &[usize], alphabet_len: usize) -> Option<SlotLayout> {
    let (&last, leading) = shape.split_last()?;
    if leading.is_empty() {
        return None;
    }

    if last == alphabet_len {
        Some(SlotLayout::SlotsFirst)
    } else if leading.contains(&alphabet_len) {
        Some(SlotLayout::ClassesFirst)
    } else {
        None
    }
}

/// Argmax class and its softmax probability for one slot
fn decode_slot(scores: impl Iterator<Item = f32> + Clone) -> (usize, f32) {
    let (best, max) = scores
        .clone()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });

    let sum: f32 = scores.map(|s| (s - max).exp()).sum();
    (best, 1.0 / sum)
}

/// Decode a slot grid into text and a mean confidence percentage.
///
/// Pad slots emit no character but still count toward the confidence. When
/// the shape matches no known layout, the buffer is read slot-major with
/// `expected_slots` slots.
pub fn decode_slots(output: &ModelOutput, alphabet: &Alphabet, expected_slots: usize) -> DecodedText {
    let classes = alphabet.len();
    let shape = output.shape.as_slice();
    let capacity = if classes == 0 { 0 } else { output.data.len() / classes };

    let (layout, slots) = match classify_slot_layout(shape, classes) {
        Some(SlotLayout::SlotsFirst) => (SlotLayout::SlotsFirst, shape[shape.len() - 2]),
        Some(SlotLayout::ClassesFirst) => (SlotLayout::ClassesFirst, shape[shape.len() - 1]),
        None => {
            warn!(
                shape = ?shape,
                alphabet = classes,
                expected_slots,
                "OCR output shape matches no slot layout, reading slot-major"
            );
            (SlotLayout::SlotsFirst, expected_slots)
        }
    };
    let slots = slots.min(capacity);

    let value = |slot: usize, class: usize| match layout {
        SlotLayout::SlotsFirst => output.data[slot * classes + class],
        SlotLayout::ClassesFirst => output.data[class * slots + slot],
    };

    let mut text = String::new();
    let mut confidence_sum = 0.0f32;

    for slot in 0..slots {
        let (class, confidence) = decode_slot((0..classes).map(|c| value(slot, c)));
        confidence_sum += confidence;

        if let Some(symbol) = alphabet.symbol(class) {
            if symbol != alphabet.pad() {
                text.push(symbol);
            }
        }
    }

    let confidence = (slots > 0).then(|| confidence_sum / slots as f32 * 100.0);

    DecodedText { text, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Slot-major logits: `margin` for the wanted class, 0 elsewhere
    fn slot_logits(alphabet: &Alphabet, text: &str, margin: f32) -> Vec<f32> {
        let mut data = Vec::new();
        for wanted in text.chars() {
            for class in 0..alphabet.len() {
                let hit = alphabet.symbol(class) == Some(wanted);
                data.push(if hit { margin } else { 0.0 });
            }
        }
        data
    }

    fn transpose(data: &[f32], slots: usize, classes: usize) -> Vec<f32> {
        let mut out = vec![0.0; data.len()];
        for s in 0..slots {
            for c in 0..classes {
                out[c * slots + s] = data[s * classes + c];
            }
        }
        out
    }

    #[test]
    fn test_default_alphabet() {
        let alphabet = Alphabet::default();
        assert_eq!(alphabet.len(), 37);
        assert_eq!(alphabet.symbol(0), Some('0'));
        assert_eq!(alphabet.symbol(10), Some('A'));
        assert_eq!(alphabet.symbol(36), Some('_'));
        assert_eq!(alphabet.symbol(37), None);
    }

    #[test]
    fn test_alphabet_validation() {
        assert!(Alphabet::new("ABC", '_').is_err());
        assert!(Alphabet::new("AAB_", '_').is_err());
        assert!(Alphabet::new("AB_", '_').is_ok());
    }

    #[test]
    fn test_classify_slot_layout() {
        assert_eq!(classify_slot_layout(&[1, 9, 37], 37), Some(SlotLayout::SlotsFirst));
        assert_eq!(classify_slot_layout(&[9, 37], 37), Some(SlotLayout::SlotsFirst));
        assert_eq!(classify_slot_layout(&[1, 37, 9], 37), Some(SlotLayout::ClassesFirst));
        assert_eq!(classify_slot_layout(&[1, 333], 37), None);
        assert_eq!(classify_slot_layout(&[37], 37), None);
        assert_eq!(classify_slot_layout(&[], 37), None);
    }

    #[test]
    fn test_decode_slots_first() {
        let alphabet = Alphabet::default();
        let output = ModelOutput {
            shape: vec![1, 7, 37],
            data: slot_logits(&alphabet, "LM22XPT", 12.0),
        };

        let decoded = decode_slots(&output, &alphabet, DEFAULT_SLOTS);
        assert_eq!(decoded.text, "LM22XPT");
        assert!(decoded.confidence.unwrap() > 99.0);
    }

    #[test]
    fn test_decode_classes_first_matches_slots_first() {
        let alphabet = Alphabet::default();
        let data = slot_logits(&alphabet, "AB12CDE__", 4.0);

        let slots_first = ModelOutput {
            shape: vec![1, 9, 37],
            data: data.clone(),
        };
        let classes_first = ModelOutput {
            shape: vec![1, 37, 9],
            data: transpose(&data, 9, 37),
        };

        let a = decode_slots(&slots_first, &alphabet, DEFAULT_SLOTS);
        let b = decode_slots(&classes_first, &alphabet, DEFAULT_SLOTS);
        assert_eq!(a.text, "AB12CDE");
        assert_eq!(a, b);
    }

    #[test]
    fn test_pad_slot_is_skipped_but_counted() {
        let alphabet = Alphabet::default();
        // Nine slots, the fifth is padding and less certain than the rest
        let mut data = slot_logits(&alphabet, "LM22_XPTA", 10.0);
        let pad_class = 36;
        data[4 * 37 + pad_class] = 2.0;

        let output = ModelOutput {
            shape: vec![1, 9, 37],
            data,
        };
        let decoded = decode_slots(&output, &alphabet, DEFAULT_SLOTS);
        assert_eq!(decoded.text, "LM22XPTA");

        let sure = 1.0 / (1.0 + 36.0 * (-10.0f32).exp());
        let unsure = 1.0 / (1.0 + 36.0 * (-2.0f32).exp());
        let expected = (8.0 * sure + unsure) / 9.0 * 100.0;
        assert!((decoded.confidence.unwrap() - expected).abs() < 1e-3);
    }

    #[test]
    fn test_all_pad_decodes_to_empty_text() {
        let alphabet = Alphabet::default();
        let output = ModelOutput {
            shape: vec![1, 9, 37],
            data: slot_logits(&alphabet, "_________", 8.0),
        };
        let decoded = decode_slots(&output, &alphabet, DEFAULT_SLOTS);
        assert_eq!(decoded.text, "");
        assert!(decoded.confidence.is_some());
    }

    #[test]
    fn test_zero_slots_has_no_confidence() {
        let output = ModelOutput {
            shape: vec![1, 0, 37],
            data: Vec::new(),
        };
        let decoded = decode_slots(&output, &Alphabet::default(), DEFAULT_SLOTS);
        assert_eq!(decoded.text, "");
        assert_eq!(decoded.confidence, None);
    }

    #[test]
    fn test_unknown_shape_falls_back_to_expected_slots() {
        let alphabet = Alphabet::default();
        let output = ModelOutput {
            shape: vec![1, 9 * 37],
            data: slot_logits(&alphabet, "LM22XPT__", 6.0),
        };
        let decoded = decode_slots(&output, &alphabet, 9);
        assert_eq!(decoded.text, "LM22XPT");

        // Buffer shorter than the expected slot count is bounded
        let short = ModelOutput {
            shape: vec![1, 3 * 37],
            data: slot_logits(&alphabet, "AB1", 6.0),
        };
        assert_eq!(decode_slots(&short, &alphabet, 9).text, "AB1");
    }

    #[test]
    fn test_slot_confidence_bounds_and_margin() {
        let mut previous = 0.0;
        for margin in [0.0f32, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0] {
            let mut scores = vec![0.0f32; 37];
            scores[3] = margin;
            let (class, confidence) = decode_slot(scores.iter().copied());

            assert!(confidence > 0.0 && confidence <= 1.0);
            assert!(confidence >= previous);
            if margin > 0.0 {
                assert_eq!(class, 3);
            }
            previous = confidence;
        }
        assert!(previous > 0.9999);
    }

    #[test]
    fn test_slot_confidence_is_numerically_stable() {
        let scores = [1000.0f32, 999.0, -1000.0];
        let (class, confidence) = decode_slot(scores.iter().copied());
        assert_eq!(class, 0);
        assert!(confidence.is_finite());
        assert!((confidence - 1.0 / (1.0 + (-1.0f32).exp())).abs() < 1e-4);
    }
}
