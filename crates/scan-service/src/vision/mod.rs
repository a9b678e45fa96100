pub mod annotate;
pub mod crop;
pub mod detector;
pub mod letterbox;
pub mod ocr;

pub use crop::{crop_plate, PlateCrop};
pub use detector::{decode_detections, BoxLayout, DecoderOptions};
pub use letterbox::{
    letterbox, ChannelLayout, ElementType, LetterboxSpec, LetterboxTransform, PreparedTensor,
    TensorData,
};
pub use ocr::{decode_slots, Alphabet, SlotLayout};
