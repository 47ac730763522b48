pub mod audiosocket;
pub mod conversation;
pub mod segmenter;
pub mod synthesis;

// Re-export commonly used types for convenience
pub use conversation::{
    ConversationBackend, ConversationError, ConversationEvent, ConversationRequest,
    ConversationResult, ConversationStream, StreamFormat, WebSocketBackend,
};

pub use segmenter::{
    SegmenterConfig, SegmenterError, SegmenterResult, Sentence, SentenceSegmenter, TextFragment,
};

pub use synthesis::{HttpSynthesizer, SynthesisError, SynthesisResult, Synthesizer};
