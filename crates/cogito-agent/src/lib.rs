//! Upstream model access and the streaming pipeline that turns raw deltas
//! into thinking/answer events.

pub mod langflow;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod relay;
pub mod stream;
pub mod thinking;
pub mod title;

pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role};
pub use registry::ModelRegistry;
pub use relay::{AnswerSink, Relay, RelayError, ThinkingSink, TurnOutcome, TurnRequest, TurnSettings};
pub use stream::{Delta, StreamEvent};
pub use thinking::{ClassifiedEvent, Markers, ThinkingClassifier};
