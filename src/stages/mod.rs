pub mod analysis;
pub mod chat;
pub mod decision;
pub mod reply;
pub mod research;

pub use analysis::FundamentalAnalyst;
pub use chat::{AnthropicChat, ChatModel, LlmError, OpenAiChat};
pub use decision::QuantDecider;
pub use research::NewsResearcher;
