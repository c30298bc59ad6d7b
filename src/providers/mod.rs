pub mod llm;

pub use llm::{
    AnthropicProvider, Completion, LLMProvider, Message, MockLLMProvider, OpenAIProvider, Pricing,
};
