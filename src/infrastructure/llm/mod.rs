mod client;

pub use client::ChatCompletionClient;
