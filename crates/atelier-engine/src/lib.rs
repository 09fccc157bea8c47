pub mod composer;
pub mod config;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod prompt;
pub mod proxy;
pub mod studio;
pub mod transport;

pub use composer::{GenerationRequest, ReferenceImages};
pub use error::GenerationError;
pub use gateway::{GenerationGateway, GenerationMode, HttpProxyClient, ProxyClient};
pub use proxy::{ProxyHandler, ProxyReply};
pub use studio::{AppState, GenerateOutcome, Studio};
