// sqlgate - Policy-enforcing, audited SQL gateway
// Core library

pub mod commands;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod interceptor;
pub mod observability;

pub use commands::{invoke, invoke_json, ToolCall};
pub use config::{ConfigSource, GatewayConfig, StaticSource, YamlFileSource};
pub use engine::{BackendHandler, EngineError, EngineKind, HandlerRegistry};
pub use gateway::{
    Gateway, GatewayError, GatewayResult, ToolOutput, ToolResponse, WriteRequest, CONFIRM_WRITE,
};
