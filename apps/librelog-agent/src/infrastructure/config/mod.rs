//! Configuration Module
//!
//! Configuration loading for the agent.

mod settings;

pub use settings::{
    AgentConfig, ConfigError, EndpointSettings, ReconnectSettings, SamplingSettings,
    ServerSettings,
};
