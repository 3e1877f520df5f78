/*
 * Copyright (C) 2024 Fastly, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::core::arena::ArenaSizing;
use crate::core::eventloop::EventLoopConfig;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "SLABNET";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: IpAddr,
    pub port: u16,
    pub accept_queue_max: usize,
    pub outbound_queue_max: usize,
    pub connections_max: usize,
    pub read_buffer_size: usize,
    pub idle_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let el = EventLoopConfig::default();

        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9999,
            accept_queue_max: el.accept_queue_max,
            outbound_queue_max: el.outbound_queue_max,
            connections_max: el.connections_max,
            read_buffer_size: el.read_buffer_size,
            idle_timeout_ms: el.idle_timeout.as_millis() as u64,
        }
    }
}

impl From<ServerConfig> for config::ValueKind {
    fn from(server: ServerConfig) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "listen_addr".to_string(),
            config::Value::from(server.listen_addr.to_string()),
        );
        properties.insert("port".to_string(), config::Value::from(server.port));
        properties.insert(
            "accept_queue_max".to_string(),
            config::Value::from(server.accept_queue_max as u64),
        );
        properties.insert(
            "outbound_queue_max".to_string(),
            config::Value::from(server.outbound_queue_max as u64),
        );
        properties.insert(
            "connections_max".to_string(),
            config::Value::from(server.connections_max as u64),
        );
        properties.insert(
            "read_buffer_size".to_string(),
            config::Value::from(server.read_buffer_size as u64),
        );
        properties.insert(
            "idle_timeout_ms".to_string(),
            config::Value::from(server.idle_timeout_ms),
        );

        Self::Table(properties)
    }
}

// newtype so the arena section can be handed to the config builder
struct ArenaSection(ArenaSizing);

impl From<ArenaSection> for config::ValueKind {
    fn from(section: ArenaSection) -> Self {
        let s = section.0;

        let mut properties = HashMap::new();
        properties.insert(
            "small_slot_size".to_string(),
            config::Value::from(s.small_slot_size as u64),
        );
        properties.insert(
            "small_slots".to_string(),
            config::Value::from(s.small_slots as u64),
        );
        properties.insert(
            "medium_slot_size".to_string(),
            config::Value::from(s.medium_slot_size as u64),
        );
        properties.insert(
            "medium_slots".to_string(),
            config::Value::from(s.medium_slots as u64),
        );
        properties.insert(
            "large_slot_size".to_string(),
            config::Value::from(s.large_slot_size as u64),
        );
        properties.insert(
            "large_slots".to_string(),
            config::Value::from(s.large_slots as u64),
        );

        Self::Table(properties)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub read_arena: ArenaSizing,
    pub write_arena: ArenaSizing,
}

impl Config {
    /// Loads the configuration. Built-in defaults are overridden by the INI
    /// file, if any, which is overridden by `SLABNET_` environment variables
    /// such as `SLABNET_SERVER__PORT`.
    pub fn new(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Ini));
        }

        Self::build(builder.add_source(env_source()))
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("server", ServerConfig::default())?
            .set_default("read_arena", ArenaSection(ArenaSizing::default()))?
            .set_default("write_arena", ArenaSection(ArenaSizing::default()))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;

        if let Err(e) = config.validate() {
            return Err(ConfigError::Message(e));
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        let s = &self.server;

        if s.accept_queue_max == 0 {
            return Err("accept_queue_max must be greater than zero".into());
        }

        if s.outbound_queue_max == 0 {
            return Err("outbound_queue_max must be greater than zero".into());
        }

        if s.connections_max == 0 {
            return Err("connections_max must be greater than zero".into());
        }

        if s.read_buffer_size == 0 {
            return Err("read_buffer_size must be greater than zero".into());
        }

        if let Err(e) = self.read_arena.validate() {
            return Err(format!("read_arena: {}", e));
        }

        if let Err(e) = self.write_arena.validate() {
            return Err(format!("write_arena: {}", e));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.listen_addr, self.server.port)
    }

    pub fn event_loop_config(&self) -> EventLoopConfig {
        EventLoopConfig {
            accept_queue_max: self.server.accept_queue_max,
            outbound_queue_max: self.server.outbound_queue_max,
            connections_max: self.server.connections_max,
            read_buffer_size: self.server.read_buffer_size,
            idle_timeout: Duration::from_millis(self.server.idle_timeout_ms),
            read_arena: self.read_arena.clone(),
            write_arena: self.write_arena.clone(),
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
