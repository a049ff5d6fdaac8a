/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, YamlLoader};

use crate::module::grpc::GrpcServerConfig;

mod grpc;
mod server;
mod value;

pub use server::{H2Config, MuxServerConfig};

#[derive(Debug, Default, Clone)]
pub struct MuxConfig {
    pub server: MuxServerConfig,
    pub grpc: GrpcServerConfig,
}

pub fn load(path: &Path) -> anyhow::Result<MuxConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {e}", path.display()))?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> anyhow::Result<MuxConfig> {
    let mut docs =
        YamlLoader::load_from_str(contents).map_err(|e| anyhow!("invalid yaml: {e}"))?;
    let Some(doc) = docs.pop() else {
        return Err(anyhow!("empty config content"));
    };
    let Yaml::Hash(map) = doc else {
        return Err(anyhow!("root yaml value type should be 'map'"));
    };

    let mut server = None;
    let mut grpc = GrpcServerConfig::default();
    for (k, v) in map.iter() {
        let k = value::as_string(k)?;
        match k.as_str() {
            "server" => {
                server = Some(
                    MuxServerConfig::parse(v).context("failed to parse server config")?,
                );
            }
            "grpc" => {
                grpc = grpc::parse(v).context("failed to parse grpc config")?;
            }
            _ => return Err(anyhow!("invalid root key {k}")),
        }
    }

    let Some(server) = server else {
        return Err(anyhow!("no server config set"));
    };
    Ok(MuxConfig { server, grpc })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_combined() {
        let conf = r#"
            server:
              listen: "[::1]:4443"
              cert_file: tls/server.crt
              key_file: tls/server.key
            grpc:
              message_encoding: gzip
        "#;
        let config = load_from_str(conf).unwrap();
        assert_eq!(config.server.listen, "[::1]:4443".parse().unwrap());
        assert_eq!(
            config.grpc.encoding,
            crate::module::grpc::GrpcMessageEncoding::Enabled(vec!["gzip".to_string()])
        );
    }

    #[test]
    fn reject_without_server() {
        assert!(load_from_str("grpc: {}").is_err());
    }
}
