/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use crate::module::grpc::{GrpcMessageEncoding, GrpcServerConfig};

use super::value;

pub(super) fn parse(v: &Yaml) -> anyhow::Result<GrpcServerConfig> {
    let Yaml::Hash(map) = v else {
        return Err(anyhow!("yaml value type for grpc config should be 'map'"));
    };

    let mut config = GrpcServerConfig::default();
    for (k, v) in map.iter() {
        let k = value::as_string(k)?;
        set(&mut config, &k, v).context(format!("failed to parse value for key {k}"))?;
    }
    Ok(config)
}

fn set(config: &mut GrpcServerConfig, k: &str, v: &Yaml) -> anyhow::Result<()> {
    match k {
        "message_encoding" | "encoding" => {
            config.encoding = as_message_encoding(v)?;
            Ok(())
        }
        "normalize_headers" => {
            config.normalize_headers = value::as_bool(v)?;
            Ok(())
        }
        "max_recv_message_size" => {
            config.max_recv_message_size = value::as_usize(v)?;
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    }
}

fn as_message_encoding(v: &Yaml) -> anyhow::Result<GrpcMessageEncoding> {
    match v {
        Yaml::Boolean(false) => Ok(GrpcMessageEncoding::Disabled),
        Yaml::String(s) => Ok(GrpcMessageEncoding::Enabled(vec![s.to_string()])),
        Yaml::Array(seq) => {
            let mut all = Vec::with_capacity(seq.len());
            for v in seq.iter() {
                all.push(value::as_string(v)?);
            }
            if all.is_empty() {
                Ok(GrpcMessageEncoding::Disabled)
            } else {
                Ok(GrpcMessageEncoding::Enabled(all))
            }
        }
        _ => Err(anyhow!(
            "yaml value type for message encoding should be 'string' / 'seq' / 'false'"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    #[test]
    fn parse_full() {
        let conf = r#"
            message_encoding:
              - gzip
              - identity
            normalize_headers: false
            max_recv_message_size: 8MiB
        "#;
        let doc = YamlLoader::load_from_str(conf).unwrap().pop().unwrap();
        let config = parse(&doc).unwrap();
        assert_eq!(
            config.encoding,
            GrpcMessageEncoding::Enabled(vec!["gzip".to_string(), "identity".to_string()])
        );
        assert!(!config.normalize_headers);
        assert_eq!(config.max_recv_message_size, 8 * 1024 * 1024);
    }

    #[test]
    fn parse_defaults() {
        let doc = YamlLoader::load_from_str("{}").unwrap().pop().unwrap();
        let config = parse(&doc).unwrap();
        assert_eq!(config.encoding, GrpcMessageEncoding::Disabled);
        assert!(config.normalize_headers);
        assert_eq!(config.max_recv_message_size, 4 * 1024 * 1024);
    }
}
