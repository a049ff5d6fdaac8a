/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use yaml_rust::Yaml;

pub(crate) fn as_string(v: &Yaml) -> anyhow::Result<String> {
    match v {
        Yaml::String(s) => Ok(s.to_string()),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Real(s) => Ok(s.to_string()),
        _ => Err(anyhow!(
            "yaml value type for string should be 'string' / 'integer' / 'real'"
        )),
    }
}

pub(crate) fn as_bool(v: &Yaml) -> anyhow::Result<bool> {
    match v {
        Yaml::Boolean(b) => Ok(*b),
        Yaml::String(s) => match s.to_lowercase().as_str() {
            "on" | "true" | "1" => Ok(true),
            "off" | "false" | "0" => Ok(false),
            _ => Err(anyhow!("invalid yaml string value for 'bool': {s}")),
        },
        Yaml::Integer(i) => Ok(*i != 0),
        _ => Err(anyhow!("yaml value type for 'bool' should be 'boolean'")),
    }
}

pub(crate) fn as_u32(v: &Yaml) -> anyhow::Result<u32> {
    match v {
        Yaml::Integer(i) => Ok(u32::try_from(*i)?),
        Yaml::String(s) => Ok(u32::from_str(s)?),
        _ => Err(anyhow!("yaml value type for 'u32' should be 'integer'")),
    }
}

pub(crate) fn as_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::Integer(i) => Ok(usize::try_from(*i)?),
        Yaml::String(s) => {
            let v = s
                .parse::<humanize_rs::bytes::Bytes>()
                .map_err(|e| anyhow!("invalid humanize size string: {e}"))?;
            Ok(v.size())
        }
        _ => Err(anyhow!(
            "yaml value type for 'usize' should be 'integer' or 'size string'"
        )),
    }
}

pub(crate) fn as_duration(v: &Yaml) -> anyhow::Result<Duration> {
    match v {
        Yaml::String(s) => {
            humanize_rs::duration::parse(s).map_err(|e| anyhow!("invalid duration string: {e}"))
        }
        Yaml::Integer(i) => u64::try_from(*i)
            .map(Duration::from_secs)
            .map_err(|e| anyhow!("invalid duration integer value: {e}")),
        _ => Err(anyhow!(
            "yaml value type for 'duration' should be 'duration string' or 'integer'"
        )),
    }
}

pub(crate) fn as_sockaddr(v: &Yaml) -> anyhow::Result<SocketAddr> {
    let s = as_string(v)?;
    SocketAddr::from_str(&s).map_err(|e| anyhow!("invalid socket address {s}: {e}"))
}

pub(crate) fn as_path(v: &Yaml) -> anyhow::Result<PathBuf> {
    if let Yaml::String(s) = v {
        if s.is_empty() {
            Err(anyhow!("empty path value"))
        } else {
            Ok(PathBuf::from(s))
        }
    } else {
        Err(anyhow!("yaml value type for path should be 'string'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    fn yaml(s: &str) -> Yaml {
        YamlLoader::load_from_str(s).unwrap().pop().unwrap()
    }

    #[test]
    fn duration_value() {
        assert_eq!(as_duration(&yaml("10s")).unwrap(), Duration::from_secs(10));
        assert_eq!(as_duration(&yaml("60")).unwrap(), Duration::from_secs(60));
        assert!(as_duration(&yaml("[1, 2]")).is_err());
    }

    #[test]
    fn size_value() {
        assert_eq!(as_usize(&yaml("4MB")).unwrap(), 4_000_000);
        assert_eq!(as_usize(&yaml("4096")).unwrap(), 4096);
    }

    #[test]
    fn sockaddr_value() {
        assert_eq!(
            as_sockaddr(&yaml("127.0.0.1:4443")).unwrap(),
            SocketAddr::from_str("127.0.0.1:4443").unwrap()
        );
        assert!(as_sockaddr(&yaml("example.net:443")).is_err());
    }
}
