/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use yaml_rust::Yaml;

use g3_mux_h2::AlpnProtocol;

use super::value;

const DEFAULT_LISTEN_PORT: u16 = 4443;

/// HTTP/2 connection level settings, shared by the `h2` and `grpc-exp`
/// negotiated protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Config {
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    pub max_concurrent_streams: u32,
    pub handshake_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_age: Option<Duration>,
    pub graceful_close_timeout: Duration,
}

impl Default for H2Config {
    fn default() -> Self {
        H2Config {
            max_frame_size: 16384,
            max_header_list_size: 65536,
            max_concurrent_streams: 128,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: None,
            max_age: None,
            graceful_close_timeout: Duration::from_secs(10),
        }
    }
}

impl H2Config {
    fn set(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "max_frame_size" => {
                self.max_frame_size = value::as_u32(v)?;
                Ok(())
            }
            "max_header_list_size" => {
                self.max_header_list_size = value::as_u32(v)?;
                Ok(())
            }
            "max_concurrent_streams" => {
                self.max_concurrent_streams = value::as_u32(v)?;
                Ok(())
            }
            "handshake_timeout" => {
                self.handshake_timeout = value::as_duration(v)?;
                Ok(())
            }
            "idle_timeout" => {
                self.idle_timeout = Some(value::as_duration(v)?);
                Ok(())
            }
            "max_age" => {
                self.max_age = Some(value::as_duration(v)?);
                Ok(())
            }
            "graceful_close_timeout" => {
                self.graceful_close_timeout = value::as_duration(v)?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxServerConfig {
    pub listen: SocketAddr,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub tls_accept_timeout: Duration,
    pub h2: H2Config,
}

impl Default for MuxServerConfig {
    fn default() -> Self {
        MuxServerConfig {
            listen: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), DEFAULT_LISTEN_PORT),
            cert_file: PathBuf::new(),
            key_file: PathBuf::new(),
            tls_accept_timeout: Duration::from_secs(10),
            h2: H2Config::default(),
        }
    }
}

impl MuxServerConfig {
    pub(super) fn parse(v: &Yaml) -> anyhow::Result<Self> {
        let Yaml::Hash(map) = v else {
            return Err(anyhow!("yaml value type for server config should be 'map'"));
        };

        let mut config = MuxServerConfig::default();
        for (k, v) in map.iter() {
            let k = value::as_string(k)?;
            config
                .set(&k, v)
                .context(format!("failed to parse value for key {k}"))?;
        }
        config.check()?;
        Ok(config)
    }

    fn set(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "listen" => {
                self.listen = value::as_sockaddr(v)?;
                Ok(())
            }
            "cert_file" | "certificate" => {
                self.cert_file = value::as_path(v)?;
                Ok(())
            }
            "key_file" | "private_key" => {
                self.key_file = value::as_path(v)?;
                Ok(())
            }
            "tls_accept_timeout" | "accept_timeout" => {
                self.tls_accept_timeout = value::as_duration(v)?;
                Ok(())
            }
            "h2" | "http2" => {
                let Yaml::Hash(map) = v else {
                    return Err(anyhow!("yaml value type for h2 config should be 'map'"));
                };
                for (k, v) in map.iter() {
                    let k = value::as_string(k)?;
                    self.h2
                        .set(&k, v)
                        .context(format!("failed to parse value for h2 key {k}"))?;
                }
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.cert_file.as_os_str().is_empty() {
            return Err(anyhow!("no tls certificate file set"));
        }
        if self.key_file.as_os_str().is_empty() {
            return Err(anyhow!("no tls private key file set"));
        }
        Ok(())
    }

    /// Build the TLS server config with our ALPN protocol list advertised,
    /// the `grpc-exp` token first so legacy gRPC clients get a direct lane.
    pub fn build_tls_config(&self) -> anyhow::Result<Arc<ServerConfig>> {
        let certs = load_certs(&self.cert_file)?;
        let key = load_key(&self.key_file)?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| anyhow!("invalid certificate / private key pair: {e}"))?;
        config.alpn_protocols = vec![
            AlpnProtocol::GrpcExp.to_identification_sequence(),
            AlpnProtocol::Http2.to_identification_sequence(),
            AlpnProtocol::Http11.to_identification_sequence(),
        ];
        Ok(Arc::new(config))
    }
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file =
        File::open(path).map_err(|e| anyhow!("failed to open cert file {}: {e}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut certs = Vec::new();
    for (i, r) in rustls_pemfile::certs(&mut reader).enumerate() {
        let cert =
            r.map_err(|e| anyhow!("invalid certificate #{i} in {}: {e}", path.display()))?;
        certs.push(cert);
    }
    if certs.is_empty() {
        return Err(anyhow!("no certificate found in {}", path.display()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).map_err(|e| anyhow!("failed to open key file {}: {e}", path.display()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| anyhow!("invalid private key file {}: {e}", path.display()))?
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    #[test]
    fn parse_full() {
        let conf = r#"
            listen: "127.0.0.1:8443"
            cert_file: /etc/g3mux/server.crt
            key_file: /etc/g3mux/server.key
            tls_accept_timeout: 5s
            h2:
              max_concurrent_streams: 64
              idle_timeout: 2m
              max_age: 1h
        "#;
        let doc = YamlLoader::load_from_str(conf).unwrap().pop().unwrap();
        let config = MuxServerConfig::parse(&doc).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(config.tls_accept_timeout, Duration::from_secs(5));
        assert_eq!(config.h2.max_concurrent_streams, 64);
        assert_eq!(config.h2.idle_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.h2.max_age, Some(Duration::from_secs(3600)));
        // untouched keys keep their defaults
        assert_eq!(config.h2.max_frame_size, 16384);
    }

    #[test]
    fn reject_missing_cert() {
        let conf = r#"
            listen: "127.0.0.1:8443"
            key_file: /etc/g3mux/server.key
        "#;
        let doc = YamlLoader::load_from_str(conf).unwrap().pop().unwrap();
        assert!(MuxServerConfig::parse(&doc).is_err());
    }

    #[test]
    fn reject_unknown_key() {
        let conf = r#"
            listen: "127.0.0.1:8443"
            cert_file: a.crt
            key_file: a.key
            no_such_key: 1
        "#;
        let doc = YamlLoader::load_from_str(conf).unwrap().pop().unwrap();
        assert!(MuxServerConfig::parse(&doc).is_err());
    }
}
