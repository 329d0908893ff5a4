//! Typed views of the frps/frpc configuration files.
//!
//! Every field is optional: absence differs from an empty or zero value.
//! Options this crate does not model are kept in each table's `extra` map.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{
    Deserialize, Deserializer, Serialize,
    de::{self, Unexpected, Visitor},
};
use serde_json::{Map, Value};

use crate::role::Role;

pub type Extra = Map<String, Value>;

/// Accepts an integer or an integral float for an integer field.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    struct NumberVisitor;

    impl<'de> Visitor<'de> for NumberVisitor {
        type Value = Option<i64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            i64::try_from(value)
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Unsigned(value), &self))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e18 {
                Ok(Some(value as i64))
            } else {
                Err(E::invalid_value(Unexpected::Float(value), &self))
            }
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(self)
        }
    }

    deserializer.deserialize_any(NumberVisitor)
}

/// Keeps the proxies that decode and drops the rest, so a single bad block
/// cannot make the whole client file unreadable.
fn lenient_proxies<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ProxyEntry>, D::Error> {
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<ProxyEntry>(value) {
            Ok(entry) => Some(entry),
            Err(error) => {
                log::warn!("[config] skipping undecodable proxy entry: {error}");
                None
            }
        })
        .collect())
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    pub to: Option<String>,
    pub level: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub max_days: Option<i64>,
    pub disable_print_color: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsFiles {
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub trusted_ca_file: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebServerConfig {
    pub addr: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub port: Option<i64>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub assets_dir: Option<String>,
    pub tls: Option<TlsFiles>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuicConfig {
    #[serde(default, deserialize_with = "lenient_number")]
    pub keepalive_period: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub max_idle_timeout: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub max_incoming_streams: Option<i64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientOidc {
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub audience: Option<String>,
    pub scope: Option<String>,
    #[serde(rename = "tokenEndpointURL")]
    pub token_endpoint_url: Option<String>,
    pub additional_endpoint_params: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientAuth {
    pub method: Option<String>,
    pub additional_scopes: Option<Vec<String>>,
    pub token: Option<String>,
    pub oidc: Option<ClientOidc>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientTls {
    pub enable: Option<bool>,
    #[serde(rename = "disableCustomTLSFirstByte")]
    pub disable_custom_tls_first_byte: Option<bool>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub trusted_ca_file: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientTransport {
    pub protocol: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub dial_server_timeout: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub dial_server_keepalive: Option<i64>,
    #[serde(rename = "connectServerLocalIP")]
    pub connect_server_local_ip: Option<String>,
    #[serde(rename = "proxyURL")]
    pub proxy_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub pool_count: Option<i64>,
    pub tcp_mux: Option<bool>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub tcp_mux_keepalive_interval: Option<i64>,
    pub quic: Option<QuicConfig>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub heartbeat_interval: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub heartbeat_timeout: Option<i64>,
    pub tls: Option<ClientTls>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Global section of `frpc.toml`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub user: Option<String>,
    pub server_addr: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub server_port: Option<i64>,
    pub nat_hole_stun_server: Option<String>,
    pub dns_server: Option<String>,
    pub login_fail_exit: Option<bool>,
    pub start: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub udp_packet_size: Option<i64>,
    pub includes: Option<Vec<String>>,
    pub auth: Option<ClientAuth>,
    pub log: Option<LogConfig>,
    pub web_server: Option<WebServerConfig>,
    pub transport: Option<ClientTransport>,
    pub metadatas: Option<BTreeMap<String, String>>,
    /// Decoded `[[proxies]]` blocks. Read-only here: the global encoder never
    /// writes them, the proxy block store owns them.
    #[serde(default, skip_serializing, deserialize_with = "lenient_proxies")]
    pub proxies: Vec<ProxyEntry>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerOidc {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub skip_expiry_check: Option<bool>,
    pub skip_issuer_check: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerAuth {
    pub method: Option<String>,
    pub additional_scopes: Option<Vec<String>>,
    pub token: Option<String>,
    pub oidc: Option<ServerOidc>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshTunnelGateway {
    #[serde(default, deserialize_with = "lenient_number")]
    pub bind_port: Option<i64>,
    pub private_key_file: Option<String>,
    pub auto_gen_private_key_path: Option<String>,
    pub authorized_keys_file: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerTls {
    pub force: Option<bool>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub trusted_ca_file: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerTransport {
    #[serde(default, deserialize_with = "lenient_number")]
    pub tcp_mux_keepalive_interval: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub tcp_keepalive: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub max_pool_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub heartbeat_timeout: Option<i64>,
    pub quic: Option<QuicConfig>,
    pub tls: Option<ServerTls>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowPort {
    #[serde(default, deserialize_with = "lenient_number")]
    pub start: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub end: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub single: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPlugin {
    pub name: Option<String>,
    pub addr: Option<String>,
    pub path: Option<String>,
    pub ops: Option<Vec<String>>,
    pub tls_verify: Option<bool>,
}

/// `frps.toml`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub bind_addr: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub bind_port: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub kcp_bind_port: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub quic_bind_port: Option<i64>,
    pub proxy_bind_addr: Option<String>,
    #[serde(rename = "vhostHTTPPort", default, deserialize_with = "lenient_number")]
    pub vhost_http_port: Option<i64>,
    #[serde(rename = "vhostHTTPTimeout", default, deserialize_with = "lenient_number")]
    pub vhost_http_timeout: Option<i64>,
    #[serde(rename = "vhostHTTPSPort", default, deserialize_with = "lenient_number")]
    pub vhost_https_port: Option<i64>,
    #[serde(rename = "tcpmuxHTTPConnectPort", default, deserialize_with = "lenient_number")]
    pub tcpmux_http_connect_port: Option<i64>,
    pub tcpmux_passthrough: Option<bool>,
    pub sub_domain_host: Option<String>,
    #[serde(rename = "custom404Page")]
    pub custom_404_page: Option<String>,
    pub enable_prometheus: Option<bool>,
    pub detailed_errors_to_client: Option<bool>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub max_ports_per_client: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub user_conn_timeout: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub udp_packet_size: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub nathole_analysis_data_reserve_hours: Option<i64>,
    pub allow_ports: Option<Vec<AllowPort>>,
    pub http_plugins: Option<Vec<HttpPlugin>>,
    pub auth: Option<ServerAuth>,
    pub ssh_tunnel_gateway: Option<SshTunnelGateway>,
    pub web_server: Option<WebServerConfig>,
    pub log: Option<LogConfig>,
    pub transport: Option<ServerTransport>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    #[default]
    Tcp,
    Udp,
    Http,
    Https,
    Tcpmux,
    Stcp,
    Sudp,
    Xtcp,
}

impl ProxyKind {
    pub const ALL: [ProxyKind; 8] = [
        Self::Tcp,
        Self::Udp,
        Self::Http,
        Self::Https,
        Self::Tcpmux,
        Self::Stcp,
        Self::Sudp,
        Self::Xtcp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Http => "http",
            Self::Https => "https",
            Self::Tcpmux => "tcpmux",
            Self::Stcp => "stcp",
            Self::Sudp => "sudp",
            Self::Xtcp => "xtcp",
        }
    }

    /// Kinds exposed through a port on the server.
    pub fn uses_remote_port(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }

    /// Kinds routed by domain name.
    pub fn uses_domains(self) -> bool {
        matches!(self, Self::Http | Self::Https | Self::Tcpmux)
    }

    /// Kinds that require a visitor holding the shared secret.
    pub fn uses_secret(self) -> bool {
        matches!(self, Self::Stcp | Self::Sudp | Self::Xtcp)
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown proxy type '{0}'")]
pub struct UnknownProxyKind(String);

impl FromStr for ProxyKind {
    type Err = UnknownProxyKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownProxyKind(value.to_string()))
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct HeaderOperations {
    pub set: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One `[[proxies]]` block of `frpc.toml`. Fields that only apply to some
/// kinds are simply left unset for the others.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    #[serde(rename = "localIP")]
    pub local_ip: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub local_port: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub remote_port: Option<i64>,
    pub use_encryption: Option<bool>,
    pub use_compression: Option<bool>,
    pub bandwidth_limit: Option<String>,
    pub bandwidth_limit_mode: Option<String>,
    pub proxy_protocol_version: Option<String>,
    pub custom_domains: Option<Vec<String>>,
    pub subdomain: Option<String>,
    pub locations: Option<Vec<String>>,
    pub http_user: Option<String>,
    pub http_password: Option<String>,
    pub host_header_rewrite: Option<String>,
    pub request_headers: Option<HeaderOperations>,
    pub response_headers: Option<HeaderOperations>,
    #[serde(rename = "routeByHTTPUser")]
    pub route_by_http_user: Option<String>,
    pub multiplexer: Option<String>,
    pub secret_key: Option<String>,
    pub allow_users: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ProxyEntry {
    pub fn new(name: impl Into<String>, kind: ProxyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    /// How the proxy is reached from outside: a server port, its domains, or
    /// a visitor holding the secret.
    pub fn endpoint(&self) -> Option<String> {
        if self.kind.uses_remote_port() {
            return self.remote_port.map(|port| format!(":{port}"));
        }
        if self.kind.uses_domains() {
            let mut hosts = self.custom_domains.clone().unwrap_or_default();
            hosts.extend(self.subdomain.iter().map(|subdomain| format!("{subdomain}.*")));
            return (!hosts.is_empty()).then(|| hosts.join(","));
        }
        if self.kind.uses_secret() {
            return Some(if self.secret_key.as_deref().is_some_and(|key| !key.is_empty()) {
                "visitor (secret set)".to_string()
            } else {
                "visitor (no secret)".to_string()
            });
        }
        None
    }
}

/// Ties a configuration tree to the role whose file it lives in.
pub trait RoleConfig: Serialize + serde::de::DeserializeOwned + Default + Clone {
    const ROLE: Role;

    /// Skeleton written when the file is missing or unusable.
    fn defaults() -> Self;
}

impl RoleConfig for ServerConfig {
    const ROLE: Role = Role::Server;

    fn defaults() -> Self {
        Self {
            bind_addr: Some("0.0.0.0".into()),
            bind_port: Some(7000),
            auth: Some(ServerAuth {
                method: Some("token".into()),
                token: Some(String::new()),
                ..ServerAuth::default()
            }),
            transport: Some(ServerTransport {
                tcp_mux_keepalive_interval: Some(60),
                tcp_keepalive: Some(7200),
                max_pool_count: Some(5),
                heartbeat_timeout: Some(90),
                ..ServerTransport::default()
            }),
            web_server: Some(WebServerConfig {
                addr: Some("0.0.0.0".into()),
                port: Some(7500),
                user: Some("admin".into()),
                password: Some("admin".into()),
                ..WebServerConfig::default()
            }),
            log: Some(LogConfig {
                level: Some("info".into()),
                max_days: Some(3),
                ..LogConfig::default()
            }),
            ..Self::default()
        }
    }
}

impl RoleConfig for ClientConfig {
    const ROLE: Role = Role::Client;

    fn defaults() -> Self {
        Self {
            server_addr: Some("127.0.0.1".into()),
            server_port: Some(7000),
            auth: Some(ClientAuth {
                method: Some("token".into()),
                token: Some(String::new()),
                ..ClientAuth::default()
            }),
            transport: Some(ClientTransport {
                tcp_mux: Some(true),
                heartbeat_interval: Some(30),
                heartbeat_timeout: Some(90),
                ..ClientTransport::default()
            }),
            log: Some(LogConfig {
                level: Some("info".into()),
                max_days: Some(3),
                disable_print_color: Some(false),
                ..LogConfig::default()
            }),
            ..Self::default()
        }
    }
}

/// Either role's tree, tagged for the command surface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "role", content = "config", rename_all = "lowercase")]
pub enum Configuration {
    Server(ServerConfig),
    Client(ClientConfig),
}

impl Configuration {
    pub fn role(&self) -> Role {
        match self {
            Self::Server(_) => Role::Server,
            Self::Client(_) => Role::Client,
        }
    }
}

impl From<ServerConfig> for Configuration {
    fn from(config: ServerConfig) -> Self {
        Self::Server(config)
    }
}

impl From<ClientConfig> for Configuration {
    fn from(config: ClientConfig) -> Self {
        Self::Client(config)
    }
}
