//! Layered request configuration.
//!
//! Three layers feed every resolution: explicit CLI overrides, per-request
//! HTTP headers, and the process environment. Each field takes the first
//! non-empty value in that order. Credentials are resolved as a whole: the
//! highest layer that supplies any credential decides its shape.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_GRAFANA_URL: &str = "http://localhost:3000";

/// Environment variable names (also used as CLI override flag names).
pub mod env {
    pub const URL: &str = "GRAFANA_URL";
    pub const SERVICE_ACCOUNT_TOKEN: &str = "GRAFANA_SERVICE_ACCOUNT_TOKEN";
    pub const API_KEY: &str = "GRAFANA_API_KEY";
    pub const USERNAME: &str = "GRAFANA_USERNAME";
    pub const PASSWORD: &str = "GRAFANA_PASSWORD";
    pub const ACCESS_TOKEN: &str = "GRAFANA_ACCESS_TOKEN";
    pub const ID_TOKEN: &str = "GRAFANA_ID_TOKEN";
    pub const TLS_CERT_FILE: &str = "GRAFANA_TLS_CERT_FILE";
    pub const TLS_KEY_FILE: &str = "GRAFANA_TLS_KEY_FILE";
    pub const TLS_CA_FILE: &str = "GRAFANA_TLS_CA_FILE";
    pub const TLS_SKIP_VERIFY: &str = "GRAFANA_TLS_SKIP_VERIFY";
}

/// Per-request header names, lower-cased.
pub mod headers {
    pub const URL: &str = "x-grafana-url";
    pub const API_KEY: &str = "x-grafana-api-key";
    pub const ACCESS_TOKEN: &str = "x-access-token";
    pub const ID_TOKEN: &str = "x-grafana-id";
    pub const AUTHORIZATION: &str = "authorization";
}

/// Authentication material sent to Grafana. Exactly one shape per request.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credential {
    #[default]
    None,
    /// Service account token or bearer token
    BearerToken(String),
    /// Legacy API key (deprecated upstream, still honored)
    ApiKey(String),
    Basic {
        username: String,
        password: String,
    },
    /// On-behalf-of pair forwarded from an identity proxy
    Oidc {
        access_token: String,
        id_token: String,
    },
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BearerToken(_) => "bearer_token",
            Self::ApiKey(_) => "api_key",
            Self::Basic { .. } => "basic",
            Self::Oidc { .. } => "oidc",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Token-style credentials may legitimately lack permission to read the
    /// identity endpoint, so a 403 there is not fatal for them.
    pub fn is_token_style(&self) -> bool {
        matches!(self, Self::BearerToken(_) | Self::ApiKey(_) | Self::Oidc { .. })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::BearerToken(_) => f.write_str("BearerToken(***)"),
            Self::ApiKey(_) => f.write_str("ApiKey(***)"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Oidc { .. } => f.write_str("Oidc(***)"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub skip_verify: bool,
}

impl TlsOptions {
    pub fn is_default(&self) -> bool {
        self == &Self::default()
    }
}

/// The resolved, immutable configuration for one tool invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestConfig {
    base_url: Url,
    credential: Credential,
    tls: TlsOptions,
}

impl RequestConfig {
    pub fn new(base_url: &str, credential: Credential, tls: TlsOptions) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            credential,
            tls,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL without a trailing slash, suitable for joining paths.
    pub fn base_url_str(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }

    pub fn require_credential(&self, operation: &str) -> Result<&Credential> {
        if self.credential.is_none() {
            return Err(Error::config(format!(
                "{operation} requires Grafana credentials; set {} or another credential",
                env::SERVICE_ACCOUNT_TOKEN
            )));
        }
        Ok(&self.credential)
    }
}

/// Case-insensitive view of the HTTP headers that accompanied a request.
/// Empty for the line-oriented transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestHeaders(BTreeMap<String, String>);

impl RequestHeaders {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in pairs {
            map.entry(key.as_ref().to_ascii_lowercase())
                .or_insert_with(|| value.into());
        }
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One source of configuration values. Every field is optional; empty
/// strings are normalized away at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub url: Option<String>,
    pub service_account_token: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,
    pub tls_ca_file: Option<String>,
    pub tls_skip_verify: Option<bool>,
}

impl ConfigLayer {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the environment layer from an arbitrary lookup (tests use a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| non_empty(lookup(key));
        let layer = Self {
            url: get(env::URL),
            service_account_token: get(env::SERVICE_ACCOUNT_TOKEN),
            api_key: get(env::API_KEY),
            username: get(env::USERNAME),
            password: get(env::PASSWORD),
            access_token: get(env::ACCESS_TOKEN),
            id_token: get(env::ID_TOKEN),
            tls_cert_file: get(env::TLS_CERT_FILE),
            tls_key_file: get(env::TLS_KEY_FILE),
            tls_ca_file: get(env::TLS_CA_FILE),
            tls_skip_verify: get(env::TLS_SKIP_VERIFY).map(|raw| parse_bool_flag(&raw)),
        };
        if layer.api_key.is_some() && layer.service_account_token.is_none() {
            tracing::warn!(
                event = "config.deprecated_api_key",
                "{} is deprecated; prefer {}",
                env::API_KEY,
                env::SERVICE_ACCOUNT_TOKEN
            );
        }
        layer
    }

    pub fn from_headers(request: &RequestHeaders) -> Self {
        let header = |name: &str| non_empty(request.get(name).map(str::to_string));
        let mut layer = Self {
            url: header(headers::URL),
            service_account_token: header(headers::API_KEY),
            id_token: header(headers::ID_TOKEN),
            access_token: header(headers::ACCESS_TOKEN),
            ..Self::default()
        };

        if let Some(raw) = request.get(headers::AUTHORIZATION) {
            let raw = raw.trim();
            if let Some((scheme, value)) = raw.split_once(' ') {
                let value = value.trim();
                if scheme.eq_ignore_ascii_case("basic") {
                    if let Some((user, password)) = decode_basic(value) {
                        layer.username = Some(user);
                        layer.password = Some(password);
                    }
                } else if scheme.eq_ignore_ascii_case("bearer") && layer.access_token.is_none() {
                    layer.access_token = non_empty(Some(value.to_string()));
                }
            }
        }
        layer
    }

    /// Credential supplied by this layer alone, if any.
    pub fn credential(&self) -> Option<Credential> {
        if let Some(token) = &self.service_account_token {
            return Some(Credential::BearerToken(token.clone()));
        }
        if let Some(key) = &self.api_key {
            return Some(Credential::ApiKey(key.clone()));
        }
        match (&self.access_token, &self.id_token) {
            (Some(access_token), Some(id_token)) => {
                return Some(Credential::Oidc {
                    access_token: access_token.clone(),
                    id_token: id_token.clone(),
                });
            }
            (Some(access_token), None) if self.username.is_none() => {
                return Some(Credential::BearerToken(access_token.clone()));
            }
            _ => {}
        }
        self.username.as_ref().map(|username| Credential::Basic {
            username: username.clone(),
            password: self.password.clone().unwrap_or_default(),
        })
    }
}

/// The two process-wide layers. Headers are supplied per request.
#[derive(Clone, Debug, Default)]
pub struct ConfigSources {
    pub cli: ConfigLayer,
    pub env: ConfigLayer,
}

impl ConfigSources {
    pub fn new(cli: ConfigLayer, env: ConfigLayer) -> Self {
        Self { cli, env }
    }

    pub fn resolve(&self, headers: &RequestHeaders) -> Result<RequestConfig> {
        resolve(&self.cli, &ConfigLayer::from_headers(headers), &self.env)
    }
}

/// Merge layers in precedence order CLI > headers > env. Pure apart from
/// reading the current directory when relative TLS paths are absolutized.
pub fn resolve(
    cli: &ConfigLayer,
    headers: &ConfigLayer,
    env: &ConfigLayer,
) -> Result<RequestConfig> {
    let layers = [cli, headers, env];

    let url = first(&layers, |layer| layer.url.as_ref())
        .cloned()
        .unwrap_or_else(|| DEFAULT_GRAFANA_URL.to_string());

    let credential = layers
        .iter()
        .find_map(|layer| layer.credential())
        .unwrap_or_default();

    let tls = TlsOptions {
        cert_file: first(&layers, |layer| layer.tls_cert_file.as_ref())
            .map(|raw| normalize_path(raw))
            .transpose()?,
        key_file: first(&layers, |layer| layer.tls_key_file.as_ref())
            .map(|raw| normalize_path(raw))
            .transpose()?,
        ca_file: first(&layers, |layer| layer.tls_ca_file.as_ref())
            .map(|raw| normalize_path(raw))
            .transpose()?,
        skip_verify: layers
            .iter()
            .find_map(|layer| layer.tls_skip_verify)
            .unwrap_or(false),
    };

    if tls.cert_file.is_some() != tls.key_file.is_some() {
        return Err(Error::config(format!(
            "{} and {} must be provided together",
            env::TLS_CERT_FILE,
            env::TLS_KEY_FILE
        )));
    }

    RequestConfig::new(&url, credential, tls)
}

fn first<'a, T>(
    layers: &[&'a ConfigLayer],
    field: impl Fn(&'a ConfigLayer) -> Option<&'a T>,
) -> Option<&'a T> {
    layers.iter().find_map(|layer| field(*layer))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

pub fn parse_bool_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn decode_basic(encoded: &str) -> Option<(String, String)> {
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    if user.is_empty() {
        return None;
    }
    Some((user.to_string(), password.to_string()))
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)
        .map_err(|err| Error::config(format!("invalid Grafana URL '{raw}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(format!(
            "Grafana URL '{raw}' must use http or https"
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::config(format!("Grafana URL '{raw}' has no host")));
    }
    Ok(url)
}

/// Expand `~` and make relative paths absolute. Does not touch the file.
pub fn normalize_path(raw: &str) -> Result<PathBuf> {
    let expanded = if raw == "~" {
        home_dir()?
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home_dir()?.join(rest)
    } else {
        PathBuf::from(raw)
    };
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    std::path::absolute(&expanded)
        .map_err(|err| Error::config(format!("cannot resolve path '{raw}': {err}")))
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| Error::config("cannot expand '~': no home directory"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_layer(pairs: &[(&str, &str)]) -> ConfigLayer {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigLayer::from_lookup(|key| map.get(key).cloned())
    }

    fn header_layer(pairs: &[(&str, &str)]) -> ConfigLayer {
        ConfigLayer::from_headers(&RequestHeaders::from_pairs(pairs.iter().copied()))
    }

    #[test]
    fn empty_layers_fall_back_to_defaults() {
        let config = resolve(
            &ConfigLayer::default(),
            &ConfigLayer::default(),
            &ConfigLayer::default(),
        )
        .expect("defaults should resolve");
        assert_eq!(config.base_url_str(), DEFAULT_GRAFANA_URL);
        assert!(config.credential().is_none());
        assert!(config.tls().is_default());
    }

    #[test]
    fn url_precedence_is_cli_then_header_then_env() {
        let env = env_layer(&[(env::URL, "http://env:3000")]);
        let headers = header_layer(&[("X-Grafana-URL", "http://header:3000")]);
        let cli = ConfigLayer {
            url: Some("http://cli:3000".to_string()),
            ..ConfigLayer::default()
        };

        let all = resolve(&cli, &headers, &env).expect("resolve");
        assert_eq!(all.base_url_str(), "http://cli:3000");

        let no_cli = resolve(&ConfigLayer::default(), &headers, &env).expect("resolve");
        assert_eq!(no_cli.base_url_str(), "http://header:3000");

        let env_only =
            resolve(&ConfigLayer::default(), &ConfigLayer::default(), &env).expect("resolve");
        assert_eq!(env_only.base_url_str(), "http://env:3000");
    }

    #[test]
    fn header_credential_beats_env_credential() {
        let env = env_layer(&[(env::SERVICE_ACCOUNT_TOKEN, "env-token")]);
        let headers = header_layer(&[("x-grafana-api-key", "header-token")]);
        let config = resolve(&ConfigLayer::default(), &headers, &env).expect("resolve");
        assert_eq!(
            config.credential(),
            &Credential::BearerToken("header-token".to_string())
        );
    }

    #[test]
    fn cli_credential_beats_header_credential() {
        let headers = header_layer(&[("x-grafana-api-key", "header-token")]);
        let cli = ConfigLayer {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..ConfigLayer::default()
        };
        let config = resolve(&cli, &headers, &ConfigLayer::default()).expect("resolve");
        assert_eq!(
            config.credential(),
            &Credential::Basic {
                username: "admin".to_string(),
                password: "secret".to_string(),
            }
        );
    }

    #[test]
    fn credential_is_never_mixed_across_layers() {
        // Username from env must not pair with a password from headers.
        let env = env_layer(&[(env::USERNAME, "env-user")]);
        let headers = header_layer(&[("x-access-token", "abc"), ("x-grafana-id", "id-jwt")]);
        let config = resolve(&ConfigLayer::default(), &headers, &env).expect("resolve");
        assert_eq!(
            config.credential(),
            &Credential::Oidc {
                access_token: "abc".to_string(),
                id_token: "id-jwt".to_string(),
            }
        );
    }

    #[test]
    fn basic_authorization_header_is_decoded() {
        let value = format!("Basic {}", BASE64.encode("viewer:pa:ss"));
        let headers = header_layer(&[("Authorization", value.as_str())]);
        assert_eq!(
            headers.credential(),
            Some(Credential::Basic {
                username: "viewer".to_string(),
                password: "pa:ss".to_string(),
            })
        );
    }

    #[test]
    fn bearer_authorization_without_id_is_a_bearer_token() {
        let headers = header_layer(&[("authorization", "Bearer glsa_123")]);
        assert_eq!(
            headers.credential(),
            Some(Credential::BearerToken("glsa_123".to_string()))
        );
    }

    #[test]
    fn username_without_password_uses_empty_password() {
        let env = env_layer(&[(env::USERNAME, "admin")]);
        assert_eq!(
            env.credential(),
            Some(Credential::Basic {
                username: "admin".to_string(),
                password: String::new(),
            })
        );
    }

    #[test]
    fn blank_values_are_ignored() {
        let env = env_layer(&[(env::URL, "   "), (env::SERVICE_ACCOUNT_TOKEN, "")]);
        assert!(env.url.is_none());
        assert!(env.credential().is_none());
    }

    #[test]
    fn legacy_api_key_maps_to_api_key_credential() {
        let env = env_layer(&[(env::API_KEY, "eyJrIjoi")]);
        let credential = env.credential().expect("api key credential");
        assert_eq!(credential.kind(), "api_key");
        assert!(credential.is_token_style());
    }

    #[test]
    fn invalid_url_is_a_config_error() {
        let cli = ConfigLayer {
            url: Some("ftp://grafana".to_string()),
            ..ConfigLayer::default()
        };
        let err = resolve(&cli, &ConfigLayer::default(), &ConfigLayer::default())
            .expect_err("ftp must be rejected");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let env = env_layer(&[(env::URL, "https://grafana.example.com/")]);
        let config =
            resolve(&ConfigLayer::default(), &ConfigLayer::default(), &env).expect("resolve");
        assert_eq!(config.base_url_str(), "https://grafana.example.com");
    }

    #[test]
    fn tls_paths_are_absolutized_and_skip_verify_parsed() {
        let env = env_layer(&[
            (env::TLS_CA_FILE, "certs/ca.pem"),
            (env::TLS_SKIP_VERIFY, "yes"),
        ]);
        let config =
            resolve(&ConfigLayer::default(), &ConfigLayer::default(), &env).expect("resolve");
        let ca = config.tls().ca_file.as_ref().expect("ca path");
        assert!(ca.is_absolute());
        assert!(ca.ends_with("certs/ca.pem"));
        assert!(config.tls().skip_verify);
    }

    #[test]
    fn home_relative_tls_path_is_expanded() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let path = normalize_path("~/grafana/client.pem").expect("expand");
        assert_eq!(path, home.join("grafana/client.pem"));
    }

    #[test]
    fn client_certificate_requires_key() {
        let env = env_layer(&[(env::TLS_CERT_FILE, "/etc/grafana/client.pem")]);
        let err = resolve(&ConfigLayer::default(), &ConfigLayer::default(), &env)
            .expect_err("cert without key");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn cli_skip_verify_overrides_env() {
        let env = env_layer(&[(env::TLS_SKIP_VERIFY, "true")]);
        let cli = ConfigLayer {
            tls_skip_verify: Some(false),
            ..ConfigLayer::default()
        };
        let config = resolve(&cli, &ConfigLayer::default(), &env).expect("resolve");
        assert!(!config.tls().skip_verify);
    }

    #[test]
    fn credential_debug_output_is_redacted() {
        let rendered = format!("{:?}", Credential::BearerToken("glsa_secret".to_string()));
        assert!(!rendered.contains("glsa_secret"));
    }

    #[test]
    fn require_credential_rejects_anonymous_config() {
        let config = RequestConfig::new(
            DEFAULT_GRAFANA_URL,
            Credential::None,
            TlsOptions::default(),
        )
        .expect("config");
        assert!(matches!(
            config.require_credential("listing incidents"),
            Err(Error::Config(_))
        ));
    }
}
