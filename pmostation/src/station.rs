//! Station records, lifecycle status and creation payload validation.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Error, FieldIssue, Result};

// Hostname (RFC 1123), IPv4, or bracketed IPv6
static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*|\[[0-9A-Fa-f:.]+\])$",
    )
    .unwrap()
});

static MOUNTPOINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/?[A-Za-z0-9._~-]+(?:/[A-Za-z0-9._~-]+)*$").unwrap());

static BITRATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[1-9][0-9]{0,5}[kKmM]?$").unwrap());

/// Lifecycle status of a station's backing stream.
///
/// Never trusted across a supervisor restart: the store forces every station
/// back to `Stopped` at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    #[default]
    Stopped,
    Running,
}

impl StationStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, StationStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StationStatus::Stopped => "stopped",
            StationStatus::Running => "running",
        }
    }
}

impl std::fmt::Display for StationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials and encoder settings for the Icecast/Shoutcast egress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct ShoutcastConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    /// Bitrate handed to the encoder as-is (`128k`)
    pub bitrate: String,
}

/// A persisted station.
///
/// Field order is the order of the persisted JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct Station {
    pub id: String,
    pub name: String,
    pub playlist_id: String,
    pub playlist_name: String,
    pub port: u16,
    pub mountpoint: String,
    pub shoutcast: ShoutcastConfig,
    #[serde(default)]
    pub status: StationStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, serialize_with = "serialize_optional_timestamp")]
    pub last_started: Option<DateTime<Utc>>,
}

impl Station {
    /// Builds a fresh, stopped station from a validated definition.
    pub(crate) fn create(new: NewStation) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            playlist_id: new.playlist_id,
            playlist_name: new.playlist_name,
            port: new.port,
            mountpoint: new.mountpoint,
            shoutcast: new.shoutcast,
            status: StationStatus::Stopped,
            pid: None,
            created_at: now(),
            last_started: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub(crate) fn mark_running(&mut self, pid: Option<u32>, started_at: DateTime<Utc>) {
        self.status = StationStatus::Running;
        self.pid = pid;
        self.last_started = Some(started_at);
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.status = StationStatus::Stopped;
        self.pid = None;
    }

    /// Reset state after a supervisor restart.
    ///
    /// No process handle survives a restart, so any recorded status or PID is stale.
    pub(crate) fn reset_for_restart(&mut self) {
        self.mark_stopped();
    }
}

/// Current time at microsecond precision, the resolution of stored timestamps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// `2024-01-01T10:00:00.123456+00:00` : décalage explicite, fraction en
// microsecondes, omise quand elle est nulle
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    let format = match ts.timestamp_subsec_nanos() {
        0 => SecondsFormat::Secs,
        n if n % 1_000 == 0 => SecondsFormat::Micros,
        _ => SecondsFormat::Nanos,
    };
    ts.to_rfc3339_opts(format, false)
}

fn serialize_timestamp<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

fn serialize_optional_timestamp<S: Serializer>(
    ts: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => serializer.serialize_str(&format_timestamp(ts)),
        None => serializer.serialize_none(),
    }
}

/// Port as sent by callers: HTML forms post it as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

impl From<u16> for PortValue {
    fn from(port: u16) -> Self {
        PortValue::Number(port as i64)
    }
}

/// Shoutcast section of a creation payload; every field is optional until validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct ShoutcastDefinition {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub bitrate: Option<String>,
}

/// Station creation payload.
///
/// Deserialization never fails on missing fields: [`StationDefinition::validate`]
/// reports all of them at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct StationDefinition {
    pub name: Option<String>,
    pub playlist_id: Option<String>,
    pub playlist_name: Option<String>,
    pub port: Option<PortValue>,
    pub mountpoint: Option<String>,
    pub shoutcast: Option<ShoutcastDefinition>,
}

/// A definition that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewStation {
    pub name: String,
    pub playlist_id: String,
    pub playlist_name: String,
    pub port: u16,
    pub mountpoint: String,
    pub shoutcast: ShoutcastConfig,
}

impl StationDefinition {
    /// Décode un payload JSON champ par champ.
    ///
    /// Un champ au mauvais type est rapporté comme les autres erreurs de
    /// validation, à sa place dans l'ordre des champs, au lieu de faire
    /// échouer tout le document.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(Error::invalid(vec![FieldIssue::new(
                "body",
                "must be a JSON object",
            )]));
        };

        let mut type_issues = Vec::new();
        let name = take_field(&mut map, "name", "name", &mut type_issues);
        let playlist_id = take_field(&mut map, "playlist_id", "playlist_id", &mut type_issues);
        let playlist_name =
            take_field(&mut map, "playlist_name", "playlist_name", &mut type_issues);
        let port = take_field(&mut map, "port", "port", &mut type_issues);
        let mountpoint = take_field(&mut map, "mountpoint", "mountpoint", &mut type_issues);

        let shoutcast = match map.remove("shoutcast") {
            None | Some(Value::Null) => None,
            Some(Value::Object(mut sc)) => Some(ShoutcastDefinition {
                user: take_field(&mut sc, "user", "shoutcast.user", &mut type_issues),
                password: take_field(&mut sc, "password", "shoutcast.password", &mut type_issues),
                host: take_field(&mut sc, "host", "shoutcast.host", &mut type_issues),
                bitrate: take_field(&mut sc, "bitrate", "shoutcast.bitrate", &mut type_issues),
            }),
            Some(_) => {
                type_issues.push(FieldIssue::new("shoutcast", "must be an object"));
                None
            }
        };

        let definition = Self {
            name,
            playlist_id,
            playlist_name,
            port,
            mountpoint,
            shoutcast,
        };
        if type_issues.is_empty() {
            return Ok(definition);
        }

        // Les champs mal typés sont restés vides : validate() les signale
        // comme manquants, on remplace ce message par l'erreur de type.
        let issues = match definition.validate() {
            Err(Error::Validation(issues)) => issues
                .into_iter()
                .map(|issue| {
                    type_issues
                        .iter()
                        .find(|t| t.field == issue.field)
                        .cloned()
                        .unwrap_or(issue)
                })
                .collect(),
            _ => type_issues,
        };
        Err(Error::invalid(issues))
    }

    pub(crate) fn validate(self) -> Result<NewStation> {
        let mut issues = Vec::new();

        let name = required_text(&mut issues, "name", self.name);
        let playlist_id = required_text(&mut issues, "playlist_id", self.playlist_id);
        let playlist_name = required_text(&mut issues, "playlist_name", self.playlist_name);

        let port = match self.port {
            None => {
                issues.push(FieldIssue::missing("port"));
                None
            }
            Some(value) => match parse_port(&value) {
                Ok(port) => Some(port),
                Err(issue) => {
                    issues.push(issue);
                    None
                }
            },
        };

        let mountpoint = required_text(&mut issues, "mountpoint", self.mountpoint)
            .and_then(|m| check(&mut issues, validate_mountpoint(&m)).then_some(m));

        let shoutcast = match self.shoutcast {
            None => {
                issues.push(FieldIssue::missing("shoutcast"));
                None
            }
            Some(def) => {
                let user = required_text(&mut issues, "shoutcast.user", def.user);
                let password = required_secret(&mut issues, "shoutcast.password", def.password);
                let host = required_text(&mut issues, "shoutcast.host", def.host)
                    .and_then(|h| check(&mut issues, validate_host(&h)).then_some(h));
                let bitrate = required_text(&mut issues, "shoutcast.bitrate", def.bitrate)
                    .and_then(|b| check(&mut issues, validate_bitrate(&b)).then_some(b));

                match (user, password, host, bitrate) {
                    (Some(user), Some(password), Some(host), Some(bitrate)) => {
                        let shoutcast = ShoutcastConfig {
                            user,
                            password,
                            host,
                            bitrate,
                        };
                        check(&mut issues, validate_credentials(&shoutcast)).then_some(shoutcast)
                    }
                    _ => None,
                }
            }
        };

        match (name, playlist_id, playlist_name, port, mountpoint, shoutcast) {
            (
                Some(name),
                Some(playlist_id),
                Some(playlist_name),
                Some(port),
                Some(mountpoint),
                Some(shoutcast),
            ) if issues.is_empty() => Ok(NewStation {
                name,
                playlist_id,
                playlist_name,
                port,
                mountpoint,
                shoutcast,
            }),
            _ => Err(Error::invalid(issues)),
        }
    }
}

fn take_field<T: DeserializeOwned>(
    map: &mut Map<String, Value>,
    key: &str,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<T> {
    let value = map.remove(key)?;
    match serde_json::from_value::<Option<T>>(value) {
        Ok(value) => value,
        Err(e) => {
            issues.push(FieldIssue::new(field, e.to_string()));
            None
        }
    }
}

fn required_text(issues: &mut Vec<FieldIssue>, field: &str, value: Option<String>) -> Option<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Some(v),
        Some(_) => {
            issues.push(FieldIssue::new(field, "must not be empty"));
            None
        }
        None => {
            issues.push(FieldIssue::missing(field));
            None
        }
    }
}

// Mots de passe : pas de trim, les espaces peuvent être significatifs
fn required_secret(
    issues: &mut Vec<FieldIssue>,
    field: &str,
    value: Option<String>,
) -> Option<String> {
    match value {
        Some(v) if !v.is_empty() => Some(v),
        Some(_) => {
            issues.push(FieldIssue::new(field, "must not be empty"));
            None
        }
        None => {
            issues.push(FieldIssue::missing(field));
            None
        }
    }
}

fn check(issues: &mut Vec<FieldIssue>, result: std::result::Result<(), FieldIssue>) -> bool {
    match result {
        Ok(()) => true,
        Err(issue) => {
            issues.push(issue);
            false
        }
    }
}

fn parse_port(value: &PortValue) -> std::result::Result<u16, FieldIssue> {
    let raw = match value {
        PortValue::Number(n) => *n,
        PortValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| FieldIssue::new("port", format!("'{}' is not a number", s)))?,
    };
    validate_port(raw)
}

pub(crate) fn validate_port(raw: i64) -> std::result::Result<u16, FieldIssue> {
    match u16::try_from(raw) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(FieldIssue::new(
            "port",
            format!("{} is outside 1..=65535", raw),
        )),
    }
}

pub(crate) fn validate_mountpoint(mountpoint: &str) -> std::result::Result<(), FieldIssue> {
    if MOUNTPOINT_RE.is_match(mountpoint) && !mountpoint.split('/').any(|seg| seg == "..") {
        Ok(())
    } else {
        Err(FieldIssue::new(
            "mountpoint",
            "only letters, digits, '.', '_', '~', '-' and '/' separators are allowed",
        ))
    }
}

pub(crate) fn validate_host(host: &str) -> std::result::Result<(), FieldIssue> {
    if host.len() <= 253 && HOST_RE.is_match(host) {
        Ok(())
    } else {
        Err(FieldIssue::new(
            "shoutcast.host",
            "must be a hostname, an IPv4 address or a bracketed IPv6 address",
        ))
    }
}

pub(crate) fn validate_bitrate(bitrate: &str) -> std::result::Result<(), FieldIssue> {
    if BITRATE_RE.is_match(bitrate) {
        Ok(())
    } else {
        Err(FieldIssue::new(
            "shoutcast.bitrate",
            "must be a positive number with an optional k/M suffix (e.g. 128k)",
        ))
    }
}

/// Les identifiants sont percent-encodés dans l'URL, seuls les caractères
/// de contrôle sont refusés.
pub(crate) fn validate_credentials(shoutcast: &ShoutcastConfig) -> std::result::Result<(), FieldIssue> {
    if shoutcast.user.chars().any(char::is_control) {
        return Err(FieldIssue::new(
            "shoutcast.user",
            "must not contain control characters",
        ));
    }
    if shoutcast.password.chars().any(char::is_control) {
        return Err(FieldIssue::new(
            "shoutcast.password",
            "must not contain control characters",
        ));
    }
    Ok(())
}
