use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tessera_types::{Level, ObjectInfo, ShardId, User, Value};

/// Kind byte of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    Set = 1,
    Delete = 2,
    SetToObject = 3,
    DeleteAttr = 4,
    CreateObject = 5,
    Attach = 6,
    DeleteObject = 7,
    CreateUser = 8,
    DeleteUser = 9,
    AddObjectInfo = 10,
    DeleteObjectInfo = 11,
}

impl EventKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::Set,
            2 => Self::Delete,
            3 => Self::SetToObject,
            4 => Self::DeleteAttr,
            5 => Self::CreateObject,
            6 => Self::Attach,
            7 => Self::DeleteObject,
            8 => Self::CreateUser,
            9 => Self::DeleteUser,
            10 => Self::AddObjectInfo,
            11 => Self::DeleteObjectInfo,
            _ => return None,
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => write!(f, "Set"),
            Self::Delete => write!(f, "Delete"),
            Self::SetToObject => write!(f, "SetToObject"),
            Self::DeleteAttr => write!(f, "DeleteAttr"),
            Self::CreateObject => write!(f, "CreateObject"),
            Self::Attach => write!(f, "Attach"),
            Self::DeleteObject => write!(f, "DeleteObject"),
            Self::CreateUser => write!(f, "CreateUser"),
            Self::DeleteUser => write!(f, "DeleteUser"),
            Self::AddObjectInfo => write!(f, "AddObjectInfo"),
            Self::DeleteObjectInfo => write!(f, "DeleteObjectInfo"),
        }
    }
}

/// A raw log record: the kind byte plus three free-form string fields.
///
/// On-disk format, one record per line:
/// ```text
/// <kind> <base64 name> <base64 value> <base64 metadata>\n
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub name: String,
    pub value: String,
    pub metadata: String,
}

impl Event {
    pub fn new(
        kind: EventKind,
        name: impl Into<String>,
        value: impl Into<String>,
        metadata: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            value: value.into(),
            metadata: metadata.into(),
        }
    }

    /// Serialize to a single newline-terminated line.
    pub fn encode_line(&self) -> String {
        format!(
            "{} {} {} {}\n",
            self.kind as u8,
            BASE64.encode(&self.name),
            BASE64.encode(&self.value),
            BASE64.encode(&self.metadata),
        )
    }

    /// Parse one line (trailing newline optional). The error is a human-readable reason.
    pub fn decode_line(line: &str) -> Result<Self, String> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != 4 {
            return Err(format!("expected 4 fields, found {}", fields.len()));
        }

        let raw_kind: u8 = fields[0]
            .parse()
            .map_err(|_| format!("invalid kind {:?}", fields[0]))?;
        let kind = EventKind::from_u8(raw_kind).ok_or_else(|| format!("unknown kind {raw_kind}"))?;

        Ok(Self {
            kind,
            name: decode_field("name", fields[1])?,
            value: decode_field("value", fields[2])?,
            metadata: decode_field("metadata", fields[3])?,
        })
    }
}

fn decode_field(field: &str, encoded: &str) -> Result<String, String> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| format!("{field}: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("{field}: {e}"))
}

/// A committed local mutation, in typed form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Set { key: String, value: Value },
    Delete { key: String },
    SetToObject { path: String, key: String, data: String, read_only: bool },
    DeleteAttr { path: String, key: String },
    CreateObject { path: String, level: Level },
    Attach { dst: String, src: String },
    DeleteObject { path: String },
    /// Carries the full record; replay upserts by login.
    CreateUser(User),
    DeleteUser { login: String },
    AddObjectInfo { name: String, info: ObjectInfo },
    DeleteObjectInfo { name: String },
}

impl Mutation {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Set { .. } => EventKind::Set,
            Self::Delete { .. } => EventKind::Delete,
            Self::SetToObject { .. } => EventKind::SetToObject,
            Self::DeleteAttr { .. } => EventKind::DeleteAttr,
            Self::CreateObject { .. } => EventKind::CreateObject,
            Self::Attach { .. } => EventKind::Attach,
            Self::DeleteObject { .. } => EventKind::DeleteObject,
            Self::CreateUser(_) => EventKind::CreateUser,
            Self::DeleteUser { .. } => EventKind::DeleteUser,
            Self::AddObjectInfo { .. } => EventKind::AddObjectInfo,
            Self::DeleteObjectInfo { .. } => EventKind::DeleteObjectInfo,
        }
    }

    pub fn to_event(&self) -> Event {
        let kind = self.kind();
        match self {
            Self::Set { key, value } => Event::new(
                kind,
                key.as_str(),
                value.data.as_str(),
                format!("{};{}", flag(value.read_only), value.level.as_u8()),
            ),
            Self::Delete { key } => Event::new(kind, key.as_str(), "", ""),
            Self::SetToObject { path, key, data, read_only } => Event::new(
                kind,
                path.as_str(),
                data.as_str(),
                format!("{};{}", flag(*read_only), key),
            ),
            Self::DeleteAttr { path, key } => Event::new(kind, path.as_str(), "", key.as_str()),
            Self::CreateObject { path, level } => {
                Event::new(kind, path.as_str(), "", level.as_u8().to_string())
            }
            Self::Attach { dst, src } => Event::new(kind, dst.as_str(), src.as_str(), ""),
            Self::DeleteObject { path } => Event::new(kind, path.as_str(), "", ""),
            Self::CreateUser(user) => Event::new(
                kind,
                user.login.as_str(),
                user.password_hash.as_str(),
                format!("{};{}", user.active, user.level.as_u8()),
            ),
            Self::DeleteUser { login } => Event::new(kind, login.as_str(), "", ""),
            Self::AddObjectInfo { name, info } => Event::new(
                kind,
                name.as_str(),
                format!("{};{}", info.shard.get(), info.level.as_u8()),
                "",
            ),
            Self::DeleteObjectInfo { name } => Event::new(kind, name.as_str(), "", ""),
        }
    }

    /// Rebuild the typed mutation from a raw record, validating its metadata.
    pub fn from_event(event: &Event) -> Result<Self, String> {
        let name = event.name.clone();
        Ok(match event.kind {
            EventKind::Set => {
                let (read_only, level) = split_pair(&event.metadata)?;
                Self::Set {
                    key: name,
                    value: Value::new(event.value.as_str())
                        .read_only(parse_flag(read_only)?)
                        .with_level(parse_level(level)?),
                }
            }
            EventKind::Delete => Self::Delete { key: name },
            EventKind::SetToObject => {
                let (read_only, key) = split_pair(&event.metadata)?;
                if key.is_empty() {
                    return Err("SetToObject without key".to_string());
                }
                Self::SetToObject {
                    path: name,
                    key: key.to_string(),
                    data: event.value.clone(),
                    read_only: parse_flag(read_only)?,
                }
            }
            EventKind::DeleteAttr => Self::DeleteAttr {
                path: name,
                key: event.metadata.clone(),
            },
            EventKind::CreateObject => Self::CreateObject {
                path: name,
                level: parse_level(&event.metadata)?,
            },
            EventKind::Attach => Self::Attach {
                dst: name,
                src: event.value.clone(),
            },
            EventKind::DeleteObject => Self::DeleteObject { path: name },
            EventKind::CreateUser => {
                let (active, level) = split_pair(&event.metadata)?;
                let active = active
                    .parse::<bool>()
                    .map_err(|_| format!("invalid active flag {active:?}"))?;
                Self::CreateUser(User {
                    id: 0,
                    login: name,
                    password_hash: event.value.clone(),
                    level: parse_level(level)?,
                    active,
                    change_seq: 0,
                })
            }
            EventKind::DeleteUser => Self::DeleteUser { login: name },
            EventKind::AddObjectInfo => {
                let (shard, level) = split_pair(&event.value)?;
                let shard = shard
                    .parse::<i32>()
                    .map_err(|_| format!("invalid shard {shard:?}"))?;
                Self::AddObjectInfo {
                    name,
                    info: ObjectInfo::new(ShardId::new(shard), parse_level(level)?),
                }
            }
            EventKind::DeleteObjectInfo => Self::DeleteObjectInfo { name },
        })
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { key, value } => write!(
                f,
                "set {key} = {:?} (level {}, read-only {})",
                value.data, value.level, value.read_only
            ),
            Self::Delete { key } => write!(f, "delete {key}"),
            Self::SetToObject { path, key, data, .. } => write!(f, "set {path}[{key}] = {data:?}"),
            Self::DeleteAttr { path, key } => write!(f, "delete {path}[{key}]"),
            Self::CreateObject { path, level } => write!(f, "create object {path} (level {level})"),
            Self::Attach { dst, src } => write!(f, "attach {src} under {dst}"),
            Self::DeleteObject { path } => write!(f, "delete object {path}"),
            Self::CreateUser(user) => write!(
                f,
                "user {} (level {}, active {})",
                user.login, user.level, user.active
            ),
            Self::DeleteUser { login } => write!(f, "delete user {login}"),
            Self::AddObjectInfo { name, info } => {
                write!(f, "place {name} on {} (level {})", info.shard, info.level)
            }
            Self::DeleteObjectInfo { name } => write!(f, "unplace {name}"),
        }
    }
}

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(format!("invalid flag {other:?}")),
    }
}

fn parse_level(raw: &str) -> Result<Level, String> {
    let n: u8 = raw.parse().map_err(|_| format!("invalid level {raw:?}"))?;
    Level::from_u8(n).map_err(|e| e.to_string())
}

/// Split `"a;b"` on the first separator; the second half may itself contain `;`.
fn split_pair(raw: &str) -> Result<(&str, &str), String> {
    raw.split_once(';')
        .ok_or_else(|| format!("malformed metadata {raw:?}"))
}
