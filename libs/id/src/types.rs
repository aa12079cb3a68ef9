//! Typed ID definitions for all platform resources.

use serde::Deserialize;
use ulid::Ulid;

use crate::{define_opaque_id, IdError};

// =============================================================================
// Application Model
// =============================================================================

/// Maximum length of a user-chosen application ID.
pub const APP_ID_MAX_LEN: usize = 64;

/// A user-chosen application identifier.
///
/// App IDs are DNS-label-like: lowercase ASCII letters, digits, and interior
/// dashes, at most [`APP_ID_MAX_LEN`] characters. They are globally unique
/// within a registry and appear as the suffix of every [`TaskId`] the
/// application launches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    /// Parses and validates an application ID.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.len() > APP_ID_MAX_LEN {
            return Err(IdError::TooLong {
                id: s.to_string(),
                max: APP_ID_MAX_LEN,
            });
        }
        for ch in s.chars() {
            if !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-') {
                return Err(IdError::InvalidCharacter {
                    id: s.to_string(),
                    ch,
                });
            }
        }
        if s.starts_with('-') || s.ends_with('-') {
            return Err(IdError::InvalidFormat {
                message: format!("app ID '{s}' must not begin or end with a dash"),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AppId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> serde::Deserialize<'de> for AppId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// A task identifier: `{slot_index}-{incarnation}-{app_id}`.
///
/// The trailing `-{app_id}` is load-bearing: the routing plane attributes a
/// task to its application by checking that suffix, and the scheduler mints
/// every task ID in this shape. The incarnation counts launch attempts for
/// one slot, so each relaunch yields a distinct task ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Composes a task ID from its parts.
    pub fn compose(app_id: &AppId, slot_index: u32, incarnation: u64) -> Self {
        Self(format!("{slot_index}-{incarnation}-{app_id}"))
    }

    /// Parses a task ID, validating its three-part shape.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let mut parts = s.splitn(3, '-');
        let index = parts.next().unwrap_or_default();
        let incarnation = parts.next();
        let app = parts.next();

        if index.parse::<u32>().is_err() {
            return Err(IdError::InvalidFormat {
                message: format!("task ID '{s}' must begin with a slot index"),
            });
        }
        match incarnation {
            Some(inc) if inc.parse::<u64>().is_ok() => {}
            _ => {
                return Err(IdError::InvalidFormat {
                    message: format!("task ID '{s}' is missing an incarnation"),
                })
            }
        }
        match app {
            Some(app) => {
                AppId::parse(app)?;
            }
            None => {
                return Err(IdError::InvalidFormat {
                    message: format!("task ID '{s}' is missing an app ID suffix"),
                })
            }
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this task belongs to the given application.
    ///
    /// The check is the `-{app_id}` suffix rule relied on by both the
    /// scheduler (which mints IDs) and the routing plane (which parses them).
    #[must_use]
    pub fn belongs_to(&self, app_id: &AppId) -> bool {
        self.0
            .strip_suffix(app_id.as_str())
            .is_some_and(|head| head.ends_with('-'))
    }

    /// Returns the slot index encoded in the ID.
    #[must_use]
    pub fn slot_index(&self) -> Option<u32> {
        self.0.split('-').next()?.parse().ok()
    }

    /// Returns the incarnation encoded in the ID.
    #[must_use]
    pub fn incarnation(&self) -> Option<u64> {
        self.0.split('-').nth(1)?.parse().ok()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> serde::Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Versions
// =============================================================================

/// A version identifier: the `ver_` marker followed by a ULID.
///
/// Version IDs are minted by the scheduler whenever an operator submits a
/// launch description; they are never derived from user input. Rolling
/// update and cancel-update decide whether a slot has converged by comparing
/// the slot's version ID against the target version's, so the only property
/// that matters operationally is cheap, unambiguous equality — the ULID
/// payload additionally keeps operator-facing listings in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionId(Ulid);

/// Marker prefixed to every version ID's string form.
const VERSION_MARKER: &str = "ver_";

impl VersionId {
    /// Mints a fresh version ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses the `ver_{ulid}` string form back into an ID.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let Some(payload) = s.strip_prefix(VERSION_MARKER) else {
            return Err(IdError::WrongKind {
                input: s.to_string(),
                kind: "version",
            });
        };
        payload
            .parse::<Ulid>()
            .map(Self)
            .map_err(|e| IdError::BadUlid {
                input: s.to_string(),
                message: e.to_string(),
            })
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{VERSION_MARKER}{}", self.0)
    }
}

impl std::str::FromStr for VersionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for VersionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for VersionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Cluster Manager
// =============================================================================

define_opaque_id!(AgentId);
define_opaque_id!(OfferId);
define_opaque_id!(FrameworkId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_accepts_dns_labels() {
        assert!(AppId::parse("web").is_ok());
        assert!(AppId::parse("nginx0051").is_ok());
        assert!(AppId::parse("billing-api").is_ok());
    }

    #[test]
    fn app_id_rejects_bad_shapes() {
        assert!(matches!(AppId::parse(""), Err(IdError::Empty)));
        assert!(matches!(
            AppId::parse("Web"),
            Err(IdError::InvalidCharacter { ch: 'W', .. })
        ));
        assert!(matches!(
            AppId::parse("a b"),
            Err(IdError::InvalidCharacter { ch: ' ', .. })
        ));
        assert!(AppId::parse("-web").is_err());
        assert!(AppId::parse("web-").is_err());
        assert!(AppId::parse(&"a".repeat(65)).is_err());
    }

    #[test]
    fn task_id_compose_and_parse_roundtrip() {
        let app = AppId::parse("web").unwrap();
        let task = TaskId::compose(&app, 2, 7);
        assert_eq!(task.as_str(), "2-7-web");

        let reparsed = TaskId::parse(task.as_str()).unwrap();
        assert_eq!(reparsed, task);
        assert_eq!(reparsed.slot_index(), Some(2));
        assert_eq!(reparsed.incarnation(), Some(7));
    }

    #[test]
    fn task_id_suffix_attribution() {
        let app = AppId::parse("billing-api").unwrap();
        let task = TaskId::compose(&app, 0, 1);
        assert!(task.belongs_to(&app));
        assert!(!task.belongs_to(&AppId::parse("api").unwrap()));
        assert!(!task.belongs_to(&AppId::parse("billing").unwrap()));
    }

    #[test]
    fn task_id_rejects_malformed_input() {
        assert!(TaskId::parse("").is_err());
        assert!(TaskId::parse("web").is_err());
        assert!(TaskId::parse("x-1-web").is_err());
        assert!(TaskId::parse("0-y-web").is_err());
    }

    #[test]
    fn version_id_roundtrip() {
        let id = VersionId::new();
        let s = id.to_string();
        assert!(s.starts_with("ver_"));
        assert_eq!(VersionId::parse(&s).unwrap(), id);
    }

    #[test]
    fn version_id_rejects_foreign_strings() {
        assert!(matches!(VersionId::parse(""), Err(IdError::Empty)));
        // A different family's marker is not a version ID at all.
        assert!(matches!(
            VersionId::parse("app_01HV4Z2WQXKJNM8GPQY6VBKC3D"),
            Err(IdError::WrongKind { kind: "version", .. })
        ));
        // The marker alone is not enough; the payload must be a ULID.
        assert!(matches!(
            VersionId::parse("ver_not-a-ulid"),
            Err(IdError::BadUlid { .. })
        ));
    }

    #[test]
    fn opaque_ids_pass_through() {
        let agent = AgentId::new("mesos-agent-S1");
        assert_eq!(agent.as_str(), "mesos-agent-S1");
        assert!("".parse::<AgentId>().is_err());
    }

    #[test]
    fn serde_roundtrips() {
        let app = AppId::parse("web").unwrap();
        let json = serde_json::to_string(&app).unwrap();
        assert_eq!(json, "\"web\"");
        let back: AppId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, app);

        let task = TaskId::compose(&app, 1, 1);
        let json = serde_json::to_string(&task).unwrap();
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
