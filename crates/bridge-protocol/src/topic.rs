//! Bus topic parsing and construction.
//!
//! Producers publish their state under `<status-root>/<identity>/<subchannel>`
//! and listen for commands on `<command-root>/<identity>`.

use std::fmt;
use thiserror::Error;

/// Default root for producer status topics.
pub const DEFAULT_STATUS_ROOT: &str = "media/status";

/// Default root for per-producer command topics.
pub const DEFAULT_COMMAND_ROOT: &str = "media/commands";

/// Subchannel segment carrying a producer's device list.
pub const DEVICES_SEGMENT: &str = "devices";

/// Errors raised while parsing a status topic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Topic does not live under the status root.
    #[error("Topic {0:?} is outside the status root")]
    WrongRoot(String),

    /// No identity segment after the root.
    #[error("Topic {0:?} has no producer identity")]
    MissingIdentity(String),

    /// More segments than `<root>/<identity>/<subchannel>`.
    #[error("Topic {0:?} has too many segments")]
    TooManySegments(String),

    /// Identity contains characters that cannot appear in a topic level.
    #[error("Invalid producer identity: {0}")]
    InvalidIdentity(&'static str),
}

/// Which part of a producer's state a status message replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subchannel {
    /// General "now playing" state. Any segment other than `devices`,
    /// including a missing one, routes here.
    MediaInfo,
    /// The producer's audio device list.
    Devices,
}

impl Subchannel {
    /// Classify an optional topic segment.
    #[must_use]
    pub fn from_segment(segment: Option<&str>) -> Self {
        match segment {
            Some(DEVICES_SEGMENT) => Subchannel::Devices,
            _ => Subchannel::MediaInfo,
        }
    }

    /// Name used in logs and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Subchannel::MediaInfo => "media_info",
            Subchannel::Devices => "devices",
        }
    }
}

impl fmt::Display for Subchannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed status topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTopic {
    /// Producer identity (second level of the topic).
    pub identity: String,
    /// Target subchannel.
    pub subchannel: Subchannel,
}

/// Validate a producer identity for use as a single topic level.
///
/// # Errors
///
/// Returns [`ParseError::InvalidIdentity`] if the identity is empty or
/// contains a level separator or a wildcard. Every identity that
/// [`TopicCodec::parse_status_topic`] yields passes this check.
pub fn validate_identity(identity: &str) -> Result<(), ParseError> {
    if identity.is_empty() {
        return Err(ParseError::InvalidIdentity("identity cannot be empty"));
    }
    if identity.contains(&['/', '+', '#'][..]) {
        return Err(ParseError::InvalidIdentity(
            "identity cannot contain '/', '+' or '#'",
        ));
    }
    Ok(())
}

/// Maps between bus topics and producer addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCodec {
    status_root: String,
    command_root: String,
}

impl TopicCodec {
    /// Create a codec for the given roots. Trailing separators are ignored.
    #[must_use]
    pub fn new(status_root: impl Into<String>, command_root: impl Into<String>) -> Self {
        Self {
            status_root: trim_root(status_root.into()),
            command_root: trim_root(command_root.into()),
        }
    }

    /// Wildcard filters covering every producer status topic.
    ///
    /// The two-level filter is the primary one; the single-level filter
    /// picks up bare `<root>/<identity>` publications.
    #[must_use]
    pub fn status_filters(&self) -> [String; 2] {
        [
            format!("{}/+/+", self.status_root),
            format!("{}/+", self.status_root),
        ]
    }

    /// Parse a status topic into producer identity and subchannel.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the topic is outside the status root,
    /// lacks an identity, or has more than two levels below the root.
    pub fn parse_status_topic(&self, topic: &str) -> Result<StatusTopic, ParseError> {
        let rest = topic
            .strip_prefix(self.status_root.as_str())
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| ParseError::WrongRoot(topic.to_string()))?;

        let mut levels = rest.split('/');
        let identity = match levels.next() {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ParseError::MissingIdentity(topic.to_string())),
        };
        let subchannel = levels.next();
        if levels.next().is_some() {
            return Err(ParseError::TooManySegments(topic.to_string()));
        }

        Ok(StatusTopic {
            identity: identity.to_string(),
            subchannel: Subchannel::from_segment(subchannel),
        })
    }

    /// Build the command topic addressed to one producer.
    #[must_use]
    pub fn build_command_topic(&self, identity: &str) -> String {
        format!("{}/{}", self.command_root, identity)
    }
}

impl Default for TopicCodec {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_ROOT, DEFAULT_COMMAND_ROOT)
    }
}

fn trim_root(root: String) -> String {
    match root.strip_suffix('/') {
        Some(trimmed) => trimmed.to_string(),
        None => root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices_topic() {
        let codec = TopicCodec::default();
        let parsed = codec.parse_status_topic("media/status/nodeA/devices").unwrap();
        assert_eq!(parsed.identity, "nodeA");
        assert_eq!(parsed.subchannel, Subchannel::Devices);
    }

    #[test]
    fn test_parse_other_subchannel_is_media_info() {
        let codec = TopicCodec::default();
        let parsed = codec.parse_status_topic("media/status/nodeA/media").unwrap();
        assert_eq!(parsed.subchannel, Subchannel::MediaInfo);

        let parsed = codec.parse_status_topic("media/status/nodeA/info").unwrap();
        assert_eq!(parsed.subchannel, Subchannel::MediaInfo);
    }

    #[test]
    fn test_parse_bare_identity_defaults_to_media_info() {
        let codec = TopicCodec::default();
        let parsed = codec.parse_status_topic("media/status/nodeB").unwrap();
        assert_eq!(parsed.identity, "nodeB");
        assert_eq!(parsed.subchannel, Subchannel::MediaInfo);
    }

    #[test]
    fn test_parse_errors() {
        let codec = TopicCodec::default();
        assert!(matches!(
            codec.parse_status_topic("media/commands/nodeA"),
            Err(ParseError::WrongRoot(_))
        ));
        assert!(matches!(
            codec.parse_status_topic("media/statusnodeA/devices"),
            Err(ParseError::WrongRoot(_))
        ));
        assert!(matches!(
            codec.parse_status_topic("media/status"),
            Err(ParseError::WrongRoot(_))
        ));
        assert!(matches!(
            codec.parse_status_topic("media/status/"),
            Err(ParseError::MissingIdentity(_))
        ));
        assert!(matches!(
            codec.parse_status_topic("media/status//devices"),
            Err(ParseError::MissingIdentity(_))
        ));
        assert!(matches!(
            codec.parse_status_topic("media/status/nodeA/devices/extra"),
            Err(ParseError::TooManySegments(_))
        ));
    }

    #[test]
    fn test_build_command_topic() {
        let codec = TopicCodec::default();
        assert_eq!(codec.build_command_topic("nodeA"), "media/commands/nodeA");

        let custom = TopicCodec::new("home/status/", "home/cmd/");
        assert_eq!(custom.build_command_topic("den"), "home/cmd/den");
        assert_eq!(custom.status_filters()[0], "home/status/+/+");
        assert_eq!(custom.status_filters()[1], "home/status/+");
    }

    #[test]
    fn test_validate_identity() {
        assert!(validate_identity("living-room-pc").is_ok());
        assert!(validate_identity("").is_err());
        assert!(validate_identity("a/b").is_err());
        assert!(validate_identity("node+").is_err());
        assert!(validate_identity("#").is_err());
        assert!(validate_identity(&"n".repeat(200)).is_ok());
    }

    #[test]
    fn test_parsed_identities_are_valid() {
        let codec = TopicCodec::default();
        let long = "n".repeat(200);
        for topic in [
            format!("media/status/{long}/devices"),
            "media/status/node\u{1}A".to_string(),
            "media/status/живая-комната/media".to_string(),
        ] {
            let parsed = codec.parse_status_topic(&topic).unwrap();
            assert!(validate_identity(&parsed.identity).is_ok(), "{topic}");
        }
    }
}
