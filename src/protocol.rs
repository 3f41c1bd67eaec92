//! Stream metadata exchanged with the stream service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sample format advertised for every channel of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFormat {
    Float32,
    Double64,
    String,
    Int32,
    Int16,
    Int8,
    Int64,
}

impl ChannelFormat {
    /// Whether samples of this format can be rendered as an audio-rate signal.
    ///
    /// Strings and the narrower/wider integer formats belong to the event path.
    pub fn is_audio_rate(self) -> bool {
        matches!(self, Self::Float32 | Self::Double64 | Self::Int32)
    }
}

impl fmt::Display for ChannelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float32 => "float32",
            Self::Double64 => "double64",
            Self::String => "string",
            Self::Int32 => "int32",
            Self::Int16 => "int16",
            Self::Int8 => "int8",
            Self::Int64 => "int64",
        };
        f.write_str(name)
    }
}

/// Descriptor property a resolution can filter on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKey {
    Name,
    Type,
    SourceId,
}

impl PropertyKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Type => "type",
            Self::SourceId => "source_id",
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyKey {
    type Err = String;

    /// Accepts `name`, `type`, `source_id`, with or without a leading dash.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('-') {
            "name" => Ok(Self::Name),
            "type" => Ok(Self::Type),
            "source_id" => Ok(Self::SourceId),
            other => Err(format!("unknown property {other:?}")),
        }
    }
}

/// Property filter applied during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFilter {
    pub key: PropertyKey,
    pub value: String,
}

impl PropertyFilter {
    pub fn new(key: PropertyKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    pub fn matches(&self, descriptor: &StreamDescriptor) -> bool {
        descriptor.property(self.key) == self.value
    }
}

/// Metadata describing one discovered stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub source_id: String,
    /// Unique per stream instance, assigned by the service
    pub uid: String,
    pub channel_count: usize,
    /// Nominal sampling rate in Hz; 0 marks an irregular stream
    pub nominal_srate: f64,
    pub channel_format: ChannelFormat,
}

impl StreamDescriptor {
    /// Value of the given property
    pub fn property(&self, key: PropertyKey) -> &str {
        match key {
            PropertyKey::Name => &self.name,
            PropertyKey::Type => &self.stream_type,
            PropertyKey::SourceId => &self.source_id,
        }
    }

    /// Whether the stream advertises no regular sampling rate
    pub fn is_irregular(&self) -> bool {
        !(self.nominal_srate.is_finite() && self.nominal_srate > 0.0)
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name: {}  |  type: {}  |  source_id: {}",
            self.name, self.stream_type, self.source_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor {
            name: "EEG-1".into(),
            stream_type: "EEG".into(),
            source_id: "amp-42".into(),
            uid: "uid".into(),
            channel_count: 8,
            nominal_srate: 500.0,
            channel_format: ChannelFormat::Float32,
        }
    }

    #[test]
    fn test_audio_rate_formats() {
        assert!(ChannelFormat::Float32.is_audio_rate());
        assert!(ChannelFormat::Double64.is_audio_rate());
        assert!(ChannelFormat::Int32.is_audio_rate());
        assert!(!ChannelFormat::String.is_audio_rate());
        assert!(!ChannelFormat::Int16.is_audio_rate());
        assert!(!ChannelFormat::Int8.is_audio_rate());
        assert!(!ChannelFormat::Int64.is_audio_rate());
    }

    #[test]
    fn test_property_key_parsing() {
        assert_eq!("-name".parse::<PropertyKey>(), Ok(PropertyKey::Name));
        assert_eq!("type".parse::<PropertyKey>(), Ok(PropertyKey::Type));
        assert_eq!("-source_id".parse::<PropertyKey>(), Ok(PropertyKey::SourceId));
        assert!("-channel".parse::<PropertyKey>().is_err());
    }

    #[test]
    fn test_filter_matches_property() {
        let d = descriptor();
        assert!(PropertyFilter::new(PropertyKey::Type, "EEG").matches(&d));
        assert!(PropertyFilter::new(PropertyKey::SourceId, "amp-42").matches(&d));
        assert!(!PropertyFilter::new(PropertyKey::Name, "EEG").matches(&d));
    }

    #[test]
    fn test_irregular_rate() {
        let mut d = descriptor();
        assert!(!d.is_irregular());
        d.nominal_srate = 0.0;
        assert!(d.is_irregular());
    }

    #[test]
    fn test_descriptor_serializes_type_field() {
        let json = serde_json::to_value(descriptor()).unwrap();
        assert_eq!(json["type"], "EEG");
        assert_eq!(json["channel_format"], "float32");
    }
}
