use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// What a recognized format is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Usage {
    Filesystem,
    Raid,
    Crypto,
    Other,
}

impl Usage {
    pub const ALL: [Usage; 4] = [Self::Filesystem, Self::Raid, Self::Crypto, Self::Other];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Raid => "raid",
            Self::Crypto => "crypto",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Usage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Little => "LE",
            Self::Big => "BE",
        }
    }
}

fn as_hex<S: Serializer>(raw: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(raw))
}

/// A volume identifier: the bytes found on disk and the string form
/// the format conventionally presents them in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VolumeId {
    #[serde(serialize_with = "as_hex")]
    pub raw: Vec<u8>,
    pub text: String,
}

impl VolumeId {
    pub fn new(raw: impl Into<Vec<u8>>, text: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            text: text.into(),
        }
    }
}

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Where the signature that identified the format was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MagicLocation {
    pub offset: u64,
    #[serde(serialize_with = "as_hex")]
    pub bytes: Vec<u8>,
}

/// The outcome of one successful probe pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeRecord {
    pub name: &'static str,
    pub usage: Usage,
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_raw: Option<Vec<u8>>,
    pub uuid: Option<VolumeId>,
    pub uuid_sub: Option<VolumeId>,
    pub log_uuid: Option<VolumeId>,
    pub version: Option<String>,
    pub block_size: Option<u32>,
    pub fs_size: Option<u64>,
    pub sector_size: Option<u32>,
    pub endianness: Option<Endianness>,
    pub magic: Option<MagicLocation>,
    pub extra: BTreeMap<&'static str, String>,
}

impl ProbeRecord {
    pub fn uuid_text(&self) -> Option<&str> {
        self.uuid.as_ref().map(|u| u.text.as_str())
    }
}

/// Result of a probe pass that managed to read the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "record", rename_all = "snake_case")]
pub enum Verdict {
    Recognized(ProbeRecord),
    NotRecognized,
}

impl Verdict {
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        matches!(self, Self::Recognized(_))
    }

    pub fn record(&self) -> Option<&ProbeRecord> {
        match self {
            Self::Recognized(r) => Some(r),
            Self::NotRecognized => None,
        }
    }

    pub fn into_record(self) -> Option<ProbeRecord> {
        match self {
            Self::Recognized(r) => Some(r),
            Self::NotRecognized => None,
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        self.record().map(|r| r.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_names() {
        assert_eq!(Usage::Filesystem.to_string(), "filesystem");
        assert_eq!(Usage::Raid.name(), "raid");
        assert_eq!(Usage::ALL.len(), 4);
    }

    #[test]
    fn test_verdict_accessors() {
        assert!(!Verdict::NotRecognized.is_recognized());
        assert_eq!(Verdict::NotRecognized.name(), None);
    }

    #[test]
    fn test_volume_id_serializes_raw_as_hex() {
        let id = VolumeId::new(vec![0xde, 0xad], "DEAD");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json["raw"], "dead");
        assert_eq!(json["text"], "DEAD");
        assert_eq!(id.to_string(), "DEAD");
    }
}
