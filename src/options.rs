//! Probe pass configuration

use crate::error::{ProbeError, Result};
use crate::signature::{lookup, Descriptor};
use crate::types::Usage;
use serde::{Deserialize, Serialize};

/// Which usage categories take part in a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageFilter {
    #[default]
    All,
    Only(Vec<Usage>),
    Exclude(Vec<Usage>),
}

impl UsageFilter {
    fn allows(&self, usage: Usage) -> bool {
        match self {
            Self::All => true,
            Self::Only(list) => list.contains(&usage),
            Self::Exclude(list) => !list.contains(&usage),
        }
    }
}

/// Which formats, by name, take part in a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFilter {
    #[default]
    All,
    Only(Vec<String>),
    Exclude(Vec<String>),
}

impl TypeFilter {
    fn names(&self) -> &[String] {
        match self {
            Self::All => &[],
            Self::Only(list) | Self::Exclude(list) => list,
        }
    }

    fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(list) => list.iter().any(|n| n == name),
            Self::Exclude(list) => !list.iter().any(|n| n == name),
        }
    }
}

/// Options for a probe pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeOptions {
    /// Usage categories to probe for
    pub usage: UsageFilter,
    /// Format names to probe for
    pub types: TypeFilter,
    /// Devices no larger than this are not probed at all
    pub min_device_size: u64,
    /// Reject headers whose stored checksum does not match
    pub verify_checksums: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            usage: UsageFilter::All,
            types: TypeFilter::All,
            min_device_size: 1024,
            verify_checksums: true,
        }
    }
}

impl ProbeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Restricts the pass to the given usage filter
    pub fn with_usage(mut self, usage: UsageFilter) -> Self {
        self.usage = usage;
        self
    }

    /// Restricts the pass to the given type filter
    pub fn with_types(mut self, types: TypeFilter) -> Self {
        self.types = types;
        self
    }

    /// Sets the tiny-device threshold
    pub fn with_min_device_size(mut self, size: u64) -> Self {
        self.min_device_size = size;
        self
    }

    /// Accepts headers with stale checksums
    pub fn without_checksums(mut self) -> Self {
        self.verify_checksums = false;
        self
    }

    /// Every type name must be a registered format
    pub fn validate(&self) -> Result<()> {
        match self.types.names().iter().find(|n| lookup(n).is_none()) {
            Some(unknown) => Err(ProbeError::InvalidOptions(format!(
                "unknown format type: {unknown}"
            ))),
            None => Ok(()),
        }
    }

    /// True if the descriptor survives both filters
    pub fn allows(&self, descriptor: &Descriptor) -> bool {
        self.usage.allows(descriptor.usage) && self.types.allows(descriptor.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ProbeOptions::default();
        assert_eq!(opts.min_device_size, 1024);
        assert!(opts.verify_checksums);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_filters() {
        let ntfs = lookup("ntfs").unwrap();
        let lvm = lookup("LVM2_member").unwrap();

        let opts = ProbeOptions::new().with_usage(UsageFilter::Only(vec![Usage::Raid]));
        assert!(!opts.allows(ntfs));
        assert!(opts.allows(lvm));

        let opts = ProbeOptions::new().with_types(TypeFilter::Exclude(vec!["ntfs".into()]));
        assert!(!opts.allows(ntfs));
        assert!(opts.allows(lvm));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let opts = ProbeOptions::new().with_types(TypeFilter::Only(vec!["reiser5".into()]));
        assert!(matches!(opts.validate(), Err(ProbeError::InvalidOptions(_))));
    }

    #[test]
    fn test_from_json() {
        let opts = ProbeOptions::from_json(
            r#"{"usage": {"exclude": ["raid"]}, "verify_checksums": false}"#,
        )
        .unwrap();
        assert_eq!(opts.usage, UsageFilter::Exclude(vec![Usage::Raid]));
        assert!(!opts.verify_checksums);
        assert_eq!(opts.min_device_size, 1024);

        assert!(ProbeOptions::from_json(r#"{"types": {"only": ["nope"]}}"#).is_err());
        assert!(ProbeOptions::from_json("not json").is_err());
    }
}
