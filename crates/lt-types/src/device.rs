//! Compute device descriptors (`cpu`, `cuda:1`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::LtError;

/// Environment variable holding the preferred default device.
pub const DEVICE_ENV: &str = "LIGHTER_DEVICE";

/// A named compute device with an optional ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Device {
    pub name: String,
    pub index: Option<usize>,
}

impl Device {
    pub fn new(name: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    pub fn cpu() -> Self {
        Self::new("cpu", None)
    }

    pub fn cuda(index: usize) -> Self {
        Self::new("cuda", Some(index))
    }

    pub fn is_cuda(&self) -> bool {
        self.name == "cuda"
    }

    /// Resolve the default device for this process.
    ///
    /// `LIGHTER_DEVICE` wins when it parses; otherwise a non-empty
    /// `CUDA_VISIBLE_DEVICES` selects `cuda:0`, and everything else falls back
    /// to the CPU.
    pub fn detect() -> Self {
        if let Ok(value) = std::env::var(DEVICE_ENV) {
            if let Ok(device) = value.parse() {
                return device;
            }
        }
        match std::env::var("CUDA_VISIBLE_DEVICES") {
            Ok(visible) if !visible.trim().is_empty() && visible.trim() != "-1" => Self::cuda(0),
            _ => Self::cpu(),
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}:{}", self.name, index),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for Device {
    type Err = LtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, index) = match s.split_once(':') {
            Some((name, index)) => {
                let index = index.parse::<usize>().map_err(|_| {
                    LtError::Validation(format!("invalid device ordinal in '{s}'"))
                })?;
                (name, Some(index))
            }
            None => (s, None),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(LtError::Validation(format!("invalid device name '{s}'")));
        }
        Ok(Self::new(name.to_ascii_lowercase(), index))
    }
}

impl TryFrom<String> for Device {
    type Error = LtError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_named_and_indexed_devices() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::cpu());
        assert_eq!("cuda:3".parse::<Device>().unwrap(), Device::cuda(3));
        assert_eq!("CUDA:1".parse::<Device>().unwrap(), Device::cuda(1));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
        assert!("gpu 0".parse::<Device>().is_err());
    }

    #[test]
    fn test_display_matches_bucket_keys() {
        assert_eq!(Device::cuda(2).to_string(), "cuda:2");
        assert_eq!(Device::cpu().to_string(), "cpu");
    }

    #[test]
    fn test_serde_uses_string_form() {
        let json = serde_json::to_string(&Device::cuda(0)).unwrap();
        assert_eq!(json, "\"cuda:0\"");
        let back: Device = serde_json::from_str(&json).unwrap();
        assert!(back.is_cuda());
    }
}
