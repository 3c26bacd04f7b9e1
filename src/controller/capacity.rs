//! Capacity bounds and the durable fleet record.

use serde::{Deserialize, Serialize};

/// Capacity validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("min {min} is greater than max {max}")]
    BoundsInverted { min: u32, max: u32 },

    #[error("desired {desired} is outside [{min}, {max}]")]
    DesiredOutOfBounds { desired: u32, min: u32, max: u32 },
}

/// Size bounds of a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySpec {
    pub min: u32,
    pub max: u32,
    pub desired: u32,
}

impl Default for CapacitySpec {
    fn default() -> Self {
        Self {
            min: 1,
            max: 4,
            desired: 2,
        }
    }
}

impl CapacitySpec {
    pub fn new(min: u32, max: u32, desired: u32) -> Result<Self, CapacityError> {
        let spec = Self { min, max, desired };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), CapacityError> {
        if self.min > self.max {
            return Err(CapacityError::BoundsInverted {
                min: self.min,
                max: self.max,
            });
        }
        if self.desired < self.min || self.desired > self.max {
            return Err(CapacityError::DesiredOutOfBounds {
                desired: self.desired,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Member count the controller drives toward.
    pub fn target(&self) -> u32 {
        self.desired.max(self.min).min(self.max)
    }

    /// Same bounds, new desired count.
    pub fn with_desired(self, desired: u32) -> Result<Self, CapacityError> {
        Self::new(self.min, self.max, desired)
    }
}

/// Payload persisted in the versioned state store, one per desired-state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetRecord {
    pub fleet_id: String,
    pub capacity: CapacitySpec,
    /// Fencing token of the lease under which this record was written.
    pub fencing_token: u64,
    pub updated_by: String,
}

impl FleetRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
