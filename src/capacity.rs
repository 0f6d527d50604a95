//! Capacity Model: instance-type tag -> nominal
//! network capacity. Loaded once at startup from the `cap-map` flag.

use std::collections::HashMap;

use crate::error::CapacityError;

#[derive(Debug, Clone)]
pub struct CapacityModel {
    capacity_by_instance_type: HashMap<String, f64>,
}

impl CapacityModel {
    pub fn new(capacity_by_instance_type: HashMap<String, f64>) -> Self {
        Self {
            capacity_by_instance_type,
        }
    }

    /// Nominal MB/s ceiling for the given instance type. The same value is
    /// used as the inbound and outbound ceiling; role-specific maxima are
    /// derived later by the Limits Calculator applying its percentage.
    pub fn capacity(&self, instance_type: &str) -> Result<f64, CapacityError> {
        self.capacity_by_instance_type
            .get(instance_type)
            .copied()
            .ok_or_else(|| CapacityError::UnknownInstanceType(instance_type.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CapacityModel {
        CapacityModel::new(HashMap::from([
            ("m5.xlarge".to_owned(), 125.0),
            ("m5.2xlarge".to_owned(), 250.0),
        ]))
    }

    #[test]
    fn resolves_known_instance_type() {
        assert_eq!(model().capacity("m5.xlarge"), Ok(125.0));
    }

    #[test]
    fn fails_on_unknown_instance_type() {
        assert_eq!(
            model().capacity("c5.large"),
            Err(CapacityError::UnknownInstanceType("c5.large".to_owned()))
        );
    }
}
