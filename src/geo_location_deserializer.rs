use crate::domain::GeoLocation;
use serde::de::Error;
use serde::{Deserialize, Deserializer};

impl<'de> Deserialize<'de> for GeoLocation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Debug, Deserialize)]
        pub struct Inner {
            latitude: f64,
            longitude: f64,
        }

        let inner = Inner::deserialize(deserializer)?;
        GeoLocation::new(inner.latitude, inner.longitude).map_err(Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_a_valid_location() -> Result<(), serde_json::Error> {
        let location: GeoLocation = serde_json::from_str(r#"{ "latitude": 37.77, "longitude": -122.41 }"#)?;

        assert_eq!(
            location,
            GeoLocation {
                latitude: 37.77,
                longitude: -122.41
            }
        );
        Ok(())
    }

    #[test]
    fn deserialize_fails_for_an_out_of_range_latitude() {
        let result = serde_json::from_str::<GeoLocation>(r#"{ "latitude": 91.0, "longitude": 4.35 }"#);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().starts_with("invalid location latitude: 91"));
    }
}
