mod active_location;
mod geo_location;

pub use active_location::{ActiveLocationRecord, LiveMap, LiveSnapshot};
pub use geo_location::GeoLocation;
