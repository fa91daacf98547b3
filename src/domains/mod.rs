//! Ready-made pipeline definitions for the three bundled data domains.
//!
//! | Preset | Target table | Source |
//! |---|---|---|
//! | [`logistics`] | `deliveries` | delivery JSON + traffic side table |
//! | [`churn`] | `telco_churn` | telco customer CSV export |
//! | [`air_quality`] | `air_quality_data` | hourly pollutant series per city |

pub mod air_quality;
pub mod churn;
pub mod logistics;
