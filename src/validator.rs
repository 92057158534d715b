//! Stage admission checks
//!
//! Pure, stateless validation of candidate stage events against permit
//! rules. Nothing here touches the chain: callers fetch the active zones
//! and permits from the registry and hand them in, which keeps every check
//! trivially testable and safe to run in parallel.
//!
//! Collection admission checks, in order: known species, in season
//! (wrap-aware), under the per-collection yield cap, inside at least one
//! active zone. Each failure carries the specific reason, never a generic
//! rejection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::error::LedgerError;
use crate::record::StageKind;
use crate::registry::{HerbPermit, Month, Zone};

/// Why a candidate event was rejected
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("unknown species: no active permit for {species}")]
    UnknownSpecies { species: String },

    #[error("out of season: {species} may be collected {start} through {end}, not {month}")]
    OutOfSeason {
        species: String,
        start: Month,
        end: Month,
        month: Month,
    },

    #[error("over yield limit: {weight_kg} kg exceeds the {max_kg} kg per-collection cap for {species}")]
    OverYieldLimit {
        species: String,
        weight_kg: f64,
        max_kg: f64,
    },

    #[error("out of zone: point ({lat}, {lng}) is not inside any active collection zone")]
    OutOfZone { lat: f64, lng: f64 },

    #[error("incomplete measurements: {metric} is required by the permit but was not reported")]
    MetricMissing { metric: String },

    #[error("non-compliant: {metric} measured {measured} {unit}, limit is {max} {unit}")]
    MetricExceeded {
        metric: String,
        measured: f64,
        max: f64,
        unit: String,
    },
}

/// Accept/reject decision for a candidate stage event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "admission", rename_all = "snake_case")]
pub enum Admission {
    Accepted {
        permit_id: String,
        /// Matching zone for collection events; `None` for quality events
        zone_id: Option<String>,
    },
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            Admission::Rejected(reason) => Some(reason),
            Admission::Accepted { .. } => None,
        }
    }
}

/// Candidate collection event, prior to becoming a chain record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCandidate {
    pub species: String,
    pub lat: f64,
    pub lng: f64,
    pub weight_kg: f64,
    pub month: Month,
}

impl CollectionCandidate {
    pub fn new(species: &str, lat: f64, lng: f64, weight_kg: f64, month: Month) -> Self {
        Self {
            species: species.to_string(),
            lat,
            lng,
            weight_kg,
            month,
        }
    }
}

/// Decide admission of a collection event against the active permits and zones.
///
/// If multiple zones overlap the point, the first containing zone (by
/// registry order) is reported; admission succeeds if any zone contains it.
pub fn admit_collection(
    permits: &[HerbPermit],
    zones: &[Zone],
    candidate: &CollectionCandidate,
) -> Admission {
    let permit = match permits
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(&candidate.species))
    {
        Some(permit) => permit,
        None => {
            return Admission::Rejected(RejectReason::UnknownSpecies {
                species: candidate.species.clone(),
            })
        }
    };

    if !permit.in_season(candidate.month) {
        return Admission::Rejected(RejectReason::OutOfSeason {
            species: permit.name.clone(),
            start: permit.season_start,
            end: permit.season_end,
            month: candidate.month,
        });
    }

    if candidate.weight_kg > permit.max_yield_per_collection_kg {
        return Admission::Rejected(RejectReason::OverYieldLimit {
            species: permit.name.clone(),
            weight_kg: candidate.weight_kg,
            max_kg: permit.max_yield_per_collection_kg,
        });
    }

    let zone = zones
        .iter()
        .find(|z| z.bounds.contains(candidate.lat, candidate.lng));
    match zone {
        Some(zone) => Admission::Accepted {
            permit_id: permit.id.clone(),
            zone_id: Some(zone.id.clone()),
        },
        None => Admission::Rejected(RejectReason::OutOfZone {
            lat: candidate.lat,
            lng: candidate.lng,
        }),
    }
}

/// Decide admission of quality measurements against a permit's standards.
///
/// Every metric the permit defines must be reported (missing metrics reject
/// as incomplete) and each measured value must be at or below its maximum
/// (inclusive). The first missing metric is reported before any exceedance,
/// so an incomplete submission is never mistaken for a failed one.
pub fn admit_quality(permit: &HerbPermit, measurements: &BTreeMap<String, f64>) -> Admission {
    for metric in permit.quality_standards.keys() {
        if !measurements.contains_key(metric) {
            return Admission::Rejected(RejectReason::MetricMissing {
                metric: metric.clone(),
            });
        }
    }

    for (metric, threshold) in &permit.quality_standards {
        let measured = measurements[metric];
        if measured > threshold.max {
            return Admission::Rejected(RejectReason::MetricExceeded {
                metric: metric.clone(),
                measured,
                max: threshold.max,
                unit: threshold.unit.clone(),
            });
        }
    }

    Admission::Accepted {
        permit_id: permit.id.clone(),
        zone_id: None,
    }
}

/// Structural admission for a record about to be appended: predecessor
/// arity per stage, and a non-empty payload. Processing and batch stages
/// have no permit gating; upstream validation is already embedded in the
/// chain they reference.
pub fn admit_structural(
    stage: StageKind,
    payload: &Map<String, Value>,
    predecessor_count: usize,
) -> Result<(), LedgerError> {
    if payload.is_empty() {
        return Err(LedgerError::EmptyPayload(stage));
    }

    let expected = match stage {
        StageKind::Collection if predecessor_count == 0 => return Ok(()),
        StageKind::Quality if predecessor_count == 1 => return Ok(()),
        StageKind::Processing | StageKind::Batch if predecessor_count >= 1 => return Ok(()),
        StageKind::Collection => "no",
        StageKind::Quality => "exactly one",
        StageKind::Processing | StageKind::Batch => "at least one",
    };

    Err(LedgerError::PredecessorArity {
        stage,
        expected,
        actual: predecessor_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BoundingBox, QualityThreshold};
    use chrono::Utc;

    fn test_permit() -> HerbPermit {
        HerbPermit {
            id: "herb_1".to_string(),
            name: "Ashwagandha".to_string(),
            scientific_name: "Withania somnifera".to_string(),
            season_start: Month::October,
            season_end: Month::March,
            max_yield_per_collection_kg: 50.0,
            quality_standards: BTreeMap::from([(
                "moisture".to_string(),
                QualityThreshold {
                    max: 12.0,
                    unit: "%".to_string(),
                },
            )]),
            active: true,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    fn test_zone() -> Zone {
        Zone {
            id: "zone_1".to_string(),
            name: "Rajasthan Zone 1".to_string(),
            bounds: BoundingBox {
                min_lat: 26.9124,
                min_lng: 75.7873,
                max_lat: 27.2124,
                max_lng: 76.0873,
            },
            max_yield_kg: 500.0,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    fn candidate() -> CollectionCandidate {
        CollectionCandidate {
            species: "Ashwagandha".to_string(),
            lat: 27.0,
            lng: 75.9,
            weight_kg: 25.5,
            month: Month::January,
        }
    }

    #[test]
    fn test_collection_accepted() {
        let admission = admit_collection(&[test_permit()], &[test_zone()], &candidate());
        assert_eq!(
            admission,
            Admission::Accepted {
                permit_id: "herb_1".to_string(),
                zone_id: Some("zone_1".to_string()),
            }
        );
    }

    #[test]
    fn test_unknown_species_rejected() {
        let mut c = candidate();
        c.species = "Brahmi".to_string();
        let admission = admit_collection(&[test_permit()], &[test_zone()], &c);
        assert!(matches!(
            admission.rejection(),
            Some(RejectReason::UnknownSpecies { .. })
        ));
    }

    #[test]
    fn test_season_wrap_accepts_december_rejects_july() {
        let mut c = candidate();
        c.month = Month::December;
        assert!(admit_collection(&[test_permit()], &[test_zone()], &c).is_accepted());

        c.month = Month::July;
        let admission = admit_collection(&[test_permit()], &[test_zone()], &c);
        assert!(matches!(
            admission.rejection(),
            Some(RejectReason::OutOfSeason { .. })
        ));
    }

    #[test]
    fn test_yield_cap_inclusive() {
        let mut c = candidate();
        c.weight_kg = 50.0;
        assert!(admit_collection(&[test_permit()], &[test_zone()], &c).is_accepted());

        c.weight_kg = 50.1;
        let admission = admit_collection(&[test_permit()], &[test_zone()], &c);
        assert!(matches!(
            admission.rejection(),
            Some(RejectReason::OverYieldLimit { .. })
        ));
    }

    #[test]
    fn test_zone_bounds_inclusive() {
        let zone = test_zone();

        // Exactly on the corner is inside
        let mut c = candidate();
        c.lat = zone.bounds.min_lat;
        c.lng = zone.bounds.min_lng;
        assert!(admit_collection(&[test_permit()], &[zone.clone()], &c).is_accepted());

        // 0.0001 degrees outside every box rejects
        c.lat = zone.bounds.min_lat - 0.0001;
        let admission = admit_collection(&[test_permit()], &[zone], &c);
        assert!(matches!(
            admission.rejection(),
            Some(RejectReason::OutOfZone { .. })
        ));
    }

    #[test]
    fn test_overlapping_zones_any_match_admits() {
        let zone_a = test_zone();
        let mut zone_b = test_zone();
        zone_b.id = "zone_2".to_string();

        let admission = admit_collection(&[test_permit()], &[zone_a, zone_b], &candidate());
        assert_eq!(
            admission,
            Admission::Accepted {
                permit_id: "herb_1".to_string(),
                zone_id: Some("zone_1".to_string()),
            }
        );
    }

    #[test]
    fn test_quality_threshold_inclusive() {
        let permit = test_permit();

        let at_limit = BTreeMap::from([("moisture".to_string(), 12.0)]);
        assert!(admit_quality(&permit, &at_limit).is_accepted());

        let over = BTreeMap::from([("moisture".to_string(), 13.0)]);
        let admission = admit_quality(&permit, &over);
        match admission.rejection() {
            Some(RejectReason::MetricExceeded { metric, .. }) => assert_eq!(metric, "moisture"),
            other => panic!("expected MetricExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_quality_missing_metric_is_incomplete() {
        let permit = test_permit();
        let admission = admit_quality(&permit, &BTreeMap::new());
        assert!(matches!(
            admission.rejection(),
            Some(RejectReason::MetricMissing { .. })
        ));
    }

    #[test]
    fn test_structural_arity() {
        let payload: Map<String, Value> =
            [("k".to_string(), Value::from("v"))].into_iter().collect();

        assert!(admit_structural(StageKind::Collection, &payload, 0).is_ok());
        assert!(admit_structural(StageKind::Collection, &payload, 1).is_err());
        assert!(admit_structural(StageKind::Quality, &payload, 1).is_ok());
        assert!(admit_structural(StageKind::Quality, &payload, 2).is_err());
        assert!(admit_structural(StageKind::Processing, &payload, 0).is_err());
        assert!(admit_structural(StageKind::Processing, &payload, 3).is_ok());
        assert!(admit_structural(StageKind::Batch, &payload, 1).is_ok());
    }

    #[test]
    fn test_structural_empty_payload() {
        let result = admit_structural(StageKind::Processing, &Map::new(), 1);
        assert!(matches!(result, Err(LedgerError::EmptyPayload(_))));
    }
}
