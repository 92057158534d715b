//! Permit registry: geofenced collection zones and herb permits
//!
//! Holds the rules that gate chain admission: where collection is allowed
//! (axis-aligned bounding boxes with a yield ceiling) and which species may
//! be collected under what season, weight and quality constraints.
//!
//! The registry is the sole writer of zone/permit state. Rows are never
//! physically deleted; retiring sets `active = false` and stamps
//! `deleted_at`, and retired rows stay readable by id for audit.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::LedgerError;

/// Calendar month, used for harvest season windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::January,
        Month::February,
        Month::March,
        Month::April,
        Month::May,
        Month::June,
        Month::July,
        Month::August,
        Month::September,
        Month::October,
        Month::November,
        Month::December,
    ];

    /// 1-based month number
    pub fn number(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_number(n: u32) -> Option<Month> {
        Month::ALL.get(n.checked_sub(1)? as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Month::January => "January",
            Month::February => "February",
            Month::March => "March",
            Month::April => "April",
            Month::May => "May",
            Month::June => "June",
            Month::July => "July",
            Month::August => "August",
            Month::September => "September",
            Month::October => "October",
            Month::November => "November",
            Month::December => "December",
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Month {
    type Err = String;

    /// Parses a full month name (case-insensitive) or a 1-12 number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u32>() {
            return Month::from_number(n).ok_or_else(|| format!("month out of range: {}", n));
        }
        Month::ALL
            .iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown month: {}", s))
    }
}

/// Axis-aligned geographic bounding box; both bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Inclusive containment on both axes
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.min_lat > self.max_lat {
            return Err(LedgerError::InvalidBounds(format!(
                "min_lat {} > max_lat {}",
                self.min_lat, self.max_lat
            )));
        }
        if self.min_lng > self.max_lng {
            return Err(LedgerError::InvalidBounds(format!(
                "min_lng {} > max_lng {}",
                self.min_lng, self.max_lng
            )));
        }
        Ok(())
    }
}

/// Geofenced collection zone with a yield ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub bounds: BoundingBox,
    /// Zone-wide yield ceiling in kg (cumulative enforcement is external)
    pub max_yield_kg: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a zone
#[derive(Debug, Clone, Deserialize)]
pub struct NewZone {
    pub name: String,
    pub bounds: BoundingBox,
    pub max_yield_kg: f64,
}

/// Partial update for a zone; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneUpdate {
    pub name: Option<String>,
    pub bounds: Option<BoundingBox>,
    pub max_yield_kg: Option<f64>,
}

/// Maximum-value quality threshold for one named metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThreshold {
    pub max: f64,
    pub unit: String,
}

/// Collection rules for one herb species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerbPermit {
    pub id: String,
    pub name: String,
    pub scientific_name: String,
    /// Inclusive harvest window; may wrap the year boundary (e.g. October-March)
    pub season_start: Month,
    pub season_end: Month,
    pub max_yield_per_collection_kg: f64,
    /// Metric name -> maximum allowed value (all thresholds are maxima)
    pub quality_standards: BTreeMap<String, QualityThreshold>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl HerbPermit {
    /// Inclusive season check, wrap-aware: an October-March window
    /// accepts December and rejects July.
    pub fn in_season(&self, month: Month) -> bool {
        let (s, e, m) = (
            self.season_start.number(),
            self.season_end.number(),
            month.number(),
        );
        if s <= e {
            m >= s && m <= e
        } else {
            m >= s || m <= e
        }
    }
}

/// Input for creating a permit
#[derive(Debug, Clone, Deserialize)]
pub struct NewPermit {
    pub name: String,
    pub scientific_name: String,
    pub season_start: Month,
    pub season_end: Month,
    pub max_yield_per_collection_kg: f64,
    #[serde(default)]
    pub quality_standards: BTreeMap<String, QualityThreshold>,
}

/// Partial update for a permit; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermitUpdate {
    pub name: Option<String>,
    pub scientific_name: Option<String>,
    pub season_start: Option<Month>,
    pub season_end: Option<Month>,
    pub max_yield_per_collection_kg: Option<f64>,
    pub quality_standards: Option<BTreeMap<String, QualityThreshold>>,
}

/// Registry of zones and herb permits, backed by two sled trees
#[derive(Clone)]
pub struct PermitRegistry {
    zones: sled::Tree,
    permits: sled::Tree,
}

impl PermitRegistry {
    /// Open the registry trees on an existing database
    pub fn open(db: &sled::Db) -> Result<Self, LedgerError> {
        Ok(Self {
            zones: db.open_tree("zones")?,
            permits: db.open_tree("permits")?,
        })
    }

    /// Seed the default demo zones and permits if the registry is empty.
    ///
    /// Returns whether anything was seeded.
    pub fn seed_defaults(&self) -> Result<bool, LedgerError> {
        if !self.zones.is_empty() || !self.permits.is_empty() {
            debug!("Registry already populated, skipping seed");
            return Ok(false);
        }

        for zone in default_zones() {
            self.put_zone(&zone)?;
        }
        for permit in default_permits() {
            self.put_permit(&permit)?;
        }

        info!(zones = 3, permits = 2, "Seeded default permit registry");
        Ok(true)
    }

    // --- Zones ---

    pub fn add_zone(&self, new: NewZone) -> Result<Zone, LedgerError> {
        new.bounds.validate()?;
        let zone = Zone {
            id: format!("zone_{}", Uuid::new_v4().simple()),
            name: new.name,
            bounds: new.bounds,
            max_yield_kg: new.max_yield_kg,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };
        self.put_zone(&zone)?;
        info!(zone_id = %zone.id, name = %zone.name, "Added collection zone");
        Ok(zone)
    }

    /// Apply a partial update and stamp the update time
    pub fn update_zone(&self, id: &str, update: ZoneUpdate) -> Result<Zone, LedgerError> {
        let mut zone = self
            .get_zone(id)?
            .ok_or_else(|| LedgerError::ZoneNotFound(id.to_string()))?;

        if let Some(name) = update.name {
            zone.name = name;
        }
        if let Some(bounds) = update.bounds {
            bounds.validate()?;
            zone.bounds = bounds;
        }
        if let Some(max_yield_kg) = update.max_yield_kg {
            zone.max_yield_kg = max_yield_kg;
        }
        zone.updated_at = Some(Utc::now());

        self.put_zone(&zone)?;
        Ok(zone)
    }

    /// Soft delete: sets `active = false` and stamps `deleted_at`
    pub fn retire_zone(&self, id: &str) -> Result<Zone, LedgerError> {
        let mut zone = self
            .get_zone(id)?
            .ok_or_else(|| LedgerError::ZoneNotFound(id.to_string()))?;
        zone.active = false;
        zone.deleted_at = Some(Utc::now());
        self.put_zone(&zone)?;
        info!(zone_id = %id, "Retired collection zone");
        Ok(zone)
    }

    /// Fetch a zone by id, including retired zones (for audit)
    pub fn get_zone(&self, id: &str) -> Result<Option<Zone>, LedgerError> {
        match self.zones.get(id.as_bytes())? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Active zones, ordered by id
    pub fn list_active_zones(&self) -> Result<Vec<Zone>, LedgerError> {
        let mut zones = Vec::new();
        for item in self.zones.iter() {
            let (_, value) = item?;
            let zone: Zone = decode(&value)?;
            if zone.active {
                zones.push(zone);
            }
        }
        Ok(zones)
    }

    // --- Permits ---

    pub fn add_permit(&self, new: NewPermit) -> Result<HerbPermit, LedgerError> {
        let permit = HerbPermit {
            id: format!("herb_{}", Uuid::new_v4().simple()),
            name: new.name,
            scientific_name: new.scientific_name,
            season_start: new.season_start,
            season_end: new.season_end,
            max_yield_per_collection_kg: new.max_yield_per_collection_kg,
            quality_standards: new.quality_standards,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        };
        self.put_permit(&permit)?;
        info!(permit_id = %permit.id, species = %permit.name, "Added herb permit");
        Ok(permit)
    }

    /// Apply a partial update and stamp the update time
    pub fn update_permit(&self, id: &str, update: PermitUpdate) -> Result<HerbPermit, LedgerError> {
        let mut permit = self
            .get_permit(id)?
            .ok_or_else(|| LedgerError::PermitNotFound(id.to_string()))?;

        if let Some(name) = update.name {
            permit.name = name;
        }
        if let Some(scientific_name) = update.scientific_name {
            permit.scientific_name = scientific_name;
        }
        if let Some(season_start) = update.season_start {
            permit.season_start = season_start;
        }
        if let Some(season_end) = update.season_end {
            permit.season_end = season_end;
        }
        if let Some(max_yield) = update.max_yield_per_collection_kg {
            permit.max_yield_per_collection_kg = max_yield;
        }
        if let Some(quality_standards) = update.quality_standards {
            permit.quality_standards = quality_standards;
        }
        permit.updated_at = Some(Utc::now());

        self.put_permit(&permit)?;
        Ok(permit)
    }

    /// Soft delete: sets `active = false` and stamps `deleted_at`
    pub fn retire_permit(&self, id: &str) -> Result<HerbPermit, LedgerError> {
        let mut permit = self
            .get_permit(id)?
            .ok_or_else(|| LedgerError::PermitNotFound(id.to_string()))?;
        permit.active = false;
        permit.deleted_at = Some(Utc::now());
        self.put_permit(&permit)?;
        info!(permit_id = %id, "Retired herb permit");
        Ok(permit)
    }

    /// Fetch a permit by id, including retired permits (for audit)
    pub fn get_permit(&self, id: &str) -> Result<Option<HerbPermit>, LedgerError> {
        match self.permits.get(id.as_bytes())? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Active permits, ordered by id
    pub fn list_active_permits(&self) -> Result<Vec<HerbPermit>, LedgerError> {
        let mut permits = Vec::new();
        for item in self.permits.iter() {
            let (_, value) = item?;
            let permit: HerbPermit = decode(&value)?;
            if permit.active {
                permits.push(permit);
            }
        }
        Ok(permits)
    }

    /// Find the active permit for a species by name (case-insensitive)
    pub fn find_active_permit(&self, species: &str) -> Result<Option<HerbPermit>, LedgerError> {
        Ok(self
            .list_active_permits()?
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(species)))
    }

    fn put_zone(&self, zone: &Zone) -> Result<(), LedgerError> {
        self.zones.insert(zone.id.as_bytes(), encode(zone)?)?;
        self.zones.flush()?;
        Ok(())
    }

    fn put_permit(&self, permit: &HerbPermit) -> Result<(), LedgerError> {
        self.permits.insert(permit.id.as_bytes(), encode(permit)?)?;
        self.permits.flush()?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
    rmp_serde::to_vec(value).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LedgerError> {
    rmp_serde::from_slice(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn seeded_zone(
    id: &str,
    name: &str,
    bounds: BoundingBox,
    max_yield_kg: f64,
    created_at: DateTime<Utc>,
) -> Zone {
    Zone {
        id: id.to_string(),
        name: name.to_string(),
        bounds,
        max_yield_kg,
        active: true,
        created_at,
        updated_at: None,
        deleted_at: None,
    }
}

/// Default demo zones (Rajasthan, Gujarat, Maharashtra)
fn default_zones() -> Vec<Zone> {
    let now = Utc::now();
    vec![
        seeded_zone(
            "zone_1",
            "Rajasthan Zone 1",
            BoundingBox {
                min_lat: 26.9124,
                min_lng: 75.7873,
                max_lat: 27.2124,
                max_lng: 76.0873,
            },
            500.0,
            now,
        ),
        seeded_zone(
            "zone_2",
            "Gujarat Zone 1",
            BoundingBox {
                min_lat: 23.0225,
                min_lng: 72.5714,
                max_lat: 23.3225,
                max_lng: 72.8714,
            },
            400.0,
            now,
        ),
        seeded_zone(
            "zone_3",
            "Maharashtra Zone 1",
            BoundingBox {
                min_lat: 19.0760,
                min_lng: 72.8777,
                max_lat: 19.3760,
                max_lng: 73.1777,
            },
            600.0,
            now,
        ),
    ]
}

/// Default demo permits (Ashwagandha, Turmeric)
fn default_permits() -> Vec<HerbPermit> {
    let now = Utc::now();
    let standards = |moisture_max: f64| -> BTreeMap<String, QualityThreshold> {
        BTreeMap::from([
            (
                "moisture".to_string(),
                QualityThreshold {
                    max: moisture_max,
                    unit: "%".to_string(),
                },
            ),
            (
                "pesticides".to_string(),
                QualityThreshold {
                    max: 0.01,
                    unit: "mg/kg".to_string(),
                },
            ),
            (
                "heavyMetals".to_string(),
                QualityThreshold {
                    max: 10.0,
                    unit: "ppm".to_string(),
                },
            ),
        ])
    };

    vec![
        HerbPermit {
            id: "herb_1".to_string(),
            name: "Ashwagandha".to_string(),
            scientific_name: "Withania somnifera".to_string(),
            season_start: Month::October,
            season_end: Month::March,
            max_yield_per_collection_kg: 50.0,
            quality_standards: standards(12.0),
            active: true,
            created_at: now,
            updated_at: None,
            deleted_at: None,
        },
        HerbPermit {
            id: "herb_2".to_string(),
            name: "Turmeric".to_string(),
            scientific_name: "Curcuma longa".to_string(),
            season_start: Month::January,
            season_end: Month::April,
            max_yield_per_collection_kg: 75.0,
            quality_standards: standards(10.0),
            active: true,
            created_at: now,
            updated_at: None,
            deleted_at: None,
        },
    ]
}
