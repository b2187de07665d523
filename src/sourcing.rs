// ===============================
// src/sourcing.rs (nearest surplus + fallback vendor)
// ===============================
use ahash::AHashMap as HashMap;
use std::cmp::Ordering;

use crate::config::FallbackVendor;
use crate::deficit::InventoryIndex;
use crate::domain::{Deficit, GeoPoint, Source, SourceStock, SourcingMatch, StoreLocation};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance (haversine).
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lon.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lon.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // clamp guards asin against h creeping past 1.0 for antipodal points
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Store coordinates; first row wins on duplicates.
#[derive(Debug, Default)]
pub struct LocationBook {
    points: HashMap<String, GeoPoint>,
}

impl LocationBook {
    pub fn new(locations: &[StoreLocation]) -> Self {
        let mut points = HashMap::new();
        for l in locations {
            points.entry(l.store.clone()).or_insert(l.point);
        }
        Self { points }
    }

    pub fn get(&self, store: &str) -> Option<GeoPoint> {
        self.points.get(store).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    store: &'a str,
    stock: u64,
    distance_km: f64,
}

/// Smaller distance wins; equal distance -> smaller store id. Earlier input row
/// wins on full ties because `min_by` keeps the first minimum.
fn closer(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.store.cmp(b.store))
}

/// Match one deficit. `needy` is the deficit store's location (resolved by the caller).
///
/// Candidates: same product, other store, stock strictly above the deficit, known
/// coordinates. No candidate -> fallback vendor with unlimited stock.
pub fn match_deficit(
    deficit: &Deficit,
    needy: GeoPoint,
    inventory: &InventoryIndex,
    book: &LocationBook,
    fallback: &FallbackVendor,
) -> SourcingMatch {
    let best = inventory
        .holders_of(&deficit.product)
        .iter()
        .filter(|r| r.store != deficit.store && r.current_stock > deficit.quantity)
        .filter_map(|r| {
            let at = book.get(&r.store)?;
            Some(Candidate { store: &r.store, stock: r.current_stock, distance_km: haversine_km(needy, at) })
        })
        .min_by(closer);

    let (source, source_stock, distance_km) = match best {
        Some(c) => (Source::Store(c.store.to_string()), SourceStock::Units(c.stock), c.distance_km),
        None => (Source::FallbackVendor, SourceStock::Unlimited, haversine_km(needy, fallback.point)),
    };

    SourcingMatch {
        product: deficit.product.clone(),
        needy_store: deficit.store.clone(),
        source,
        distance_km,
        deficit: deficit.quantity,
        source_stock,
        suggested_quantity: deficit.quantity,
    }
}
