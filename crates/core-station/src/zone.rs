//! Soft admission accounting per station.
//!
//! `en_route` counts AGVs dispatched toward the station but not yet in the
//! queue; `occupied` counts AGVs inside it (slots + processing cell). The
//! dispatcher refuses to assign a station whose total load has reached the
//! physical queue capacity, which caps the worst-case pile-up at the
//! capacity (3 slots + 1 processing = 4).

use crate::StationId;
use std::collections::BTreeMap;

pub const DEFAULT_ZONE_CAPACITY: usize = 4;

#[derive(Debug, Default, Clone, Copy)]
struct Zone {
    en_route: usize,
    occupied: usize,
}

#[derive(Debug, Default)]
pub struct ZoneManager {
    zones: BTreeMap<StationId, Zone>,
    capacity: usize,
}

impl ZoneManager {
    pub fn new<'a>(stations: impl IntoIterator<Item = &'a StationId>, capacity: usize) -> Self {
        Self {
            zones: stations
                .into_iter()
                .map(|sid| (sid.clone(), Zone::default()))
                .collect(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_load(&self, sid: &StationId) -> usize {
        self.zones
            .get(sid)
            .map(|z| z.en_route + z.occupied)
            .unwrap_or(usize::MAX)
    }

    /// An AGV was dispatched toward the station.
    pub fn reserve(&mut self, sid: &StationId) {
        if let Some(z) = self.zones.get_mut(sid) {
            z.en_route += 1;
        }
    }

    /// Undo a `reserve` whose dispatch was abandoned before arrival.
    pub fn cancel_reserve(&mut self, sid: &StationId) {
        if let Some(z) = self.zones.get_mut(sid) {
            z.en_route = z.en_route.saturating_sub(1);
        }
    }

    /// The AGV arrived: en-route becomes occupied.
    pub fn enter(&mut self, sid: &StationId) {
        if let Some(z) = self.zones.get_mut(sid) {
            z.en_route = z.en_route.saturating_sub(1);
            z.occupied += 1;
        }
    }

    /// Reverse of `enter` for a retry that backs out of the queue while
    /// keeping its claim on the station (loaded-blocked replay).
    pub fn demote_to_en_route(&mut self, sid: &StationId) {
        if let Some(z) = self.zones.get_mut(sid) {
            z.occupied = z.occupied.saturating_sub(1);
            z.en_route += 1;
        }
    }

    /// The AGV finished and departed the station zone.
    pub fn exit(&mut self, sid: &StationId) {
        if let Some(z) = self.zones.get_mut(sid) {
            z.occupied = z.occupied.saturating_sub(1);
        }
    }
}
