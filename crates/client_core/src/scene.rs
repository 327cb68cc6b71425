use std::collections::{BTreeMap, HashSet};

use shared::{
    domain::{BuildingCategory, GridCoord},
    protocol::{BuildingRecord, DeliveryRecord, DroneRecord, RoadRecord},
};
use thiserror::Error;
use tracing::warn;

use crate::tooltip;

const DRONE_RADIUS_FACTOR: f64 = 0.35;
const DELIVERY_RADIUS_FACTOR: f64 = 0.2;

#[derive(Debug, Error, PartialEq)]
#[error("invalid canvas size {width}x{height}")]
pub struct InvalidCanvasSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance_to(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Canvas size in pixels plus the size of one grid cell. Grid origin maps to
/// the canvas center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub cell_size: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64, cell_size: f64) -> Self {
        Self {
            width,
            height,
            cell_size,
        }
    }

    /// Top-left corner of a grid cell.
    pub fn to_screen(&self, coord: GridCoord) -> Point {
        Point::new(
            f64::from(coord.x) * self.cell_size + self.width / 2.0,
            f64::from(coord.y) * self.cell_size + self.height / 2.0,
        )
    }

    pub fn cell_center(&self, coord: GridCoord) -> Point {
        let corner = self.to_screen(coord);
        let half = self.cell_size / 2.0;
        Point::new(corner.x + half, corner.y + half)
    }

    /// Background grid, vertical lines first, covering the canvas symmetrically
    /// around its center.
    pub fn grid_lines(&self) -> Vec<GridLine> {
        let half_width = self.width / 2.0;
        let half_height = self.height / 2.0;
        let columns = (half_width / self.cell_size).ceil() as i64;
        let rows = (half_height / self.cell_size).ceil() as i64;

        let vertical = (-columns..=columns).map(|i| {
            let x = i as f64 * self.cell_size + half_width;
            GridLine {
                from: Point::new(x, 0.0),
                to: Point::new(x, self.height),
            }
        });
        let horizontal = (-rows..=rows).map(|j| {
            let y = j as f64 * self.cell_size + half_height;
            GridLine {
                from: Point::new(0.0, y),
                to: Point::new(self.width, y),
            }
        });
        vertical.chain(horizontal).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLine {
    pub from: Point,
    pub to: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drone {
    pub coordinate: GridCoord,
    pub source: GridCoord,
    pub in_use: bool,
    pub timeleft: Option<i64>,
    pub request_id: Option<i64>,
}

impl From<&DroneRecord> for Drone {
    fn from(record: &DroneRecord) -> Self {
        let coordinate = record.coordinate.unwrap_or_default();
        Self {
            coordinate,
            source: record.source.unwrap_or(coordinate),
            in_use: record.in_use,
            timeleft: record.timeleft,
            request_id: record.request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub coordinate: Option<GridCoord>,
    pub request_id: Option<i64>,
    pub requester: Option<String>,
    pub timeleft: Option<i64>,
}

impl From<&DeliveryRecord> for Delivery {
    fn from(record: &DeliveryRecord) -> Self {
        Self {
            coordinate: record.coordinate,
            request_id: record.request_id,
            requester: record.requester.clone(),
            timeleft: record.timeleft,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WasteDisposal {
    pub dispose_amount: i64,
    pub capacity: Option<i64>,
    pub dispose_interval: Option<i64>,
    pub waste_types: Vec<String>,
    pub current_amount: Option<i64>,
    pub predicted_amount: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildingKind {
    Mine {
        ingredient: String,
    },
    Storage {
        stores: String,
        capacity: Option<i64>,
        remain: Option<i64>,
    },
    WasteDisposal(WasteDisposal),
    DronePort {
        drones: Vec<Drone>,
    },
    Factory {
        factory_type: Option<String>,
    },
}

impl BuildingKind {
    pub fn category(&self) -> BuildingCategory {
        match self {
            BuildingKind::Mine { .. } => BuildingCategory::Mine,
            BuildingKind::Storage { .. } => BuildingCategory::Storage,
            BuildingKind::WasteDisposal(_) => BuildingCategory::WasteDisposal,
            BuildingKind::DronePort { .. } => BuildingCategory::DronePort,
            BuildingKind::Factory { .. } => BuildingCategory::Factory,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub name: String,
    pub coordinate: GridCoord,
    pub kind: BuildingKind,
    pub request_policy: Option<String>,
    pub source_policy: Option<String>,
    pub sources: Vec<String>,
    pub request_count: usize,
    pub inventory: BTreeMap<String, i64>,
    pub deliveries: Vec<Delivery>,
    /// The record carried a drones sequence, possibly empty.
    pub has_drone_bay: bool,
}

impl Building {
    pub fn category(&self) -> BuildingCategory {
        self.kind.category()
    }

    /// Label shown after `Type:`; factories show their recipe type when known.
    pub fn type_label(&self) -> &str {
        match &self.kind {
            BuildingKind::Factory {
                factory_type: Some(factory_type),
            } => factory_type,
            kind => kind.category().label(),
        }
    }
}

/// Assigns exactly one category, first match wins: mine, storage,
/// waste disposal, drone port (non-empty drones), factory.
pub fn classify(record: &BuildingRecord) -> Building {
    let kind = if let Some(ingredient) = &record.mine {
        BuildingKind::Mine {
            ingredient: ingredient.clone(),
        }
    } else if let Some(stores) = &record.stores {
        BuildingKind::Storage {
            stores: stores.clone(),
            capacity: record.capacity,
            remain: record.remain,
        }
    } else if let Some(dispose_amount) = record.dispose_amount {
        BuildingKind::WasteDisposal(WasteDisposal {
            dispose_amount,
            capacity: record.capacity,
            dispose_interval: record.dispose_interval,
            waste_types: record.waste_types.clone().unwrap_or_default(),
            current_amount: record.current_amount,
            predicted_amount: record.predicted_amount,
        })
    } else if let Some(drones) = record.drones.as_ref().filter(|drones| !drones.is_empty()) {
        BuildingKind::DronePort {
            drones: drones.iter().map(Drone::from).collect(),
        }
    } else {
        BuildingKind::Factory {
            factory_type: record.factory_type.clone(),
        }
    };

    Building {
        name: record.name.clone(),
        coordinate: record.grid_position(),
        kind,
        request_policy: record.request_policy.clone(),
        source_policy: record.source_policy.clone(),
        sources: record
            .sources
            .iter()
            .flatten()
            .filter_map(|link| link.name().map(str::to_string))
            .collect(),
        request_count: record.requests.as_ref().map_or(0, Vec::len),
        inventory: record.inventory.clone().unwrap_or_default(),
        deliveries: record.deliveries.iter().flatten().map(Delivery::from).collect(),
        has_drone_bay: record.drones.is_some(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildingShape {
    /// Index into [`Scene::buildings`].
    pub building: usize,
    pub origin: Point,
    pub size: f64,
    pub tooltip: String,
}

impl BuildingShape {
    fn contains(&self, point: Point) -> bool {
        point.x >= self.origin.x
            && point.x < self.origin.x + self.size
            && point.y >= self.origin.y
            && point.y < self.origin.y + self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoadArrow {
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroneMarker {
    pub building: usize,
    /// 1-based position within its port.
    pub number: usize,
    pub center: Point,
    pub radius: f64,
    pub rotation_degrees: f64,
    pub tooltip: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryMarker {
    pub building: usize,
    pub request_id: Option<i64>,
    pub center: Point,
    pub radius: f64,
    pub tooltip: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTarget {
    Drone(usize),
    Building(usize),
    Delivery(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelSection {
    pub title: &'static str,
    pub entries: Vec<String>,
}

/// Classified, positioned scene derived from one state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub viewport: Viewport,
    pub cycle: u64,
    pub buildings: Vec<Building>,
    pub shapes: Vec<BuildingShape>,
    pub roads: Vec<RoadArrow>,
    pub drones: Vec<DroneMarker>,
    pub deliveries: Vec<DeliveryMarker>,
}

impl Scene {
    pub fn building(&self, name: &str) -> Option<&Building> {
        self.buildings.iter().find(|building| building.name == name)
    }

    /// Topmost element under the pointer: drones, then buildings, then
    /// deliveries. Within a layer, later elements are drawn on top.
    pub fn hit_test(&self, point: Point) -> Option<HitTarget> {
        if let Some(index) = self
            .drones
            .iter()
            .rposition(|drone| drone.center.distance_to(point) <= drone.radius)
        {
            return Some(HitTarget::Drone(index));
        }
        if let Some(index) = self.shapes.iter().rposition(|shape| shape.contains(point)) {
            return Some(HitTarget::Building(index));
        }
        self.deliveries
            .iter()
            .rposition(|delivery| delivery.center.distance_to(point) <= delivery.radius)
            .map(HitTarget::Delivery)
    }

    pub fn tooltip(&self, target: HitTarget) -> Option<&str> {
        match target {
            HitTarget::Drone(index) => self.drones.get(index).map(|d| d.tooltip.as_str()),
            HitTarget::Building(index) => self.shapes.get(index).map(|s| s.tooltip.as_str()),
            HitTarget::Delivery(index) => self.deliveries.get(index).map(|d| d.tooltip.as_str()),
        }
    }

    pub fn grid_lines(&self) -> Vec<GridLine> {
        self.viewport.grid_lines()
    }

    /// Side panel listing, one section per non-empty category.
    pub fn panel(&self) -> Vec<PanelSection> {
        BuildingCategory::ALL
            .into_iter()
            .filter_map(|category| {
                let entries: Vec<String> = self
                    .buildings
                    .iter()
                    .filter(|building| building.category() == category)
                    .map(tooltip::panel_label)
                    .collect();
                (!entries.is_empty()).then(|| PanelSection {
                    title: section_title(category),
                    entries,
                })
            })
            .collect()
    }
}

fn section_title(category: BuildingCategory) -> &'static str {
    match category {
        BuildingCategory::Factory => "Factories",
        BuildingCategory::Mine => "Mines",
        BuildingCategory::Storage => "Storage",
        BuildingCategory::WasteDisposal => "Waste Disposal",
        BuildingCategory::DronePort => "Drone Ports",
    }
}

pub struct ViewModelBuilder {
    viewport: Viewport,
}

impl ViewModelBuilder {
    pub fn new(viewport: Viewport) -> Self {
        Self { viewport }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Sizes must be finite and non-negative; the viewport is left as it was otherwise.
    pub fn resize(&mut self, width: f64, height: f64) -> Result<(), InvalidCanvasSize> {
        let valid = |size: f64| size.is_finite() && size >= 0.0;
        if !valid(width) || !valid(height) {
            return Err(InvalidCanvasSize { width, height });
        }
        self.viewport.width = width;
        self.viewport.height = height;
        Ok(())
    }

    pub fn build(&self, cycle: u64, records: &[BuildingRecord], roads: &[RoadRecord]) -> Scene {
        let viewport = self.viewport;
        let cell = viewport.cell_size;

        let mut seen = HashSet::new();
        let buildings: Vec<Building> = records
            .iter()
            .filter(|record| {
                let fresh = seen.insert(record.name.as_str());
                if !fresh {
                    warn!(name = %record.name, "scene: dropping duplicate building name");
                }
                fresh
            })
            .map(classify)
            .collect();

        let shapes = buildings
            .iter()
            .enumerate()
            .map(|(index, building)| BuildingShape {
                building: index,
                origin: viewport.to_screen(building.coordinate),
                size: cell,
                tooltip: tooltip::building_tooltip(building),
            })
            .collect();

        let road_arrows = roads
            .iter()
            .map(|road| {
                let start = viewport.cell_center(road.coordinate);
                let direction = road.direction.unwrap_or_default();
                RoadArrow {
                    start,
                    end: Point::new(
                        start.x + f64::from(direction.x) * cell,
                        start.y + f64::from(direction.y) * cell,
                    ),
                }
            })
            .collect();

        let mut drones = Vec::new();
        let mut deliveries = Vec::new();
        for (index, building) in buildings.iter().enumerate() {
            if let BuildingKind::DronePort { drones: port } = &building.kind {
                for (offset, drone) in port.iter().enumerate() {
                    let number = offset + 1;
                    drones.push(DroneMarker {
                        building: index,
                        number,
                        center: viewport.cell_center(drone.coordinate),
                        radius: cell * DRONE_RADIUS_FACTOR,
                        rotation_degrees: drone_rotation(drone),
                        tooltip: tooltip::drone_tooltip(number, drone),
                    });
                }
            }
            for delivery in &building.deliveries {
                let Some(coordinate) = delivery.coordinate else {
                    continue;
                };
                deliveries.push(DeliveryMarker {
                    building: index,
                    request_id: delivery.request_id,
                    center: viewport.cell_center(coordinate),
                    radius: cell * DELIVERY_RADIUS_FACTOR,
                    tooltip: tooltip::delivery_tooltip(delivery),
                });
            }
        }

        Scene {
            viewport,
            cycle,
            buildings,
            shapes,
            roads: road_arrows,
            drones,
            deliveries,
        }
    }
}

/// Heading from the drone's source to its current cell, in degrees.
pub fn drone_rotation(drone: &Drone) -> f64 {
    let dx = f64::from(drone.coordinate.x - drone.source.x);
    let dy = f64::from(drone.coordinate.y - drone.source.y);
    dy.atan2(dx).to_degrees()
}

#[cfg(test)]
#[path = "tests/scene_tests.rs"]
mod tests;
