//! Human-readable text for tooltips and the buildings panel.

use std::fmt::Display;

use crate::scene::{Building, BuildingKind, Delivery, Drone};

const MISSING: &str = "N/A";

fn or_missing<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| MISSING.to_string(), |value| value.to_string())
}

fn joined_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(", ")
    }
}

pub fn building_tooltip(building: &Building) -> String {
    let name = if building.name.is_empty() {
        "Unnamed"
    } else {
        building.name.as_str()
    };
    let mut lines = vec![
        name.to_string(),
        format!("Coordinates: {}", building.coordinate),
        format!("Type: {}", building.type_label()),
    ];

    if let BuildingKind::WasteDisposal(waste) = &building.kind {
        lines.push(format!("Dispose Amount: {}", waste.dispose_amount));
        lines.push(format!("Capacity:      {}", or_missing(waste.capacity)));
        lines.push(format!("Interval:      {}", or_missing(waste.dispose_interval)));
        lines.push(format!("Waste Types:   {}", joined_or(&waste.waste_types, "None")));
        lines.push(format!("Current Amount:   {}", or_missing(waste.current_amount)));
        lines.push(format!("Predicted Amount: {}", or_missing(waste.predicted_amount)));
    } else {
        let inventory: Vec<String> = building
            .inventory
            .iter()
            .map(|(item, quantity)| format!("{item}: {quantity}"))
            .collect();
        lines.push(format!("Req Policy: {}", or_missing(building.request_policy.as_deref())));
        lines.push(format!("Src Policy: {}", or_missing(building.source_policy.as_deref())));
        lines.push(format!("Sources: {}", joined_or(&building.sources, "None")));
        lines.push(match building.request_count {
            0 => "Requests: None".to_string(),
            count => format!("Requests: {count} request(s)"),
        });
        lines.push(format!("Inventory: {}", joined_or(&inventory, "Empty")));
    }

    match &building.kind {
        BuildingKind::Storage {
            stores,
            capacity,
            remain,
        } => {
            lines.push(format!("Stores:   {stores}"));
            lines.push(format!("Capacity: {}", or_missing(*capacity)));
            lines.push(format!("Remain:   {}", or_missing(*remain)));
            lines.push(match building.deliveries.len() {
                0 => "Deliveries: None".to_string(),
                count => format!("Deliveries: {count} delivery(ies)"),
            });
        }
        BuildingKind::DronePort { drones } => {
            let in_use = drones.iter().filter(|drone| drone.in_use).count();
            lines.push(format!("Drones (in use/total): {in_use}/{}", drones.len()));
            for (offset, drone) in drones.iter().enumerate() {
                let status = if drone.in_use {
                    format!("busy ({} left)", or_missing(drone.timeleft))
                } else {
                    "idle".to_string()
                };
                lines.push(format!("· Drone {}: {status}", offset + 1));
            }
        }
        BuildingKind::Mine { .. } | BuildingKind::WasteDisposal(_) | BuildingKind::Factory { .. } => {}
    }

    lines.join("\n")
}

pub fn drone_tooltip(number: usize, drone: &Drone) -> String {
    let mut lines = vec![
        format!("Drone {number}"),
        format!("Status: {}", if drone.in_use { "busy" } else { "idle" }),
    ];
    if drone.in_use {
        lines.push(format!("ETA: {}", or_missing(drone.timeleft)));
    }
    lines.join("\n")
}

pub fn delivery_tooltip(delivery: &Delivery) -> String {
    format!(
        "Req {}\nTo: {}\nETA: {}",
        or_missing(delivery.request_id),
        or_missing(delivery.requester.as_deref()),
        or_missing(delivery.timeleft)
    )
}

/// One line of the buildings panel.
pub fn panel_label(building: &Building) -> String {
    match &building.kind {
        BuildingKind::Factory { factory_type } => {
            format!("{} ({})", building.name, or_missing(factory_type.as_deref()))
        }
        BuildingKind::Mine { ingredient } => format!("{} (mine: {ingredient})", building.name),
        BuildingKind::Storage { stores, .. } => format!("{} (stores: {stores})", building.name),
        BuildingKind::WasteDisposal(waste) => format!(
            "{} (disposeAmt: {}, cap: {}, interval: {})",
            building.name,
            waste.dispose_amount,
            or_missing(waste.capacity),
            or_missing(waste.dispose_interval)
        ),
        BuildingKind::DronePort { drones } => {
            let in_use = drones.iter().filter(|drone| drone.in_use).count();
            format!(
                "{} (drones in use/total: {in_use}/{})",
                building.name,
                drones.len()
            )
        }
    }
}
