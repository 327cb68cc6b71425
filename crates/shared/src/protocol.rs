use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{BuildingCategory, GridCoord, SessionId, UpdateStatus},
    error::ProtocolError,
};

pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// Outgoing `{id, command}` envelope for the command channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: SessionId,
    pub command: String,
}

/// Outgoing `{id, jsonData}` envelope for the new-building and load channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDataEnvelope<T> {
    pub id: SessionId,
    #[serde(rename = "jsonData")]
    pub json_data: T,
}

/// A building as the simulation serializes it. Every field is optional on the
/// wire; the category is inferred from which fields are present.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildingRecord {
    pub name: String,
    pub coordinate: Option<GridCoord>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    #[serde(rename = "type")]
    pub factory_type: Option<String>,
    pub mine: Option<String>,
    pub stores: Option<String>,
    pub capacity: Option<i64>,
    pub remain: Option<i64>,
    pub priority: Option<f64>,
    pub dispose_amount: Option<i64>,
    pub dispose_interval: Option<i64>,
    pub waste_types: Option<Vec<String>>,
    pub current_amount: Option<i64>,
    pub predicted_amount: Option<i64>,
    pub drones: Option<Vec<DroneRecord>>,
    pub request_policy: Option<String>,
    pub source_policy: Option<String>,
    pub sources: Option<Vec<SourceLink>>,
    pub requests: Option<Vec<Value>>,
    pub inventory: Option<BTreeMap<String, i64>>,
    pub deliveries: Option<Vec<DeliveryRecord>>,
}

impl BuildingRecord {
    /// Explicit coordinate first, then the legacy `x`/`y` pair, then the origin.
    pub fn grid_position(&self) -> GridCoord {
        self.coordinate.unwrap_or_else(|| {
            GridCoord::new(self.x.unwrap_or_default(), self.y.unwrap_or_default())
        })
    }
}

/// One entry of a building's `sources`: either `[name, r1, c1, r2, c2]` or a bare name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SourceLink {
    Name(String),
    Path(Vec<Value>),
}

impl SourceLink {
    pub fn name(&self) -> Option<&str> {
        match self {
            SourceLink::Name(name) => Some(name),
            SourceLink::Path(parts) => parts.first().and_then(Value::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DroneRecord {
    pub coordinate: Option<GridCoord>,
    pub source: Option<GridCoord>,
    pub in_use: bool,
    #[serde(alias = "currTime")]
    pub timeleft: Option<i64>,
    #[serde(rename = "requestID")]
    pub request_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct DeliveryRecord {
    pub coordinate: Option<GridCoord>,
    #[serde(rename = "requestID")]
    pub request_id: Option<i64>,
    pub requester: Option<String>,
    pub timeleft: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RoadRecord {
    pub coordinate: GridCoord,
    /// Unit step towards the next cell; absent for isolated cells.
    pub direction: Option<GridCoord>,
}

/// The parts of a full state payload the client reads. Each field is merged
/// only when present.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct StatePayload {
    pub cycle: Option<u64>,
    pub buildings: Option<Vec<BuildingRecord>>,
    pub roads: Option<Vec<RoadRecord>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateBody {
    /// `raw` is the payload exactly as received, kept for save-to-file.
    State { state: StatePayload, raw: Value },
    Error { message: String },
}

impl UpdateBody {
    pub fn status(&self) -> UpdateStatus {
        match self {
            UpdateBody::State { .. } => UpdateStatus::Ok,
            UpdateBody::Error { .. } => UpdateStatus::Error,
        }
    }
}

/// A result from the command, new-building or load-command topics.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub id: SessionId,
    pub body: UpdateBody,
}

/// A result from the load-session topic. The request carries no envelope, so
/// the id is optional here.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLoadResult {
    pub id: Option<SessionId>,
    pub body: UpdateBody,
}

pub fn decode_update(text: &str) -> Result<Update, ProtocolError> {
    let mut top = parse_object(text)?;
    let id = top
        .remove("id")
        .filter(|value| !value.is_null())
        .ok_or(ProtocolError::MissingSessionId)
        .and_then(parse_session_id)?;
    Ok(Update {
        id,
        body: decode_body(top)?,
    })
}

pub fn decode_session_load(text: &str) -> Result<SessionLoadResult, ProtocolError> {
    let mut top = parse_object(text)?;
    let id = match top.remove("id") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_session_id(value)?),
    };
    Ok(SessionLoadResult {
        id,
        body: decode_body(top)?,
    })
}

fn parse_object(text: &str) -> Result<Map<String, Value>, ProtocolError> {
    match serde_json::from_str::<Value>(text).map_err(ProtocolError::InvalidJson)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProtocolError::NotAnObject),
    }
}

fn parse_session_id(value: Value) -> Result<SessionId, ProtocolError> {
    let raw = match &value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    raw.and_then(SessionId::new)
        .ok_or(ProtocolError::InvalidSessionId(value))
}

// The server wraps results as `{id, jsonData: {...}}`; the flat form carries
// the same keys at the top level.
fn decode_body(mut top: Map<String, Value>) -> Result<UpdateBody, ProtocolError> {
    let mut payload = match top.remove("jsonData") {
        Some(Value::Object(inner)) => inner,
        Some(Value::Null) | None => top.clone(),
        Some(_) => return Err(ProtocolError::NotAnObject),
    };

    let is_error = [&payload, &top]
        .iter()
        .any(|map| map.get("status").and_then(Value::as_str) == Some("error"));
    if is_error {
        let message = ["message", "details", "error"]
            .iter()
            .find_map(|key| {
                payload
                    .get(*key)
                    .or_else(|| top.get(*key))
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
            })
            .unwrap_or(DEFAULT_ERROR_MESSAGE)
            .to_string();
        return Ok(UpdateBody::Error { message });
    }

    payload.remove("status");
    let raw = Value::Object(payload);
    let state = StatePayload::deserialize(&raw).map_err(ProtocolError::MalformedState)?;
    Ok(UpdateBody::State { state, raw })
}

/// Category-specific settings of a building created from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildingSpec {
    Factory {
        recipes: Vec<String>,
    },
    Mine {
        ingredient: String,
    },
    Storage {
        stores: String,
        capacity: i64,
        priority: f64,
    },
    WasteDisposal {
        dispose_amount: i64,
        capacity: i64,
        dispose_interval: i64,
        waste_types: Vec<String>,
    },
    DronePort {
        initial_drone_count: i64,
    },
}

impl BuildingSpec {
    pub fn category(&self) -> BuildingCategory {
        match self {
            BuildingSpec::Factory { .. } => BuildingCategory::Factory,
            BuildingSpec::Mine { .. } => BuildingCategory::Mine,
            BuildingSpec::Storage { .. } => BuildingCategory::Storage,
            BuildingSpec::WasteDisposal { .. } => BuildingCategory::WasteDisposal,
            BuildingSpec::DronePort { .. } => BuildingCategory::DronePort,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBuildingRequest {
    pub name: String,
    pub coordinate: GridCoord,
    pub spec: BuildingSpec,
}

/// Wire shape `{type, name, info}` expected on the new-building channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBuildingPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub info: Map<String, Value>,
}

impl NewBuildingRequest {
    pub fn to_payload(&self) -> Result<NewBuildingPayload, ProtocolError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ProtocolError::InvalidNewBuilding(
                "building name must not be empty".to_string(),
            ));
        }

        let mut info = Map::new();
        info.insert(
            "coordinate".to_string(),
            Value::from(vec![self.coordinate.x, self.coordinate.y]),
        );
        match &self.spec {
            BuildingSpec::Factory { recipes } => {
                let recipes: Vec<&str> = recipes
                    .iter()
                    .map(|recipe| recipe.trim())
                    .filter(|recipe| !recipe.is_empty())
                    .collect();
                let Some(first) = recipes.first() else {
                    return Err(ProtocolError::InvalidNewBuilding(
                        "a factory needs at least one recipe".to_string(),
                    ));
                };
                info.insert("type".to_string(), Value::from(*first));
                info.insert("recipes".to_string(), Value::from(recipes.clone()));
            }
            BuildingSpec::Mine { ingredient } => {
                info.insert("mine".to_string(), Value::from(ingredient.as_str()));
            }
            BuildingSpec::Storage {
                stores,
                capacity,
                priority,
            } => {
                info.insert("stores".to_string(), Value::from(stores.as_str()));
                info.insert("capacity".to_string(), Value::from(*capacity));
                info.insert("priority".to_string(), Value::from(*priority));
            }
            BuildingSpec::WasteDisposal {
                dispose_amount,
                capacity,
                dispose_interval,
                waste_types,
            } => {
                info.insert("disposeAmount".to_string(), Value::from(*dispose_amount));
                info.insert("capacity".to_string(), Value::from(*capacity));
                info.insert(
                    "disposeInterval".to_string(),
                    Value::from(*dispose_interval),
                );
                let waste_types: Vec<&str> = waste_types
                    .iter()
                    .map(|waste| waste.trim())
                    .filter(|waste| !waste.is_empty())
                    .collect();
                info.insert("wasteTypes".to_string(), Value::from(waste_types));
            }
            BuildingSpec::DronePort {
                initial_drone_count,
            } => {
                info.insert(
                    "initialDroneCount".to_string(),
                    Value::from(*initial_drone_count),
                );
            }
        }

        Ok(NewBuildingPayload {
            kind: self.spec.category().label().to_string(),
            name: name.to_string(),
            info,
        })
    }
}
