use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SessionId);

impl SessionId {
    /// Session ids are positive; anything else is rejected at the boundary.
    pub fn new(raw: i64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }
}

/// Integer grid cell, serialized as a two-element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub const ORIGIN: GridCoord = GridCoord { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<[i32; 2]> for GridCoord {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<GridCoord> for [i32; 2] {
    fn from(value: GridCoord) -> Self {
        [value.x, value.y]
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingCategory {
    Mine,
    Storage,
    Factory,
    WasteDisposal,
    DronePort,
}

impl BuildingCategory {
    pub const ALL: [BuildingCategory; 5] = [
        BuildingCategory::Factory,
        BuildingCategory::Mine,
        BuildingCategory::Storage,
        BuildingCategory::WasteDisposal,
        BuildingCategory::DronePort,
    ];

    /// Label used by the simulation for the `type` of a new building and in tooltips.
    pub fn label(self) -> &'static str {
        match self {
            BuildingCategory::Mine => "mine",
            BuildingCategory::Storage => "storage",
            BuildingCategory::Factory => "factory",
            BuildingCategory::WasteDisposal => "waste disposal",
            BuildingCategory::DronePort => "drone port",
        }
    }
}

impl fmt::Display for BuildingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Ok,
    Error,
}
