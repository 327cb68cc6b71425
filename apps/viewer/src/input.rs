//! Maps stdin lines to view gestures. Lines starting with `:` are viewer
//! actions; anything else is sent as a simulation command.

use std::{path::PathBuf, str::FromStr};

use anyhow::{anyhow, bail, Context, Result};
use client_core::{
    interaction::MenuAction,
    parse_command, parse_pin,
    scene::{Point, Scene},
    Gesture,
};
use shared::{
    domain::GridCoord,
    protocol::{BuildingSpec, NewBuildingRequest},
};

pub const HELP: &str = "\
viewer actions:
  :step                      step once with the current step count
  :steps <n>                 set the step count
  :auto                      toggle auto-step
  :hover <building>          show a building's tooltip
  :menu <building>           open a building's context menu
  :pick add-drone|remove     choose from the open context menu
  :buildings                 list buildings by category
  :new mine <name> <x> <y> <ingredient>
  :new storage <name> <x> <y> <item> <capacity> <priority>
  :new factory <name> <x> <y> <recipe>[,<recipe>...]
  :new waste <name> <x> <y> <amount> <capacity> <interval> <type>[,<type>...]
  :new port <name> <x> <y> <drones>
  :save <file>               save the next state update to a file
  :load <path>               load a saved state file
  :session <pin>             switch session
  :dismiss                   dismiss the current notification
  :quit
anything else is sent as a command, e.g. step 5 or connect 'M1' to 'F1'";

#[derive(Debug, PartialEq)]
pub enum Input {
    Gesture(Gesture),
    ListBuildings,
    Help,
}

/// `Ok(None)` for blank lines.
pub fn parse_line(line: &str, scene: &Scene) -> Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(action) = line.strip_prefix(':') else {
        return Ok(Some(Input::Gesture(Gesture::Command(parse_command(line)?))));
    };

    let (verb, rest) = action
        .split_once(char::is_whitespace)
        .map_or((action, ""), |(verb, rest)| (verb, rest.trim()));
    let gesture = match verb {
        "help" => return Ok(Some(Input::Help)),
        "buildings" => return Ok(Some(Input::ListBuildings)),
        "quit" => Gesture::Quit,
        "step" => Gesture::Step,
        "steps" => Gesture::SetStepCount(required(rest, "step count")?.to_string()),
        "auto" => Gesture::ToggleAutoStep,
        "hover" => Gesture::PointerMoved(building_center(scene, required(rest, "building")?)?),
        "menu" => Gesture::ContextClick(building_center(scene, required(rest, "building")?)?),
        "pick" => Gesture::MenuChoice(match required(rest, "menu action")? {
            "add-drone" => MenuAction::AddDrone,
            "remove" => MenuAction::Remove,
            other => bail!("unknown menu action '{other}'"),
        }),
        "new" => Gesture::CreateBuilding(new_building(rest)?),
        "save" => Gesture::Save(required(rest, "filename")?.to_string()),
        "load" => Gesture::Load(PathBuf::from(required(rest, "path")?)),
        "session" => Gesture::LoadSession(parse_pin(required(rest, "session pin")?)?),
        "dismiss" => Gesture::DismissNotification,
        other => bail!("unknown viewer action ':{other}' (try :help)"),
    };
    Ok(Some(Input::Gesture(gesture)))
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    if value.is_empty() {
        bail!("missing {what}");
    }
    Ok(value)
}

fn building_center(scene: &Scene, name: &str) -> Result<Point> {
    let index = scene
        .buildings
        .iter()
        .position(|building| building.name == name)
        .ok_or_else(|| anyhow!("no building named '{name}'"))?;
    let shape = scene
        .shapes
        .iter()
        .find(|shape| shape.building == index)
        .ok_or_else(|| anyhow!("building '{name}' is not on the map"))?;
    let half = shape.size / 2.0;
    Ok(Point::new(shape.origin.x + half, shape.origin.y + half))
}

fn number<T>(value: Option<&str>, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = value.ok_or_else(|| anyhow!("missing {what}"))?;
    value
        .parse()
        .with_context(|| format!("invalid {what} '{value}'"))
}

fn list(value: Option<&str>, what: &str) -> Result<Vec<String>> {
    let value = value.ok_or_else(|| anyhow!("missing {what}"))?;
    Ok(value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect())
}

fn new_building(rest: &str) -> Result<NewBuildingRequest> {
    let mut parts = rest.split_whitespace();
    let kind = parts.next().ok_or_else(|| anyhow!("missing building kind"))?;
    let name = parts.next().ok_or_else(|| anyhow!("missing building name"))?;
    let coordinate = GridCoord::new(number(parts.next(), "x")?, number(parts.next(), "y")?);

    let spec = match kind {
        "mine" => BuildingSpec::Mine {
            ingredient: parts
                .next()
                .ok_or_else(|| anyhow!("missing ingredient"))?
                .to_string(),
        },
        "storage" => BuildingSpec::Storage {
            stores: parts
                .next()
                .ok_or_else(|| anyhow!("missing stored item"))?
                .to_string(),
            capacity: number(parts.next(), "capacity")?,
            priority: number(parts.next(), "priority")?,
        },
        "factory" => BuildingSpec::Factory {
            recipes: list(parts.next(), "recipes")?,
        },
        "waste" => BuildingSpec::WasteDisposal {
            dispose_amount: number(parts.next(), "dispose amount")?,
            capacity: number(parts.next(), "capacity")?,
            dispose_interval: number(parts.next(), "dispose interval")?,
            waste_types: list(parts.next(), "waste types")?,
        },
        "port" => BuildingSpec::DronePort {
            initial_drone_count: number(parts.next(), "drone count")?,
        },
        other => bail!("unknown building kind '{other}'"),
    };
    if let Some(extra) = parts.next() {
        bail!("unexpected argument '{extra}'");
    }
    Ok(NewBuildingRequest {
        name: name.to_string(),
        coordinate,
        spec,
    })
}
