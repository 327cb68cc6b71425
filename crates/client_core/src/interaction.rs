//! Gesture handling: turns hovers, context clicks, form submissions and the
//! auto-step toggle into [`Command`]s, and keeps the hover/menu state the
//! renderer draws.

use std::time::Duration;

use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::{
    commands::{Command, CommandError},
    scene::{Building, HitTarget, Point, Scene},
    transport::ConnectionState,
};

pub const DEFAULT_STEP_COUNT: u32 = 1;
const BUILDING_HOVER_OFFSET: f64 = 10.0;
const MARKER_HOVER_OFFSET: f64 = 5.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InteractionError {
    #[error("not connected to the simulation")]
    Disconnected,
    #[error("unavailable while auto-step is running")]
    AutoStepActive,
    #[error(transparent)]
    Invalid(#[from] CommandError),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HoverState {
    pub visible: bool,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    AddDrone,
    Remove,
}

impl MenuAction {
    pub fn label(self) -> &'static str {
        match self {
            MenuAction::AddDrone => "Add drone",
            MenuAction::Remove => "Remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextMenu {
    pub building: String,
    pub x: f64,
    pub y: f64,
    pub actions: Vec<MenuAction>,
}

/// Which controls a front end should enable right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affordances {
    /// Command forms, context menu actions, save and load.
    pub commands: bool,
    pub step: bool,
    pub step_input: bool,
    pub auto_step_toggle: bool,
}

/// Fixed-period repeating tick source. At most one task runs at a time.
///
/// Each tick carries the generation of the task that sent it, so a tick still
/// queued from an aborted task can be told apart from the current one.
pub struct AutoStepTimer {
    period: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl AutoStepTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            generation: 0,
            task: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// True only for ticks sent by the task currently running.
    pub fn is_current(&self, tick: u64) -> bool {
        self.task.is_some() && tick == self.generation
    }

    /// First tick arrives one full period after the call.
    pub fn start(&mut self, ticks: mpsc::UnboundedSender<u64>) {
        if self.task.is_some() {
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if ticks.send(generation).is_err() {
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for AutoStepTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct InteractionController {
    step_count: u32,
    connectivity: ConnectionState,
    auto_step: AutoStepTimer,
    hover: HoverState,
    menu: Option<ContextMenu>,
}

impl InteractionController {
    pub fn new(auto_step_period: Duration) -> Self {
        Self {
            step_count: DEFAULT_STEP_COUNT,
            connectivity: ConnectionState::Disconnected,
            auto_step: AutoStepTimer::new(auto_step_period),
            hover: HoverState::default(),
            menu: None,
        }
    }

    pub fn set_connectivity(&mut self, connectivity: ConnectionState) {
        self.connectivity = connectivity;
    }

    pub fn is_auto_stepping(&self) -> bool {
        self.auto_step.is_running()
    }

    pub fn affordances(&self) -> Affordances {
        let connected = self.connectivity == ConnectionState::Connected;
        let auto = self.auto_step.is_running();
        Affordances {
            commands: connected,
            step: connected && !auto,
            step_input: !auto,
            auto_step_toggle: connected,
        }
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    /// Parses the step count field. Rejected while auto-step runs.
    pub fn set_step_input(&mut self, input: &str) -> Result<u32, InteractionError> {
        if self.auto_step.is_running() {
            return Err(InteractionError::AutoStepActive);
        }
        let value = input.trim();
        let count: u32 = value.parse().map_err(|source| CommandError::InvalidInteger {
            value: value.to_string(),
            context: "step count",
            source,
        })?;
        if count == 0 {
            return Err(CommandError::NonPositiveStep.into());
        }
        self.step_count = count;
        Ok(count)
    }

    fn require_connected(&self) -> Result<(), InteractionError> {
        if self.connectivity == ConnectionState::Connected {
            Ok(())
        } else {
            Err(InteractionError::Disconnected)
        }
    }

    /// The manual Step action.
    pub fn step(&self) -> Result<Command, InteractionError> {
        self.submit(Command::Step(self.step_count))
    }

    /// Validates a form submission or typed command.
    pub fn submit(&self, command: Command) -> Result<Command, InteractionError> {
        self.require_connected()?;
        if matches!(command, Command::Step(_)) && self.auto_step.is_running() {
            return Err(InteractionError::AutoStepActive);
        }
        command.validate()?;
        Ok(command)
    }

    /// Returns whether auto-step is running after the toggle.
    pub fn toggle_auto_step(
        &mut self,
        ticks: &mpsc::UnboundedSender<u64>,
    ) -> Result<bool, InteractionError> {
        if self.auto_step.is_running() {
            self.auto_step.stop();
            info!("interaction: auto-step stopped");
            return Ok(false);
        }
        self.require_connected()?;
        self.auto_step.start(ticks.clone());
        info!(
            period_ms = self.auto_step.period().as_millis() as u64,
            step_count = self.step_count,
            "interaction: auto-step started"
        );
        Ok(true)
    }

    /// Command for one auto-step tick, using the step count current now.
    /// Ticks from a stopped or replaced timer task yield nothing.
    pub fn auto_step_command(&self, tick: u64) -> Option<Command> {
        self.auto_step
            .is_current(tick)
            .then_some(Command::Step(self.step_count))
    }

    pub fn hover(&self) -> &HoverState {
        &self.hover
    }

    pub fn hover_enter(&mut self, target: HitTarget, pointer: Point, text: impl Into<String>) {
        let offset = match target {
            HitTarget::Building(_) => BUILDING_HOVER_OFFSET,
            HitTarget::Drone(_) | HitTarget::Delivery(_) => MARKER_HOVER_OFFSET,
        };
        self.hover = HoverState {
            visible: true,
            x: pointer.x + offset,
            y: pointer.y + offset,
            text: text.into(),
        };
    }

    pub fn hover_leave(&mut self) {
        self.hover = HoverState::default();
    }

    /// Moves the pointer over the scene. Returns true when the hover changed.
    pub fn pointer_moved(&mut self, scene: &Scene, pointer: Point) -> bool {
        let before = self.hover.clone();
        match scene
            .hit_test(pointer)
            .and_then(|target| scene.tooltip(target).map(|text| (target, text.to_string())))
        {
            Some((target, text)) => self.hover_enter(target, pointer, text),
            None => self.hover_leave(),
        }
        self.hover != before
    }

    pub fn context_menu(&self) -> Option<&ContextMenu> {
        self.menu.as_ref()
    }

    pub fn open_context_menu(&mut self, building: &Building, pointer: Point) -> &ContextMenu {
        let mut actions = Vec::with_capacity(2);
        if building.has_drone_bay {
            actions.push(MenuAction::AddDrone);
        }
        actions.push(MenuAction::Remove);
        debug!(building = %building.name, "interaction: context menu opened");
        self.menu.insert(ContextMenu {
            building: building.name.clone(),
            x: pointer.x,
            y: pointer.y,
            actions,
        })
    }

    pub fn close_context_menu(&mut self) {
        self.menu = None;
    }

    /// Picks an entry from the open menu and closes it.
    pub fn choose(&mut self, action: MenuAction) -> Result<Command, InteractionError> {
        let menu = self
            .menu
            .take()
            .ok_or(CommandError::MissingArgument("context menu"))?;
        if !menu.actions.contains(&action) {
            return Err(CommandError::UnexpectedToken(action.label().to_string()).into());
        }
        let building = menu.building;
        self.submit(match action {
            MenuAction::AddDrone => Command::AddDrone { building },
            MenuAction::Remove => Command::Remove { building },
        })
    }

    pub fn shutdown(&mut self) {
        self.auto_step.stop();
        self.menu = None;
        self.hover_leave();
    }
}

#[cfg(test)]
#[path = "tests/interaction_tests.rs"]
mod tests;
