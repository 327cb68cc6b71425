use serde_json::Value;
use shared::{
    domain::SessionId,
    error::ProtocolError,
    protocol::{
        BuildingRecord, CommandEnvelope, JsonDataEnvelope, NewBuildingRequest, RoadRecord,
        SessionLoadResult, StatePayload, Update, UpdateBody,
    },
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    commands::{Command, CommandError},
    session::Session,
    transport::{ConnectionState, Destination, Transport, TransportError},
};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no active session")]
    NoSession,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything the view renders, mutated only through the named actions below.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub session: Session,
    pub cycle: u64,
    pub buildings: Vec<BuildingRecord>,
    pub roads: Vec<RoadRecord>,
    pub notification: Option<String>,
    pub pending_save: Option<String>,
}

impl ViewState {
    pub fn set_session(&mut self, id: Option<SessionId>) {
        self.session.id = id;
    }

    pub fn set_connectivity(&mut self, connectivity: ConnectionState) {
        self.session.connectivity = connectivity;
    }

    /// Overwrites only the fields the payload carries.
    pub fn merge_update(&mut self, state: &StatePayload) {
        if let Some(cycle) = state.cycle {
            self.cycle = cycle;
        }
        if let Some(buildings) = &state.buildings {
            self.buildings = buildings.clone();
        }
        if let Some(roads) = &state.roads {
            self.roads = roads.clone();
        }
    }

    /// Replaces the whole snapshot; absent fields reset to empty.
    pub fn replace_state(&mut self, state: &StatePayload) {
        self.cycle = state.cycle.unwrap_or_default();
        self.buildings = state.buildings.clone().unwrap_or_default();
        self.roads = state.roads.clone().unwrap_or_default();
    }

    pub fn notify(&mut self, message: impl Into<String>) {
        self.notification = Some(message.into());
    }

    pub fn dismiss_notification(&mut self) {
        self.notification = None;
    }
}

/// Full payload of the update that answered a save request.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveArtifact {
    pub filename: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Addressed to another session; nothing changed.
    Ignored { received: SessionId },
    Failed { message: String },
    Applied { save: Option<SaveArtifact> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionLoadOutcome {
    Ignored,
    Failed { message: String },
    /// The id should be persisted as the last successful session.
    Loaded { id: SessionId },
}

/// Stamps outgoing messages with the active session and filters what comes back.
pub struct SessionCommandRouter<T: Transport> {
    transport: T,
    state: ViewState,
}

impl<T: Transport> SessionCommandRouter<T> {
    pub fn new(transport: T, session: Option<SessionId>) -> Self {
        let mut state = ViewState::default();
        state.set_session(session);
        Self { transport, state }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.session.id
    }

    pub fn set_connectivity(&mut self, connectivity: ConnectionState) {
        self.state.set_connectivity(connectivity);
    }

    pub fn dismiss_notification(&mut self) {
        self.state.dismiss_notification();
    }

    fn active_session(&self) -> Result<SessionId, RouterError> {
        self.state.session.id.ok_or(RouterError::NoSession)
    }

    fn publish(&self, destination: Destination, payload: String) -> Result<(), RouterError> {
        debug!(destination = destination.path(), %payload, "router: publishing");
        self.transport.publish(destination, payload)?;
        Ok(())
    }

    /// A `save` command, typed or requested, leaves its filename pending once
    /// it has gone out.
    pub fn dispatch(&mut self, command: &Command) -> Result<(), RouterError> {
        command.validate()?;
        let id = self.active_session()?;
        let envelope = CommandEnvelope {
            id,
            command: command.to_string(),
        };
        self.publish(Destination::Command, serde_json::to_string(&envelope)?)?;
        if let Command::Save { filename } = command {
            self.state.pending_save = Some(filename.clone());
        }
        Ok(())
    }

    pub fn create_building(&self, request: &NewBuildingRequest) -> Result<(), RouterError> {
        let id = self.active_session()?;
        let envelope = JsonDataEnvelope {
            id,
            json_data: request.to_payload()?,
        };
        self.publish(Destination::NewBuilding, serde_json::to_string(&envelope)?)
    }

    /// Submits a previously saved full state to replace the simulation.
    pub fn load_state(&self, state: Value) -> Result<(), RouterError> {
        let id = self.active_session()?;
        let envelope = JsonDataEnvelope {
            id,
            json_data: state,
        };
        self.publish(Destination::LoadCommand, serde_json::to_string(&envelope)?)
    }

    /// Switches the active session, then asks the broker for its state.
    pub fn load_session(&mut self, id: SessionId) -> Result<(), RouterError> {
        if self.state.session.id != Some(id) {
            info!(session_id = id.0, "router: switching session");
        }
        self.state.set_session(Some(id));
        self.publish(Destination::LoadSession, id.to_string())
    }

    pub fn request_save(&mut self, filename: &str) -> Result<(), RouterError> {
        self.dispatch(&Command::Save {
            filename: filename.to_string(),
        })
    }

    pub fn on_update(&mut self, update: Update) -> UpdateOutcome {
        if self.state.session.id != Some(update.id) {
            debug!(
                received = update.id.0,
                active = ?self.state.session.id.map(|id| id.0),
                "router: ignoring update for another session"
            );
            return UpdateOutcome::Ignored {
                received: update.id,
            };
        }

        match update.body {
            UpdateBody::Error { message } => {
                warn!(session_id = update.id.0, %message, "router: simulation reported an error");
                self.state.notify(message.clone());
                UpdateOutcome::Failed { message }
            }
            UpdateBody::State { state, raw } => {
                self.state.merge_update(&state);
                let save = self.state.pending_save.take().map(|filename| SaveArtifact {
                    filename,
                    payload: raw,
                });
                UpdateOutcome::Applied { save }
            }
        }
    }

    pub fn on_session_loaded(&mut self, result: SessionLoadResult) -> SessionLoadOutcome {
        let Some(active) = self.state.session.id else {
            return SessionLoadOutcome::Ignored;
        };
        if result.id.is_some_and(|id| id != active) {
            return SessionLoadOutcome::Ignored;
        }

        match result.body {
            UpdateBody::Error { message } => {
                warn!(session_id = active.0, %message, "router: session load failed");
                self.state.notify(message.clone());
                SessionLoadOutcome::Failed { message }
            }
            UpdateBody::State { state, .. } => {
                self.state.replace_state(&state);
                info!(session_id = active.0, cycle = self.state.cycle, "router: session loaded");
                SessionLoadOutcome::Loaded { id: active }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
