pub mod commands;
pub mod config;
pub mod downloads;
pub mod interaction;
pub mod router;
pub mod scene;
pub mod session;
pub mod stomp;
pub mod tooltip;
pub mod transport;
pub mod view;

pub use commands::{parse_command, Command, CommandError, PolicyTarget, RequestPolicy, SourcePolicy};
pub use config::{load_settings, load_settings_from, ConfigError, Settings};
pub use interaction::{
    Affordances, ContextMenu, HoverState, InteractionController, InteractionError, MenuAction,
};
pub use router::{RouterError, SessionCommandRouter, ViewState};
pub use scene::{Point, Scene, ViewModelBuilder, Viewport};
pub use session::{parse_pin, parse_route, SessionError, SessionStore};
pub use transport::{ConnectionState, Transport, TransportClient, TransportError, TransportEvent};
pub use view::{Gesture, SimulationView, ViewEvent, ViewOptions};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
