//! bicycle-services: Host loop, controls, configuration and status display

pub mod config;
pub mod controls;
pub mod display;
pub mod error;
pub mod host;
pub mod mailbox;
pub mod script;

pub use config::{config_path, load_config, load_config_from, save_config, save_config_to, HostConfig};
pub use controls::{dispatch, Action, Command, ControlMap, Route};
pub use display::{format_status, DisplayThread, LogRenderer, StatusRenderer};
pub use error::{HostError, Result};
pub use host::{Host, MidiInput, SystemClock, WallClock};
pub use mailbox::{status_mailbox, StatusPublisher, StatusSubscriber};
pub use script::{ScriptedInput, VirtualClock};
