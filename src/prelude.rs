pub use crate::{
    channels::Channels,
    config::{self, Config},
    error::ReadError,
    home_assistant, modbus, mqtt,
    register::{RegisterBank, RegisterMap, RegisterParam},
    telemetry::{Capability, SensorState},
    utils,
};

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;
