use crate::prelude::*;
use serde::Deserialize;

/// Which Modbus register bank a metric lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterBank {
    Input,
    Holding,
}

impl std::fmt::Display for RegisterBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Holding => write!(f, "holding"),
        }
    }
}

/// Location and scaling of one metric: physical value = int16(raw) / scale.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawRegisterParam")]
pub struct RegisterParam {
    pub address: u16,
    pub scale: f64,
    pub bank: RegisterBank,
}

// override entries accept either `bank: "input"|"holding"` or the older
// `holding: true|false` flag; `bank` wins when both are given.
#[derive(Deserialize)]
struct RawRegisterParam {
    addr: u16,
    scale: f64,
    #[serde(default)]
    bank: Option<RegisterBank>,
    #[serde(default)]
    holding: bool,
}

impl TryFrom<RawRegisterParam> for RegisterParam {
    type Error = String;

    fn try_from(raw: RawRegisterParam) -> Result<Self, Self::Error> {
        if !raw.scale.is_finite() || raw.scale <= 0.0 {
            return Err(format!(
                "scale for register {:#06x} must be a positive number, got {}",
                raw.addr, raw.scale
            ));
        }

        let bank = raw.bank.unwrap_or(if raw.holding {
            RegisterBank::Holding
        } else {
            RegisterBank::Input
        });

        Ok(Self::new(raw.addr, raw.scale, bank))
    }
}

impl RegisterParam {
    pub fn new(address: u16, scale: f64, bank: RegisterBank) -> Self {
        Self {
            address,
            scale,
            bank,
        }
    }

    /// Placeholder for an optional metric the device doesn't expose.
    pub fn absent() -> Self {
        Self::new(0, 1.0, RegisterBank::Holding)
    }

    /// Address 0 marks an optional metric as not present.
    pub fn is_configured(&self) -> bool {
        self.address != 0
    }
}

impl std::fmt::Display for RegisterParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:#06x}/{}", self.bank, self.address, self.scale)
    }
}

/// Which register feeds each metric. Built once at startup and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RegisterMap {
    pub frequency: RegisterParam,
    pub voltage: RegisterParam,
    #[serde(default = "RegisterParam::absent")]
    pub power: RegisterParam,
    #[serde(default = "RegisterParam::absent")]
    pub energy: RegisterParam,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            frequency: RegisterParam::new(0x2000, 100.0, RegisterBank::Holding),
            voltage: RegisterParam::new(0x2001, 10.0, RegisterBank::Holding),
            power: RegisterParam::new(0x2003, 1.0, RegisterBank::Holding),
            energy: RegisterParam::new(0x2004, 100.0, RegisterBank::Holding),
        }
    }
}

impl RegisterMap {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| anyhow!("register map: {}", err))
    }

    /// Resolves the effective map: the override when it parses and validates,
    /// the built-in defaults otherwise. A bad override is never fatal.
    pub fn from_json_or_default(json: Option<&str>) -> Self {
        let map = match json.map(str::trim).filter(|json| !json.is_empty()) {
            None => Self::default(),
            Some(json) => match Self::from_json(json) {
                Ok(map) => {
                    info!("using register map override");
                    map
                }
                Err(err) => {
                    warn!("ignoring bad register map override, using defaults: {}", err);
                    Self::default()
                }
            },
        };

        info!("  frequency: {}", map.frequency);
        info!("  voltage: {}", map.voltage);
        info!("  power: {}", Self::describe_optional(&map.power));
        info!("  energy: {}", Self::describe_optional(&map.energy));

        map
    }

    /// True if at least one of the energy-meter metrics has a register.
    pub fn has_energy_meter(&self) -> bool {
        self.power.is_configured() || self.energy.is_configured()
    }

    fn describe_optional(param: &RegisterParam) -> String {
        if param.is_configured() {
            param.to_string()
        } else {
            "not present".to_string()
        }
    }
}
