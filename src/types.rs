use std::fmt;

use serde::{Deserialize, Deserializer};

/// Known portal installations running the MAX! remoting API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Portal {
    Elv,
    Md,
    Eq3,
    Ewe,
}

impl Portal {
    pub fn base_url(&self) -> &'static str {
        match self {
            Portal::Elv => "https://www.max-portal.elv.de/",
            Portal::Md => "https://smarthome.md.de/",
            Portal::Eq3 => "https://max.eq-3.de/",
            Portal::Ewe => "https://www.sparpaket-heizung.ewe.de/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    LoggedIn,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Snapshot of a cube as returned by `getMaxCubeState`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaxCubeState {
    pub serial_number: Option<String>,
    /// Cube clock in epoch milliseconds.
    pub cube_date: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub rooms: Vec<MaxRoom>,
    #[serde(deserialize_with = "null_as_default")]
    pub devices_without_room: Vec<MaxDevice>,
}

impl MaxCubeState {
    pub fn room(&self, id: i64) -> Option<&MaxRoom> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn room_by_name(&self, name: &str) -> Option<&MaxRoom> {
        self.rooms.iter().find(|r| r.name == name)
    }

    /// All devices, room-bound first.
    pub fn devices(&self) -> impl Iterator<Item = &MaxDevice> {
        self.rooms
            .iter()
            .flat_map(|r| r.devices.iter())
            .chain(self.devices_without_room.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaxRoom {
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub control_mode: Option<String>,
    pub actual_temperature: Option<f64>,
    pub set_point_temperature: Option<f64>,
    pub eco_temperature: Option<f64>,
    pub comfort_temperature: Option<f64>,
    pub maximum_temperature: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub devices: Vec<MaxDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaxDevice {
    #[serde(deserialize_with = "null_as_default")]
    pub radio_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub device_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub battery_low: bool,
    pub radio_state: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub transmit_error: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
