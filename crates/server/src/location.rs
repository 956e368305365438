//! Network-wide locations and the per-player "previous location" memory.

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use uuid::Uuid;
use waystone_engine::transform::Transform;

/// A position on the network: which server, which world, and where exactly.
///
/// Serializes to `server:world:x:y:z:yaw:pitch` for storage and for teleport
/// intent payloads. Fields after the coordinates' first component are optional
/// on parse and default to zero.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerLocation {
    pub server: String,
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl ServerLocation {
    pub fn new(
        server: impl Into<String>,
        world: impl Into<String>,
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
    ) -> Self {
        Self { server: server.into(), world: world.into(), x, y, z, yaw, pitch }
    }

    /// Location of `transform` within `world` on `server`.
    pub fn from_transform(server: &str, world: &str, transform: Transform) -> Self {
        Self::new(
            server,
            world,
            transform.x,
            transform.y,
            transform.z,
            transform.yaw,
            transform.pitch,
        )
    }

    /// The in-world part of this location.
    pub fn transform(&self) -> Transform {
        Transform::new(self.x, self.y, self.z, self.yaw, self.pitch)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LocationParseError {
    #[error("location '{0}' needs at least server:world:x")]
    MissingFields(String),
    #[error("location field '{0}' is not a number")]
    BadNumber(String),
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}",
            self.server, self.world, self.x, self.y, self.z, self.yaw, self.pitch
        )
    }
}

impl FromStr for ServerLocation {
    type Err = LocationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let missing = || LocationParseError::MissingFields(s.to_string());

        let server = parts.next().filter(|p| !p.is_empty()).ok_or_else(missing)?;
        let world = parts.next().filter(|p| !p.is_empty()).ok_or_else(missing)?;
        let x = parse_num::<f64>(parts.next().ok_or_else(missing)?)?;
        // Everything past here is optional and defaults to zero.
        let y = parts.next().map(parse_num::<f64>).transpose()?.unwrap_or(0.0);
        let z = parts.next().map(parse_num::<f64>).transpose()?.unwrap_or(0.0);
        let yaw = parts.next().map(parse_num::<f32>).transpose()?.unwrap_or(0.0);
        let pitch = parts.next().map(parse_num::<f32>).transpose()?.unwrap_or(0.0);

        Ok(Self::new(server, world, x, y, z, yaw, pitch))
    }
}

fn parse_num<T: FromStr>(field: &str) -> Result<T, LocationParseError> {
    field
        .trim()
        .parse()
        .map_err(|_| LocationParseError::BadNumber(field.to_string()))
}

/// Last position each player occupied before an engine-initiated move.
///
/// Process-local and non-authoritative: written on every successful handoff,
/// read by the "return" action, never expired. Reading does not clear, so
/// repeated returns bounce between the same two spots.
pub struct LocationMemory {
    slots: DashMap<Uuid, ServerLocation>,
}

impl LocationMemory {
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }

    /// Overwrite the remembered location for `player`.
    pub fn remember(&self, player: Uuid, location: ServerLocation) {
        self.slots.insert(player, location);
    }

    pub fn previous(&self, player: Uuid) -> Option<ServerLocation> {
        self.slots.get(&player).map(|entry| entry.clone())
    }

    pub fn forget(&self, player: Uuid) -> Option<ServerLocation> {
        self.slots.remove(&player).map(|(_, location)| location)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for LocationMemory {
    fn default() -> Self {
        Self::new()
    }
}
