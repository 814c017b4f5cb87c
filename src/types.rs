use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque session token. A command carrying a different token than the
/// current state was issued against an older session and must be ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
}

impl TimerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

/// Loosely typed scalar as it arrives from the transport layer.
///
/// Fields like `idx` and `registeredTime` historically arrive as numbers,
/// numeric strings, or null; coercion into a typed value happens in the
/// validator, never implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Hold progress in exact half-hold steps.
///
/// Stored as an integer count of half units so fractional progress never
/// accumulates float error and ordering is total. Serialized as the
/// fractional value judges see (`5.5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HoldCount(u32);

impl HoldCount {
    pub const ZERO: HoldCount = HoldCount(0);

    pub fn from_halves(halves: u32) -> Self {
        Self(halves)
    }

    pub fn from_holds(holds: u32) -> Self {
        Self(holds * 2)
    }

    /// Accepts only non-negative finite values on the half-unit grid.
    pub fn from_value(value: f64) -> Option<Self> {
        let halves = half_steps(value)?;
        if halves < 0 {
            return None;
        }
        Some(Self(halves as u32))
    }

    pub fn halves(&self) -> u32 {
        self.0
    }

    pub fn value(&self) -> f64 {
        f64::from(self.0) / 2.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `clamp(self + delta, 0, max)`; saturates instead of wrapping.
    pub fn apply_delta(self, delta: HoldDelta, max: HoldCount) -> HoldCount {
        let shifted = i64::from(self.0) + i64::from(delta.halves());
        let clamped = shifted.clamp(0, i64::from(max.0));
        HoldCount(clamped as u32)
    }
}

impl Serialize for HoldCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.value())
    }
}

impl<'de> Deserialize<'de> for HoldCount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = f64::deserialize(deserializer)?;
        HoldCount::from_value(raw)
            .ok_or_else(|| D::Error::custom(format!("invalid hold count {raw}")))
    }
}

/// Signed hold progress change, also on the half-unit grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HoldDelta(i32);

impl HoldDelta {
    pub fn from_halves(halves: i32) -> Self {
        Self(halves)
    }

    pub fn from_value(value: f64) -> Option<Self> {
        half_steps(value).map(Self)
    }

    pub fn halves(&self) -> i32 {
        self.0
    }

    pub fn value(&self) -> f64 {
        f64::from(self.0) / 2.0
    }
}

fn half_steps(value: f64) -> Option<i32> {
    if !value.is_finite() {
        return None;
    }
    let scaled = value * 2.0;
    if scaled.fract() != 0.0 {
        return None;
    }
    if scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
        return None;
    }
    Some(scaled as i32)
}
