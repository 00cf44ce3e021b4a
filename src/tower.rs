//! Data structures representing cellular towers and signal samples.
//!
//! This module defines the value types produced by the QENG response parser
//! and handed out by the scanner: the serving cell, neighbor cells, the
//! snapshot that groups them, and cached signal strength samples.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use tracing::info;

/// Radio access technology used between the modem and the tower.
///
/// `None` doubles as the "absent or invalid" marker for every record that
/// carries a RAT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RadioAccessTechnology {
    /// Not set or not recognized
    #[default]
    None,
    /// LTE Cat 1
    Lte,
    /// LTE Cat M1 (eMTC)
    LteCatM1,
    /// LTE Cat NB1 (NB-IoT)
    LteNbIot,
}

impl RadioAccessTechnology {
    /// 3GPP access technology number (`<AcT>` in `AT+COPS`), or -1 for `None`.
    pub fn act_code(self) -> i8 {
        match self {
            RadioAccessTechnology::None => -1,
            RadioAccessTechnology::Lte => 7,
            RadioAccessTechnology::LteCatM1 => 8,
            RadioAccessTechnology::LteNbIot => 9,
        }
    }

    pub fn is_none(self) -> bool {
        self == RadioAccessTechnology::None
    }
}

impl fmt::Display for RadioAccessTechnology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioAccessTechnology::None => write!(f, "none"),
            RadioAccessTechnology::Lte => write!(f, "lte"),
            RadioAccessTechnology::LteCatM1 => write!(f, "lte-cat-m1"),
            RadioAccessTechnology::LteNbIot => write!(f, "lte-nb-iot"),
        }
    }
}

/// A single named value emitted by [`ServingCell::write_fields`] and
/// [`NeighborCell::write_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Unsigned(u32),
    Signed(i32),
}

/// Receiver for the name/value pairs of a tower record.
///
/// Serializers implement this to turn records into their own structured
/// format without the records knowing about it.
pub trait FieldSink {
    fn field(&mut self, name: &'static str, value: FieldValue<'_>);
}

impl FieldSink for Map<String, Value> {
    fn field(&mut self, name: &'static str, value: FieldValue<'_>) {
        let value = match value {
            FieldValue::Text(s) => Value::from(s),
            FieldValue::Unsigned(n) => Value::from(n),
            FieldValue::Signed(n) => Value::from(n),
        };
        self.insert(name.to_string(), value);
    }
}

impl FieldSink for Vec<(&'static str, String)> {
    fn field(&mut self, name: &'static str, value: FieldValue<'_>) {
        let value = match value {
            FieldValue::Text(s) => s.to_string(),
            FieldValue::Unsigned(n) => n.to_string(),
            FieldValue::Signed(n) => n.to_string(),
        };
        self.push((name, value));
    }
}

/// The tower the modem is currently attached to.
///
/// Parsed from a `+QENG: "servingcell",...` response line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingCell {
    /// Radio access technology, also the validity flag for the record.
    pub rat: RadioAccessTechnology,

    /// Mobile Country Code (0-999).
    pub mcc: u16,

    /// Mobile Network Code (0-999).
    pub mnc: u16,

    /// Cell identifier (28 bits).
    pub cell_id: u32,

    /// Location (tracking) area code.
    pub lac: u16,

    /// Signal power (RSRP) in dBm.
    pub signal_power: i32,
}

impl ServingCell {
    /// Reset to `RadioAccessTechnology::None` with zeroed fields.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_valid(&self) -> bool {
        !self.rat.is_none()
    }

    /// Emit every parsed field, in parse order.
    pub fn write_fields<S: FieldSink + ?Sized>(&self, sink: &mut S) {
        let rat = self.rat.to_string();
        sink.field("rat", FieldValue::Text(&rat));
        sink.field("mcc", FieldValue::Unsigned(self.mcc.into()));
        sink.field("mnc", FieldValue::Unsigned(self.mnc.into()));
        sink.field("cell_id", FieldValue::Unsigned(self.cell_id));
        sink.field("lac", FieldValue::Unsigned(self.lac.into()));
        sink.field("signal_power", FieldValue::Signed(self.signal_power));
    }
}

impl fmt::Display for ServingCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rat={} mcc={} mnc={} lac={:x} cid={:x} power={}",
            self.rat, self.mcc, self.mnc, self.lac, self.cell_id, self.signal_power
        )
    }
}

/// A nearby tower visible to the modem but not serving it.
///
/// Parsed from a `+QENG: "neighbourcell ...",...` response line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborCell {
    /// Radio access technology, also the validity flag for the record.
    pub rat: RadioAccessTechnology,

    /// E-UTRA absolute radio frequency channel number.
    pub earfcn: u32,

    /// Physical cell id (0-503).
    pub neighbor_id: u16,

    /// Signal quality (RSRQ) in dB.
    pub signal_quality: i32,

    /// Signal power (RSRP) in dBm.
    pub signal_power: i32,

    /// Signal strength (RSSI) in dBm.
    pub signal_strength: i32,
}

impl NeighborCell {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_valid(&self) -> bool {
        !self.rat.is_none()
    }

    /// Emit every parsed field, in parse order.
    pub fn write_fields<S: FieldSink + ?Sized>(&self, sink: &mut S) {
        let rat = self.rat.to_string();
        sink.field("rat", FieldValue::Text(&rat));
        sink.field("earfcn", FieldValue::Unsigned(self.earfcn));
        sink.field("neighbor_id", FieldValue::Unsigned(self.neighbor_id.into()));
        sink.field("signal_quality", FieldValue::Signed(self.signal_quality));
        sink.field("signal_power", FieldValue::Signed(self.signal_power));
        sink.field("signal_strength", FieldValue::Signed(self.signal_strength));
    }
}

impl fmt::Display for NeighborCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rat={} earfcn={} id={} quality={} power={} strength={}",
            self.rat,
            self.earfcn,
            self.neighbor_id,
            self.signal_quality,
            self.signal_power,
            self.signal_strength
        )
    }
}

/// Serving tower plus the neighbors reported in the same scan.
///
/// Neighbors keep the order the modem reported them in. `Clone` (and
/// `clone_from`) is a full replacement: the previous neighbor list is never
/// merged with the new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TowerSnapshot {
    pub serving: ServingCell,
    pub neighbors: Vec<NeighborCell>,
}

impl TowerSnapshot {
    /// Clear the serving cell and drop all neighbors.
    pub fn clear(&mut self) {
        self.serving.clear();
        self.neighbors.clear();
    }

    /// A snapshot is valid when its serving cell is.
    pub fn is_valid(&self) -> bool {
        self.serving.is_valid()
    }

    /// Compact tower array for location lookups.
    ///
    /// The serving tower comes first as `{rat, mcc, mnc, lac, cid, str}`,
    /// followed by neighbors as `{nid, ch, str}`. `limit` caps the number of
    /// towers including the serving one; 0 includes all of them. An invalid
    /// snapshot yields an empty array.
    pub fn location_towers(&self, limit: usize) -> Value {
        if !self.is_valid() {
            return Value::Array(Vec::new());
        }

        let total = 1 + self.neighbors.len();
        let count = if limit == 0 { total } else { limit.min(total) };

        let mut towers = Vec::with_capacity(count);
        towers.push(json!({
            "rat": "lte",
            "mcc": self.serving.mcc,
            "mnc": self.serving.mnc,
            "lac": self.serving.lac,
            "cid": self.serving.cell_id,
            "str": self.serving.signal_power,
        }));
        towers.extend(self.neighbors.iter().take(count - 1).map(|n| {
            json!({
                "nid": n.neighbor_id,
                "ch": n.earfcn,
                "str": n.signal_power,
            })
        }));

        Value::Array(towers)
    }

    /// Write the snapshot to the log at info level.
    pub fn log_summary(&self, label: &str) {
        if !self.is_valid() {
            info!("{}: no serving cell", label);
            return;
        }
        info!("{}: serving {}", label, self.serving);
        for (i, neighbor) in self.neighbors.iter().enumerate() {
            info!("{}: neighbor {} {}", label, i + 1, neighbor);
        }
    }
}

/// A raw signal reading as reported by the modem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    /// Signal strength in dBm. Zero or positive means no usable reading.
    pub strength: f32,

    /// Signal quality in dB.
    pub quality: f32,
}

impl SignalReading {
    /// True for a real measurement rather than a placeholder.
    pub fn is_usable(&self) -> bool {
        self.strength < 0.0
    }
}

/// A cached signal reading stamped with the uptime second it was taken at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSample {
    pub reading: SignalReading,

    /// Uptime in seconds when the sample was taken; 0 means never sampled.
    pub uptime_secs: u64,
}

impl SignalSample {
    pub fn is_sampled(&self) -> bool {
        self.uptime_secs != 0
    }
}
