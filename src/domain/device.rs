use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum DeviceStatus {
    #[default]
    Offline,
    Online,
}

impl<'de> Deserialize<'de> for DeviceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(if raw == 1 { Self::Online } else { Self::Offline })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceVersion {
    pub package_type: String,
    pub version: i64,
    pub version_name: String,
    pub ctrl_version: String,
}

/// A robot bound to the account, as listed by the device-info endpoint.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub sn: String,
    pub mac: String,
    pub nickname: String,
    #[serde(deserialize_with = "versions_from_json_text")]
    pub versions: Vec<DeviceVersion>,
    pub status: DeviceStatus,
    pub is_default: bool,
    pub is_selected: bool,
    #[serde(rename(deserialize = "isShare"))]
    pub is_shared: bool,
    pub online_time: i64,
    pub photo_url: String,
    pub product_id: String,
    pub product_mode_code: String,
    pub bind_time: i64,
    pub room_id: String,
}

impl Device {
    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

fn versions_from_json_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<DeviceVersion>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(text) if text.trim().is_empty() => Ok(Vec::new()),
        Value::String(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
        Value::Array(items) => {
            serde_json::from_value(Value::Array(items)).map_err(serde::de::Error::custom)
        }
        _ => Ok(Vec::new()),
    }
}

/// Keys accepted from `get_reply` payloads. Anything else is dropped on merge.
pub const PROPERTY_FIELDS: &[&str] = &[
    "firmware",
    "firmware_code",
    "status",
    "fault",
    "wind",
    "water",
    "mode",
    "quantity",
    "alarm",
    "volume",
    "hypa",
    "main_brush",
    "side_brush",
    "mop_life",
    "net_status",
    "repeat_state",
    "tank_state",
    "cloth_state",
    "sweep_type",
    "mop_route",
    "time_zone",
    "language",
    "cleaning_time",
    "cleaning_area",
    "custom_type",
    "sound",
    "work_mode",
    "tank_shake",
    "shake_shift",
    "electrolysis",
    "station_act",
    "charge_state",
    "back_to_wash",
    "break_charging",
    "order_total",
    "memory_map",
    "current_map_id",
    "map_num",
    "has_new_map",
    "build_map",
    "quiet_is_open",
    "quiet_begin_time",
    "quiet_end_time",
    "broken_clean",
    "privacy",
    "cur_path",
    "dust_action",
    "voice_type",
    "quiet_status",
];

/// Last known property values of one subscribed device.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PropertySnapshot {
    values: Map<String, Value>,
    pub last_update_time: i64,
    /// Code and message of the latest `get_reply` when the device rejected it.
    pub last_reply_error: Option<(i64, String)>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeReport {
    pub changed: Vec<String>,
    pub dropped: Vec<String>,
}

impl PropertySnapshot {
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Applies a delta; only keys whose value differs from the cached one are reported as changed.
    pub fn merge(&mut self, delta: &Map<String, Value>) -> MergeReport {
        let mut report = MergeReport::default();
        for (key, value) in delta {
            if !PROPERTY_FIELDS.contains(&key.as_str()) {
                report.dropped.push(key.clone());
                continue;
            }
            if self.values.get(key) == Some(value) {
                continue;
            }
            self.values.insert(key.clone(), value.clone());
            report.changed.push(key.clone());
        }
        report
    }

    /// Typed view. A null or mistyped value only resets its own field.
    pub fn properties(&self) -> DeviceProperties {
        let mut accepted = Map::new();
        for (key, value) in &self.values {
            if value.is_null() {
                continue;
            }
            let single = Map::from_iter([(key.clone(), value.clone())]);
            match serde_json::from_value::<DeviceProperties>(Value::Object(single)) {
                Ok(_) => {
                    accepted.insert(key.clone(), value.clone());
                }
                Err(error) => tracing::warn!(property = %key, %error, "ignoring property value"),
            }
        }
        serde_json::from_value(Value::Object(accepted)).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyProperties {
    pub ai_recognize: i64,
    pub dirt_recognize: i64,
    pub pet_recognize: i64,
    pub carpet_turbo: i64,
    pub carpet_avoid: i64,
    pub carpet_show: i64,
    pub auto_upgrade: i64,
    pub map_uploads: i64,
    pub record_uploads: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkProperties {
    pub rssi: String,
    pub loss: i64,
    pub ping: i64,
    pub ip: String,
    pub mac: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderTotalProperties {
    pub enable: i64,
    pub total: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietProperties {
    pub begin_time: i64,
    pub end_time: i64,
    pub quiting: i64,
}

/// Typed view over a [`PropertySnapshot`]; absent keys keep their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProperties {
    pub firmware: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub firmware_code: i64,
    pub status: i64,
    pub fault: i64,
    pub wind: i64,
    pub water: i64,
    pub mode: i64,
    pub quantity: i64,
    pub alarm: i64,
    pub volume: i64,
    pub hypa: i64,
    pub main_brush: i64,
    pub side_brush: i64,
    pub mop_life: i64,
    pub net_status: NetworkProperties,
    pub repeat_state: i64,
    pub tank_state: i64,
    pub cloth_state: i64,
    pub sweep_type: i64,
    pub mop_route: i64,
    pub time_zone: i64,
    pub language: i64,
    pub cleaning_time: i64,
    pub cleaning_area: i64,
    pub custom_type: i64,
    pub sound: i64,
    pub work_mode: i64,
    pub tank_shake: i64,
    pub shake_shift: i64,
    pub electrolysis: i64,
    pub station_act: i64,
    pub charge_state: i64,
    pub back_to_wash: i64,
    pub break_charging: i64,
    pub order_total: OrderTotalProperties,
    pub memory_map: i64,
    pub current_map_id: i64,
    pub map_num: i64,
    pub has_new_map: i64,
    pub build_map: i64,
    pub quiet_is_open: i64,
    pub quiet_begin_time: i64,
    pub quiet_end_time: i64,
    pub broken_clean: i64,
    pub privacy: PrivacyProperties,
    pub cur_path: Vec<f64>,
    pub dust_action: i64,
    pub voice_type: i64,
    pub quiet_status: QuietProperties,
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(number) => Ok(number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))
            .unwrap_or_default()),
        Value::String(text) => text.trim().parse::<i64>().map_err(serde::de::Error::custom),
        _ => Ok(0),
    }
}
