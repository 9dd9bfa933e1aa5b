//! Downloaded map blobs: base64, AES-ECB under the per-device key, hex text, optional zlib,
//! then either the robot map protobuf (kinds 1 and 2) or plain JSON.

use crate::domain::crypto::{decrypt_bytes, derive_map_key};
use crate::error::{KarcherError, Result};
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use prost::Message;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::io::Read as _;

/// Map kinds carried as protobuf rather than JSON.
pub const PROTOBUF_MAP_KINDS: &[u32] = &[1, 2];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapData {
    pub kind: u32,
    pub data: Value,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotMap {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub map_type: u32,
    #[prost(message, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_ext_info: Option<MapExtInfo>,
    #[prost(message, optional, tag = "3")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_head: Option<MapHeadInfo>,
    #[prost(message, optional, tag = "4")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_data: Option<MapDataInfo>,
    #[prost(message, repeated, tag = "5")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub map_info: Vec<AllMapInfo>,
    #[prost(message, optional, tag = "6")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_pose: Option<DeviceHistoryPoseInfo>,
    #[prost(message, optional, tag = "7")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_station: Option<DevicePoseDataInfo>,
    #[prost(message, optional, tag = "8")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_pose: Option<DeviceCurrentPoseInfo>,
    #[prost(message, repeated, tag = "9")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub virtual_walls: Vec<DeviceAreaDataInfo>,
    #[prost(message, repeated, tag = "10")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub areas_info: Vec<DeviceAreaDataInfo>,
    #[prost(message, repeated, tag = "11")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub navigation_points: Vec<DeviceNavigationPointDataInfo>,
    #[prost(message, repeated, tag = "12")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub room_data_info: Vec<RoomDataInfo>,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapExtInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub task_begin_date: u32,
    #[prost(uint32, tag = "2")]
    #[serde(skip_serializing_if = "is_zero")]
    pub map_upload_date: u32,
    #[prost(uint32, tag = "3")]
    #[serde(skip_serializing_if = "is_zero")]
    pub map_valid: u32,
    #[prost(uint32, tag = "4")]
    #[serde(skip_serializing_if = "is_zero")]
    pub radian: u32,
    #[prost(uint32, tag = "5")]
    #[serde(skip_serializing_if = "is_zero")]
    pub force: u32,
    #[prost(uint32, tag = "6")]
    #[serde(skip_serializing_if = "is_zero")]
    pub clean_path: u32,
    #[prost(uint32, tag = "8")]
    #[serde(skip_serializing_if = "is_zero")]
    pub map_version: u32,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapHeadInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub map_head_id: u32,
    #[prost(uint32, tag = "2")]
    #[serde(skip_serializing_if = "is_zero")]
    pub size_x: u32,
    #[prost(uint32, tag = "3")]
    #[serde(skip_serializing_if = "is_zero")]
    pub size_y: u32,
    #[prost(float, tag = "4")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub min_x: f32,
    #[prost(float, tag = "5")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub min_y: f32,
    #[prost(float, tag = "6")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub max_x: f32,
    #[prost(float, tag = "7")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub max_y: f32,
    #[prost(float, tag = "8")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub resolution: f32,
}

/// Occupancy grid, one byte per cell.
#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDataInfo {
    #[prost(bytes = "vec", tag = "1")]
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "as_base64")]
    pub map_data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllMapInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub map_head_id: u32,
    #[prost(string, tag = "2")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub map_name: String,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePointInfo {
    #[prost(float, tag = "1")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub x: f32,
    #[prost(float, tag = "2")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub y: f32,
    #[prost(uint32, tag = "3")]
    #[serde(skip_serializing_if = "is_zero")]
    pub flag: u32,
}

/// Cleaning path travelled so far.
#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHistoryPoseInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub pose_id: u32,
    #[prost(message, repeated, tag = "2")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<DevicePointInfo>,
    #[prost(uint32, tag = "3")]
    #[serde(skip_serializing_if = "is_zero")]
    pub path_type: u32,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePoseDataInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub pose_id: u32,
    #[prost(float, tag = "2")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub x: f32,
    #[prost(float, tag = "3")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub y: f32,
    #[prost(float, tag = "4")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub phi: f32,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCurrentPoseInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub pose_id: u32,
    #[prost(uint32, tag = "2")]
    #[serde(skip_serializing_if = "is_zero")]
    pub update: u32,
    #[prost(float, tag = "3")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub x: f32,
    #[prost(float, tag = "4")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub y: f32,
    #[prost(float, tag = "5")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub phi: f32,
}

/// Virtual wall, no-go zone or clean area, by `type`.
#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAreaDataInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub status: u32,
    #[prost(uint32, tag = "2")]
    #[serde(rename = "type", skip_serializing_if = "is_zero")]
    pub area_type: u32,
    #[prost(uint32, tag = "3")]
    #[serde(skip_serializing_if = "is_zero")]
    pub area_index: u32,
    #[prost(message, repeated, tag = "4")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<DevicePointInfo>,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNavigationPointDataInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub point_id: u32,
    #[prost(uint32, tag = "2")]
    #[serde(skip_serializing_if = "is_zero")]
    pub status: u32,
    #[prost(uint32, tag = "3")]
    #[serde(rename = "pointType", skip_serializing_if = "is_zero")]
    pub point_type: u32,
    #[prost(float, tag = "4")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub x: f32,
    #[prost(float, tag = "5")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub y: f32,
    #[prost(float, tag = "6")]
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub phi: f32,
}

#[derive(Clone, PartialEq, Message, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDataInfo {
    #[prost(uint32, tag = "1")]
    #[serde(skip_serializing_if = "is_zero")]
    pub room_id: u32,
    #[prost(string, tag = "2")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub room_name: String,
    #[prost(string, tag = "3")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub room_type_id: String,
    #[prost(string, tag = "4")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mesh_type: String,
    #[prost(string, tag = "5")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub material: String,
    #[prost(message, optional, tag = "6")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_name_post: Option<DevicePointInfo>,
    #[prost(uint32, tag = "7")]
    #[serde(skip_serializing_if = "is_zero")]
    pub clean_state: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_zero_f32(value: &f32) -> bool {
    *value == 0.0
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Decrypts and decodes one downloaded map blob of the given kind.
pub fn decode_map(
    raw: &[u8],
    serial: &str,
    mac: &str,
    product_id: &str,
    kind: u32,
) -> Result<MapData> {
    let payload = decrypt_map(raw, serial, mac, product_id)?;
    let data = if PROTOBUF_MAP_KINDS.contains(&kind) {
        parse_robot_map(&payload)?
    } else {
        serde_json::from_slice(&payload)?
    };
    Ok(MapData { kind, data })
}

/// Undoes the transport wrapping and returns the inner payload bytes.
pub fn decrypt_map(raw: &[u8], serial: &str, mac: &str, product_id: &str) -> Result<Vec<u8>> {
    let key = derive_map_key(serial, mac, product_id)?;
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let sealed = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|error| KarcherError::Map(format!("map blob is not base64: {error}")))?;
    let hex_text = decrypt_bytes(&sealed, &key)?;
    let hex_text: Vec<u8> = hex_text
        .into_iter()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let packed = hex::decode(&hex_text)
        .map_err(|error| KarcherError::Map(format!("map payload is not hex: {error}")))?;

    let mut inflated = Vec::new();
    match ZlibDecoder::new(packed.as_slice()).read_to_end(&mut inflated) {
        Ok(_) => Ok(inflated),
        Err(error) => {
            tracing::debug!(%error, "map payload not compressed, using raw bytes");
            Ok(packed)
        }
    }
}

/// Decodes a robot map protobuf into field-normalized JSON.
///
/// The occupancy grid is hoisted so `map_data` holds the grid itself rather than a wrapper record.
pub fn parse_robot_map(bytes: &[u8]) -> Result<Value> {
    let map = RobotMap::decode(bytes)
        .map_err(|error| KarcherError::Map(format!("invalid robot map: {error}")))?;
    let Value::Object(fields) = serde_json::to_value(&map)? else {
        return Err(KarcherError::Map("robot map did not encode as an object".to_string()));
    };

    let mut out = Map::new();
    for (name, mut value) in fields {
        if name == "mapData" {
            value = value.get("mapData").cloned().unwrap_or(Value::Null);
        }
        out.insert(snake_case(&name), snake_case_fields(value));
    }
    Ok(Value::Object(out))
}

/// `mapHeadId` -> `map_head_id`, `HTTPResponse` -> `http_response`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();

    // An upper-case letter opening a lower-case run starts a word.
    let mut words = Vec::with_capacity(chars.len() + 4);
    let mut i = 0;
    while i < chars.len() {
        let opens_word = i + 2 < chars.len()
            && chars[i + 1].is_ascii_uppercase()
            && chars[i + 2].is_ascii_lowercase();
        if !opens_word {
            words.push(chars[i]);
            i += 1;
            continue;
        }
        let mut end = i + 3;
        while end < chars.len() && chars[end].is_ascii_lowercase() {
            end += 1;
        }
        words.push(chars[i]);
        words.push('_');
        words.extend_from_slice(&chars[i + 1..end]);
        i = end;
    }

    // Then any lower-case letter or digit directly followed by an upper-case one.
    let mut out = String::with_capacity(words.len() + 4);
    let mut i = 0;
    while i < words.len() {
        let current = words[i];
        let boundary = (current.is_ascii_lowercase() || current.is_ascii_digit())
            && words.get(i + 1).is_some_and(char::is_ascii_uppercase);
        out.push(current);
        if boundary {
            out.push('_');
            out.push(words[i + 1]);
            i += 2;
        } else {
            i += 1;
        }
    }
    out.to_lowercase()
}

pub fn snake_case_fields(value: Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(name, value)| (snake_case(&name), snake_case_fields(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(snake_case_fields).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::crypto::encrypt_bytes;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use serde_json::json;
    use std::io::Write as _;

    const SERIAL: &str = "SN123456";
    const MAC: &str = "AA:BB:CC:DD:EE:FF";
    const PRODUCT: &str = "1540149850806333440";

    fn seal(payload: &[u8], compress: bool) -> Vec<u8> {
        let packed = if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload).expect("compress");
            encoder.finish().expect("finish")
        } else {
            payload.to_vec()
        };
        let key = derive_map_key(SERIAL, MAC, PRODUCT).expect("key");
        let sealed = encrypt_bytes(hex::encode(packed).as_bytes(), &key);
        base64::engine::general_purpose::STANDARD
            .encode(sealed)
            .into_bytes()
    }

    fn sample_map() -> RobotMap {
        RobotMap {
            map_type: 1,
            map_head: Some(MapHeadInfo {
                map_head_id: 7,
                size_x: 2,
                size_y: 2,
                resolution: 0.5,
                ..Default::default()
            }),
            map_data: Some(MapDataInfo {
                map_data: vec![0, 1, 2, 3],
            }),
            history_pose: Some(DeviceHistoryPoseInfo {
                pose_id: 3,
                points: vec![DevicePointInfo {
                    x: 1.5,
                    y: -2.0,
                    flag: 0,
                }],
                path_type: 0,
            }),
            room_data_info: vec![RoomDataInfo {
                room_id: 10,
                room_name: "Kitchen".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn decodes_compressed_protobuf_map() {
        let blob = seal(&sample_map().encode_to_vec(), true);
        let map = decode_map(&blob, SERIAL, MAC, PRODUCT, 1).expect("decode");
        assert_eq!(map.kind, 1);
        assert_eq!(
            map.data,
            json!({
                "map_type": 1,
                "map_head": { "map_head_id": 7, "size_x": 2, "size_y": 2, "resolution": 0.5 },
                "map_data": "AAECAw==",
                "history_pose": { "pose_id": 3, "points": [{ "x": 1.5, "y": -2.0 }] },
                "room_data_info": [{ "room_id": 10, "room_name": "Kitchen" }],
            })
        );
    }

    #[test]
    fn falls_back_to_uncompressed_payload() {
        let blob = seal(&sample_map().encode_to_vec(), false);
        let map = decode_map(&blob, SERIAL, MAC, PRODUCT, 2).expect("decode");
        assert_eq!(map.data["map_head"]["map_head_id"], 7);
    }

    #[test]
    fn other_kinds_are_plain_json() {
        let blob = seal(br#"{"roomList":[{"roomId":1}]}"#, true);
        let map = decode_map(&blob, SERIAL, MAC, PRODUCT, 3).expect("decode");
        assert_eq!(map.data, json!({ "roomList": [{ "roomId": 1 }] }));
    }

    #[test]
    fn wrong_device_key_fails() {
        let blob = seal(br#"{"a":1}"#, true);
        assert!(decode_map(&blob, "OTHER", MAC, PRODUCT, 3).is_err());
    }

    #[test]
    fn converts_field_names_to_snake_case() {
        assert_eq!(snake_case("mapHeadId"), "map_head_id");
        assert_eq!(snake_case("minX"), "min_x");
        assert_eq!(snake_case("HTTPResponse"), "http_response");
        assert_eq!(snake_case("room2Name"), "room2_name");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn renames_nested_objects_and_lists() {
        let value = json!({ "outerKey": [{ "innerKey": { "deepKey": 1 } }] });
        assert_eq!(
            snake_case_fields(value),
            json!({ "outer_key": [{ "inner_key": { "deep_key": 1 } }] })
        );
    }
}
