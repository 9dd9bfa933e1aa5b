//! Broker topic namespace: `/mqtt/<productId>/<serial>/<suffix>`.

pub const PROPERTY_POST: &str = "thing/event/property/post";
pub const PROPERTY_GET: &str = "thing/service/property/get";
pub const PROPERTY_GET_REPLY: &str = "thing/service/property/get_reply";
pub const PROPERTY_SET_REPLY: &str = "thing/service/property/set_reply";
pub const SERVICE_INVOKE: &str = "thing/service_invoke";
pub const SERVICE_INVOKE_REPLY: &str = "thing/service_invoke_reply/#";
pub const CUR_PATH_POST: &str = "thing/event/cur_path/post";
pub const UPGRADE_SET_REPLY: &str = "ota/service/upgrade/set_reply";
pub const UPGRADE_POST: &str = "ota/service/upgrade/post";
pub const UPGRADE_GET_REPLY: &str = "ota/service/upgrade/get_reply";
pub const VERSION_POST: &str = "ota/service/version/post";

/// Suffixes that only wake a waiter and never touch the property cache.
pub const STATE_EVENT_SUFFIXES: &[&str] = &[PROPERTY_POST, CUR_PATH_POST, "upgrade/post"];

pub fn device_topic(product_id: &str, serial: &str, suffix: &str) -> String {
    format!("/mqtt/{product_id}/{serial}/{suffix}")
}

pub fn property_get(product_id: &str, serial: &str) -> String {
    device_topic(product_id, serial, PROPERTY_GET)
}

pub fn property_get_reply(product_id: &str, serial: &str) -> String {
    device_topic(product_id, serial, PROPERTY_GET_REPLY)
}

/// Every topic a device subscription listens on.
pub fn device_topics(product_id: &str, serial: &str) -> Vec<String> {
    [
        PROPERTY_POST,
        PROPERTY_SET_REPLY,
        PROPERTY_GET_REPLY,
        SERVICE_INVOKE,
        SERVICE_INVOKE_REPLY,
        CUR_PATH_POST,
        UPGRADE_SET_REPLY,
        UPGRADE_POST,
        UPGRADE_GET_REPLY,
        VERSION_POST,
    ]
    .into_iter()
    .map(|suffix| device_topic(product_id, serial, suffix))
    .collect()
}
