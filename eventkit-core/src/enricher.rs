//! Reserved-field enrichment
//!
//! Identity goes in first, then device metadata. A reserved key the
//! application already set is overwritten.

use crate::device::DeviceInfo;
use crate::types::Record;

pub const KEY_UUID: &str = "td_uuid";
pub const KEY_BOARD: &str = "td_board";
pub const KEY_BRAND: &str = "td_brand";
pub const KEY_DEVICE: &str = "td_device";
pub const KEY_DISPLAY: &str = "td_display";
pub const KEY_MODEL: &str = "td_model";
pub const KEY_OS_VER: &str = "td_os_ver";
pub const KEY_OS_TYPE: &str = "td_os_type";

/// Every key enrichment may write
pub const RESERVED_KEYS: [&str; 8] = [
    KEY_UUID,
    KEY_BOARD,
    KEY_BRAND,
    KEY_DEVICE,
    KEY_DISPLAY,
    KEY_MODEL,
    KEY_OS_VER,
    KEY_OS_TYPE,
];

/// Which enrichments to apply; `None` skips one
#[derive(Debug, Clone, Copy, Default)]
pub struct Enrichment<'a> {
    pub identity: Option<&'a str>,
    pub device: Option<&'a DeviceInfo>,
}

/// Apply the requested enrichments in place.
pub fn enrich(record: &mut Record, enrichment: &Enrichment<'_>) {
    if let Some(identity) = enrichment.identity {
        append_uniq_id(record, identity);
    }
    if let Some(device) = enrichment.device {
        append_model_information(record, device);
    }
}

/// Insert the install identity under `td_uuid`.
pub fn append_uniq_id(record: &mut Record, identity: &str) {
    put_reserved(record, KEY_UUID, identity);
}

/// Insert the device metadata fields.
pub fn append_model_information(record: &mut Record, device: &DeviceInfo) {
    put_reserved(record, KEY_BOARD, &device.board);
    put_reserved(record, KEY_BRAND, &device.brand);
    put_reserved(record, KEY_DEVICE, &device.device);
    put_reserved(record, KEY_DISPLAY, &device.display);
    put_reserved(record, KEY_MODEL, &device.model);
    put_reserved(record, KEY_OS_VER, &device.os_version);
    put_reserved(record, KEY_OS_TYPE, &device.os_type);
}

fn put_reserved(record: &mut Record, key: &str, value: &str) {
    if let Some(previous) = record.insert(key, value) {
        tracing::debug!(key, previous = %previous, "Overwrote application value for reserved key");
    }
}
