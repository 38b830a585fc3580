//! JSON schema documents for the catalog entities
//!
//! Served to UIs so they can render create/edit forms with the right enum
//! option lists. These are plain JSON documents, not OpenAPI.

use serde_json::{json, Value};

fn string_enum(title: &str, options: &[&str], default: &str) -> Value {
    json!({
        "type": "string",
        "title": title,
        "enum": options,
        "default": default,
    })
}

/// Schema for network create/edit forms.
pub fn network_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "title": "Name" },
            "enable": { "type": "boolean", "title": "Enable", "default": false },
            "transport_type": string_enum(
                "Transport Type",
                &["serial", "ip", "lora"],
                "ip"
            ),
            "serial_port": string_enum(
                "Serial Port",
                &[
                    "/dev/ttyAMA0",
                    "/dev/ttyRS485-1",
                    "/dev/ttyRS485-2",
                    "/dev/ttyUSB0",
                    "/dev/ttyUSB1",
                    "/dev/ttyACM0",
                ],
                "/dev/ttyRS485-2"
            ),
            "serial_baud_rate": string_enum(
                "Baud Rate",
                &["9600", "19200", "38400", "57600", "115200"],
                "38400"
            ),
            "serial_parity": string_enum("Parity", &["none", "odd", "even"], "none"),
            "serial_data_bits": { "type": "integer", "title": "Data Bits", "minimum": 7, "maximum": 8, "default": 8 },
            "serial_stop_bits": { "type": "integer", "title": "Stop Bits", "minimum": 1, "maximum": 2, "default": 1 },
            "serial_timeout": { "type": "integer", "title": "Timeout (seconds)", "default": 2 },
            "host": { "type": "string", "title": "Host" },
            "port": { "type": "integer", "title": "Port", "default": 502 },
            "max_poll_rate": { "type": "number", "title": "Max Poll Rate (seconds)", "minimum": 0.001, "default": 0.1 },
        },
        "required": ["name", "transport_type"],
    })
}

/// Schema for device create/edit forms.
pub fn device_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "title": "Name" },
            "enable": { "type": "boolean", "title": "Enable", "default": false },
            "address_id": { "type": "integer", "title": "Device Address", "minimum": 1, "maximum": 254, "default": 1 },
            "host": { "type": "string", "title": "Host" },
            "port": { "type": "integer", "title": "Port", "default": 502 },
            "zero_mode": { "type": "boolean", "title": "Zero Mode", "default": false },
            "fast_poll_rate": { "type": "number", "title": "Fast Poll Rate (seconds)", "default": 10 },
            "normal_poll_rate": { "type": "number", "title": "Normal Poll Rate (seconds)", "default": 30 },
            "slow_poll_rate": { "type": "number", "title": "Slow Poll Rate (seconds)", "default": 120 },
        },
        "required": ["name", "address_id"],
    })
}

/// Schema for point create/edit forms.
pub fn point_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "title": "Name" },
            "enable": { "type": "boolean", "title": "Enable", "default": false },
            "object_type": string_enum(
                "Object Type",
                &["coil", "discrete_input", "input_register", "holding_register"],
                "coil"
            ),
            "data_type": string_enum(
                "Data Type",
                &[
                    "digital", "uint16", "int16", "uint32", "int32",
                    "uint64", "int64", "float32", "float64", "mod10_u32",
                ],
                "uint16"
            ),
            "object_encoding": string_enum(
                "Object Encoding (Endianness)",
                &["beb_bew", "leb_bew", "beb_lew", "leb_lew"],
                "beb_lew"
            ),
            "address_id": { "type": "integer", "title": "Register", "minimum": 1, "maximum": 65535, "default": 1 },
            "write_mode": string_enum(
                "Write Mode",
                &[
                    "read_once", "read_only", "write_once", "write_once_read_once",
                    "write_always", "write_once_then_read", "write_and_maintain",
                ],
                "read_only"
            ),
            "poll_priority": string_enum(
                "Poll Priority",
                &["asap", "high", "normal", "low"],
                "normal"
            ),
            "poll_rate": string_enum("Poll Rate", &["fast", "normal", "slow"], "normal"),
            "is_bitwise": { "type": "boolean", "title": "Bitwise", "default": false },
            "bitwise_index": { "type": "integer", "title": "Bitwise Index", "minimum": 0, "maximum": 15 },
            "poll_on_startup": { "type": "boolean", "title": "Poll On Startup", "default": true },
        },
        "required": ["name", "object_type", "address_id"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_schema_lists_all_write_modes() {
        let schema = point_schema();
        let modes = schema["properties"]["write_mode"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(modes.len(), 7);
    }

    #[test]
    fn schemas_are_objects() {
        for schema in [network_schema(), device_schema(), point_schema()] {
            assert_eq!(schema["type"], "object");
            assert!(schema["properties"].is_object());
        }
    }
}
