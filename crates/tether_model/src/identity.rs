//! Identity facts. A user or device is durably identified within the graph
//! by the hash of a fact whose single field is its PEM public key.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::fact::FactRecord;

pub const USER_FACT_TYPE: &str = "Jinaga.User";
pub const DEVICE_FACT_TYPE: &str = "Jinaga.Device";
pub const PUBLIC_KEY_FIELD: &str = "publicKey";

pub fn user_fact(public_key: &str) -> FactRecord {
    identity_fact(USER_FACT_TYPE, public_key)
}

pub fn device_fact(public_key: &str) -> FactRecord {
    identity_fact(DEVICE_FACT_TYPE, public_key)
}

fn identity_fact(fact_type: &str, public_key: &str) -> FactRecord {
    let mut fields = Map::new();
    fields.insert(PUBLIC_KEY_FIELD.to_string(), Value::String(public_key.to_string()));
    FactRecord::new(fact_type, fields, BTreeMap::new())
}
