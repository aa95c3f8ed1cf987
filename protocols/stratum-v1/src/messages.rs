// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Message shapes of the V1 dialect. Everything the pool sends is positional
//! so the parsers here keep the exact positional handling, only translated
//! into typed structures.

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Method names the client dispatches on
pub mod method {
    pub const SUBSCRIBE: &str = "mining.subscribe";
    pub const AUTHORIZE: &str = "mining.authorize";
    pub const SUBMIT: &str = "mining.submit";
    pub const NOTIFY: &str = "mining.notify";
    pub const SET_DIFFICULTY: &str = "mining.set_difficulty";
    pub const SET_EXTRANONCE: &str = "mining.set_extranonce";
    pub const CLIENT_RECONNECT: &str = "client.reconnect";
    pub const CLIENT_GET_VERSION: &str = "client.get_version";
}

/// Upper bound on merkle branch length the client accepts
pub const MAX_MERKLE_BRANCHES: usize = 16;

/// One line of the dialect, either direction. Requests/notifications carry
/// `method` + `params`, responses carry `result`/`error`; `id` correlates
/// responses with requests and is absent (null) on notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Value,
}

impl Frame {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// True when this line carries a method call (notification or request)
    #[inline]
    pub fn is_method_call(&self) -> bool {
        self.method.is_some()
    }

    /// True for a response whose `result` is a truthy value
    pub fn is_success_response(&self) -> bool {
        !self.is_method_call()
            && self.error.is_null()
            && match &self.result {
                Value::Bool(value) => *value,
                Value::Null => false,
                _ => true,
            }
    }
}

fn params_array(params: &Value) -> Result<&Vec<Value>> {
    params
        .as_array()
        .ok_or_else(|| Error::BadParams("params is not an array".to_string()))
}

fn param_str<'a>(params: &'a [Value], index: usize, what: &'static str) -> Result<&'a str> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or(Error::MissingField(what))
}

fn param_hex_u32(params: &[Value], index: usize, what: &'static str) -> Result<u32> {
    let field = param_str(params, index, what)?;
    u32::from_str_radix(field, 16)
        .map_err(|e| Error::BadParams(format!("{}: {}", what, e)))
}

fn hex_bytes(field: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(field)?)
}

fn hex_hash(field: &str) -> Result<[u8; 32]> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(field, &mut bytes)?;
    Ok(bytes)
}

/// Parsed result of `mining.subscribe`: the session extranonce1 and the
/// width of the miner controlled extranonce2 field
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeResult {
    pub extranonce1: Vec<u8>,
    pub extranonce2_size: usize,
}

impl SubscribeResult {
    /// The result is a pair-like array: subscriptions (ignored), hex
    /// extranonce1, integer extranonce2 size
    pub fn from_result(result: &Value) -> Result<Self> {
        let items = result
            .as_array()
            .ok_or_else(|| Error::BadParams("subscribe result is not an array".to_string()))?;
        let extranonce1 = hex_bytes(
            items
                .get(1)
                .and_then(Value::as_str)
                .ok_or(Error::MissingField("extranonce1"))?,
        )?;
        let extranonce2_size = items
            .get(2)
            .and_then(Value::as_u64)
            .ok_or(Error::MissingField("extranonce2_size"))? as usize;
        Ok(Self {
            extranonce1,
            extranonce2_size,
        })
    }
}

/// `mining.notify` with its nine positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Notify {
    pub job_id: String,
    pub prev_hash: [u8; 32],
    pub coinbase1: Vec<u8>,
    pub coinbase2: Vec<u8>,
    pub merkle_branch: Vec<[u8; 32]>,
    pub version: u32,
    pub bits: u32,
    pub time: u32,
    pub clean_jobs: bool,
}

impl Notify {
    pub fn from_params(params: &Value) -> Result<Self> {
        let params = params_array(params)?;

        let merkle_branch_value = params.get(4).ok_or(Error::MissingField("merkle_branch"))?;
        // some pool implementations ship the branch as a JSON encoded string
        let merkle_branch_items = match merkle_branch_value {
            Value::Array(items) => items.clone(),
            Value::String(text) => serde_json::from_str::<Vec<Value>>(text)?,
            _ => return Err(Error::BadParams("merkle_branch shape".to_string())),
        };
        if merkle_branch_items.len() > MAX_MERKLE_BRANCHES {
            return Err(Error::BadParams(format!(
                "merkle branch too long: {}",
                merkle_branch_items.len()
            )));
        }
        let mut merkle_branch = Vec::with_capacity(merkle_branch_items.len());
        for item in &merkle_branch_items {
            let field = item
                .as_str()
                .ok_or(Error::MissingField("merkle_branch entry"))?;
            merkle_branch.push(hex_hash(field)?);
        }

        Ok(Self {
            job_id: param_str(params, 0, "job_id")?.to_string(),
            prev_hash: hex_hash(param_str(params, 1, "prev_hash")?)?,
            coinbase1: hex_bytes(param_str(params, 2, "coinbase1")?)?,
            coinbase2: hex_bytes(param_str(params, 3, "coinbase2")?)?,
            merkle_branch,
            version: param_hex_u32(params, 5, "version")?,
            bits: param_hex_u32(params, 6, "bits")?,
            time: param_hex_u32(params, 7, "time")?,
            clean_jobs: params
                .get(8)
                .and_then(Value::as_bool)
                .ok_or(Error::MissingField("clean_jobs"))?,
        })
    }
}

/// `mining.set_difficulty`
#[derive(Debug, Clone, PartialEq)]
pub struct SetDifficulty {
    pub difficulty: f64,
}

impl SetDifficulty {
    pub fn from_params(params: &Value) -> Result<Self> {
        let params = params_array(params)?;
        let difficulty = params
            .get(0)
            .and_then(Value::as_f64)
            .ok_or(Error::MissingField("difficulty"))?;
        Ok(Self { difficulty })
    }
}

/// `mining.set_extranonce`
#[derive(Debug, Clone, PartialEq)]
pub struct SetExtranonce {
    pub extranonce1: Vec<u8>,
    pub extranonce2_size: usize,
}

impl SetExtranonce {
    pub fn from_params(params: &Value) -> Result<Self> {
        let params = params_array(params)?;
        Ok(Self {
            extranonce1: hex_bytes(param_str(params, 0, "extranonce1")?)?,
            extranonce2_size: params
                .get(1)
                .and_then(Value::as_u64)
                .ok_or(Error::MissingField("extranonce2_size"))? as usize,
        })
    }
}

/// `client.reconnect`; an empty parameter list means "reconnect to the same
/// endpoint"
#[derive(Debug, Clone, PartialEq)]
pub struct Reconnect {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Reconnect {
    pub fn from_params(params: &Value) -> Result<Self> {
        // params may be absent entirely
        let params = match params.as_array() {
            Some(items) => items,
            None => return Ok(Self::default()),
        };
        let host = params
            .get(0)
            .and_then(Value::as_str)
            .filter(|host| !host.is_empty())
            .map(str::to_string);
        let port = params
            .get(1)
            .and_then(|value| match value {
                // some pools send the port as a string
                Value::String(text) => text.parse::<u64>().ok(),
                other => other.as_u64(),
            })
            .map(|port| port as u16);
        Ok(Self { host, port })
    }
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
        }
    }
}

fn serialize_line(value: Value) -> String {
    let mut line = value.to_string();
    line.push('\n');
    line
}

/// Build a `mining.subscribe` request line
pub fn subscribe(id: u64, agent: &str) -> String {
    serialize_line(json!({
        "id": id,
        "method": method::SUBSCRIBE,
        "params": [agent],
    }))
}

/// Build a `mining.authorize` request line
pub fn authorize(id: u64, user: &str, password: &str) -> String {
    serialize_line(json!({
        "id": id,
        "method": method::AUTHORIZE,
        "params": [user, password],
    }))
}

/// Build a `mining.submit` request line; all payload fields are expected to
/// be lower case hex already
pub fn submit(
    id: u64,
    user: &str,
    job_id: &str,
    extranonce2_hex: &str,
    time_hex: &str,
    nonce_hex: &str,
) -> String {
    serialize_line(json!({
        "id": id,
        "method": method::SUBMIT,
        "params": [user, job_id, extranonce2_hex, time_hex, nonce_hex],
    }))
}

/// Build the response to `client.get_version`
pub fn version_reply(id: u64, agent: &str) -> String {
    serialize_line(json!({
        "id": id,
        "result": agent,
        "error": null,
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_subscribe_result() {
        let frame = Frame::parse(
            r#"{"id":1,"result":[[["mining.notify","s"]], "81000000", 4], "error":null}"#,
        )
        .expect("parse subscribe response");
        assert_eq!(frame.id, Some(1));
        assert!(!frame.is_method_call());

        let result = SubscribeResult::from_result(&frame.result).expect("parse result");
        assert_eq!(result.extranonce1, vec![0x81, 0x00, 0x00, 0x00]);
        assert_eq!(result.extranonce2_size, 4);
    }

    #[test]
    fn test_parse_notify() {
        let line = format!(
            r#"{{"id":null,"method":"mining.notify","params":["j1","{}","01000000","00",[],"20000000","1d00ffff","5f5e1000",true]}}"#,
            "00".repeat(32)
        );
        let frame = Frame::parse(&line).expect("parse notify");
        assert_eq!(frame.method.as_deref(), Some(method::NOTIFY));

        let notify = Notify::from_params(&frame.params).expect("parse params");
        assert_eq!(notify.job_id, "j1");
        assert_eq!(notify.prev_hash, [0u8; 32]);
        assert_eq!(notify.coinbase1, vec![0x01, 0x00, 0x00, 0x00]);
        assert_eq!(notify.coinbase2, vec![0x00]);
        assert!(notify.merkle_branch.is_empty());
        assert_eq!(notify.version, 0x20000000);
        assert_eq!(notify.bits, 0x1d00ffff);
        assert_eq!(notify.time, 0x5f5e1000);
        assert!(notify.clean_jobs);
    }

    #[test]
    fn test_parse_notify_branch_as_string() {
        let branch_entry = "aa".repeat(32);
        let line = format!(
            r#"{{"id":null,"method":"mining.notify","params":["j2","{}","01","00","[\"{}\"]","20000000","1d00ffff","5f5e1000",false]}}"#,
            "11".repeat(32),
            branch_entry
        );
        let frame = Frame::parse(&line).expect("parse notify");
        let notify = Notify::from_params(&frame.params).expect("parse params");
        assert_eq!(notify.merkle_branch.len(), 1);
        assert_eq!(notify.merkle_branch[0], [0xaa; 32]);
        assert!(!notify.clean_jobs);
    }

    #[test]
    fn test_notify_branch_limit() {
        let branch = vec![Value::String("cc".repeat(32)); MAX_MERKLE_BRANCHES + 1];
        let params = json!([
            "j3",
            "22".repeat(32),
            "01",
            "00",
            branch,
            "20000000",
            "1d00ffff",
            "5f5e1000",
            true
        ]);
        assert!(matches!(
            Notify::from_params(&params),
            Err(Error::BadParams(_))
        ));
    }

    #[test]
    fn test_parse_set_difficulty() {
        let frame =
            Frame::parse(r#"{"id":null,"method":"mining.set_difficulty","params":[8192]}"#)
                .expect("parse set_difficulty");
        let set_diff = SetDifficulty::from_params(&frame.params).expect("parse params");
        assert_eq!(set_diff.difficulty, 8192.0);
    }

    #[test]
    fn test_parse_reconnect() {
        let frame = Frame::parse(
            r#"{"id":null,"method":"client.reconnect","params":["pool2.example.com",3334]}"#,
        )
        .expect("parse reconnect");
        let reconnect = Reconnect::from_params(&frame.params).expect("parse params");
        assert_eq!(reconnect.host.as_deref(), Some("pool2.example.com"));
        assert_eq!(reconnect.port, Some(3334));

        let empty = Reconnect::from_params(&json!([])).expect("empty params");
        assert_eq!(empty, Reconnect::default());
    }

    #[test]
    fn test_request_builders() {
        let line = subscribe(1, "cnminer/0.1.0");
        assert!(line.ends_with('\n'));
        let frame = Frame::parse(line.trim_end()).expect("parse built request");
        assert_eq!(frame.id, Some(1));
        assert_eq!(frame.method.as_deref(), Some(method::SUBSCRIBE));
        assert_eq!(frame.params, json!(["cnminer/0.1.0"]));

        let line = submit(7, "worker.1", "j1", "00000000", "5f5e1000", "12345678");
        let frame = Frame::parse(line.trim_end()).expect("parse built submit");
        assert_eq!(frame.id, Some(7));
        assert_eq!(
            frame.params,
            json!(["worker.1", "j1", "00000000", "5f5e1000", "12345678"])
        );
    }

    #[test]
    fn test_version_reply() {
        let line = version_reply(3, "cnminer/0.1.0");
        let frame = Frame::parse(line.trim_end()).expect("parse version reply");
        assert_eq!(frame.id, Some(3));
        assert!(frame.is_success_response());
        assert_eq!(frame.result, json!("cnminer/0.1.0"));
    }

    #[test]
    fn test_response_truthiness() {
        let ok = Frame::parse(r#"{"id":5,"result":true,"error":null}"#).unwrap();
        assert!(ok.is_success_response());

        let rejected = Frame::parse(r#"{"id":5,"result":false,"error":null}"#).unwrap();
        assert!(!rejected.is_success_response());

        let errored =
            Frame::parse(r#"{"id":5,"result":null,"error":[21,"Job not found",null]}"#).unwrap();
        assert!(!errored.is_success_response());
    }
}
