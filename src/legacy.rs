// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Legacy `keyhole_stats.*` files
//!
//! Line-oriented JSON captures, read in groups of three lines: an array of
//! `serverStatus` documents, an array of `replSetGetStatus` documents, and
//! (on line 3 only) the server info object. Status documents are flattened
//! into the same `path -> series` shape as decoded blocks and go through
//! the same projector.

use std::collections::HashMap;
use std::path::Path;

use chrono::DateTime;
use serde_json::Value as Json;
use tracing::debug;

use crate::attribs::Projector;
use crate::decoder::PATH_SEPARATOR;
use crate::docs::{DiagnosticData, ReplMember, ReplSetStatus, ServerInfo};
use crate::error::{FtdcError, Result};

/// Basename prefix of legacy capture files
pub const KEYHOLE_PREFIX: &str = "keyhole_stats.";

/// Read one legacy file from disk
pub fn read_keyhole_file(path: &Path) -> Result<DiagnosticData> {
    let label = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| FtdcError::io(label.clone(), &e))?;
    parse_keyhole_stats(&text, &label)
}

/// Parse the contents of a legacy file; `label` names it in errors
pub fn parse_keyhole_stats(text: &str, label: &str) -> Result<DiagnosticData> {
    let mut data = DiagnosticData::default();
    let mut count = 0usize;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        count += 1;
        let parse_err = |e: serde_json::Error| FtdcError::Json {
            path: label.to_string(),
            line: line_no + 1,
            reason: e.to_string(),
        };

        match count % 3 {
            1 => {
                let docs: Vec<Json> = serde_json::from_str(line).map_err(parse_err)?;
                for doc in &docs {
                    let mut map = HashMap::new();
                    flatten_json(doc, "serverStatus", &mut map);
                    data.server_status.push(Projector::new(&map).server_status(0));
                }
            }
            2 => {
                let docs: Vec<Json> = serde_json::from_str(line).map_err(parse_err)?;
                data.repl_status.extend(docs.iter().filter_map(repl_status_from_json));
            }
            _ if count == 3 => {
                let info: ServerInfo = serde_json::from_str(line).map_err(parse_err)?;
                data.server_info = Some(info);
            }
            _ => {}
        }
    }

    if data.server_status.is_empty() && data.repl_status.is_empty() {
        return Err(FtdcError::NoData);
    }
    debug!(
        file = label,
        samples = data.server_status.len(),
        repl = data.repl_status.len(),
        "keyhole stats loaded"
    );
    Ok(data)
}

/// Flatten a JSON document into single-sample series under `prefix`
pub fn flatten_json(value: &Json, prefix: &str, out: &mut HashMap<String, Vec<u64>>) {
    if let Some(scalar) = json_scalar(value) {
        out.entry(prefix.to_string()).or_insert_with(|| vec![scalar]);
        return;
    }
    match value {
        Json::Object(map) => {
            if let Some((t, i)) = extended_timestamp(value) {
                out.entry(format!("{}{}t", prefix, PATH_SEPARATOR))
                    .or_insert_with(|| vec![t]);
                out.entry(format!("{}{}i", prefix, PATH_SEPARATOR))
                    .or_insert_with(|| vec![i]);
                return;
            }
            for (key, child) in map {
                flatten_json(child, &format!("{}{}{}", prefix, PATH_SEPARATOR, key), out);
            }
        }
        Json::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_json(child, &format!("{}{}{}", prefix, PATH_SEPARATOR, i), out);
            }
        }
        _ => {}
    }
}

/// Numeric value of a JSON leaf, with extended-JSON wrappers and dates
fn json_scalar(value: &Json) -> Option<u64> {
    match value {
        Json::Bool(b) => Some(*b as u64),
        Json::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v as u64))
            .or_else(|| n.as_f64().map(|v| v as u64)),
        Json::String(s) => parse_datetime_ms(s).map(|ms| ms as u64),
        Json::Object(map) if map.len() == 1 => {
            let (key, inner) = map.iter().next()?;
            match key.as_str() {
                "$numberLong" | "$numberInt" => inner.as_str()?.parse::<i64>().ok().map(|v| v as u64),
                "$numberDouble" => inner.as_str()?.parse::<f64>().ok().map(|v| v as u64),
                "$date" => json_datetime_ms(value).map(|ms| ms as u64),
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_datetime_ms(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Epoch ms of an RFC 3339 string, `{"$date": ...}` or a number
pub fn json_datetime_ms(value: &Json) -> Option<i64> {
    match value {
        Json::String(s) => parse_datetime_ms(s),
        Json::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|v| v as i64)),
        Json::Object(map) => {
            let inner = map.get("$date")?;
            match inner {
                Json::Object(wrapped) => wrapped
                    .get("$numberLong")?
                    .as_str()?
                    .parse::<i64>()
                    .ok(),
                other => json_datetime_ms(other),
            }
        }
        _ => None,
    }
}

/// `{"$timestamp": {"t", "i"}}` or a marshalled `{"T", "I"}` pair
fn extended_timestamp(value: &Json) -> Option<(u64, u64)> {
    let ts = value.get("$timestamp").unwrap_or(value);
    let t = ts.get("t").or_else(|| ts.get("T"))?.as_u64()?;
    let i = ts.get("i").or_else(|| ts.get("I"))?.as_u64()?;
    // {"t", "i"} without the wrapper is only a timestamp inside "$timestamp"
    if value.get("$timestamp").is_none() && ts.get("T").is_none() {
        return None;
    }
    Some((t, i))
}

fn optime_secs_json(optime: &Json) -> i64 {
    let ts = optime.get("ts").unwrap_or(optime);
    if let Some((t, _)) = extended_timestamp(ts) {
        return t as i64;
    }
    ts.as_i64().unwrap_or(0)
}

fn repl_status_from_json(doc: &Json) -> Option<ReplSetStatus> {
    let members: Vec<ReplMember> = doc
        .get("members")?
        .as_array()?
        .iter()
        .map(|m| ReplMember {
            name: m
                .get("name")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string(),
            state: m.get("state").and_then(Json::as_i64).unwrap_or(0) as i32,
            optime_secs: m.get("optime").map(optime_secs_json).unwrap_or(0),
        })
        .collect();
    if members.is_empty() {
        return None;
    }
    Some(ReplSetStatus {
        date_ms: doc.get("date").and_then(json_datetime_ms).unwrap_or(0),
        members,
    })
}
