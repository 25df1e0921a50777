//! Wire protocol shared by the cube arena server and its clients.
//!
//! Every record travels as one line of text terminated by `\n`. Server
//! records are JSON-encoded cubes; client records are short tagged
//! commands of the form `(move, x, y)` or `(split, x, y)`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known TCP port for game traffic.
pub const DEFAULT_GAME_PORT: u16 = 11000;

/// Terminates every record on the wire.
pub const RECORD_DELIMITER: char = '\n';

/// Position of the tag character inside a client command, e.g. `(m`.
const COMMAND_TAG_INDEX: usize = 1;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty record")]
    Empty,
    #[error("unknown command tag in record {0:?}")]
    UnknownCommand(String),
    #[error("expected two coordinates in record {0:?}")]
    MissingCoordinates(String),
    #[error("invalid coordinate {0:?}")]
    InvalidCoordinate(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialized form of a single cube as seen by clients.
///
/// The width is never transmitted; receivers derive it from the mass.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CubeRecord {
    #[serde(rename = "loc_x")]
    pub x: f64,
    #[serde(rename = "loc_y")]
    pub y: f64,
    #[serde(rename = "argb_color")]
    pub color: i32,
    pub uid: u32,
    #[serde(rename = "food")]
    pub is_food: bool,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mass")]
    pub mass: f64,
}

impl CubeRecord {
    pub fn width(&self) -> f64 {
        self.mass.sqrt()
    }

    /// Encodes the record as one delimited line.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push(RECORD_DELIMITER);
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::Empty);
        }
        Ok(serde_json::from_str(trimmed)?)
    }
}

/// Concatenates records into a single payload, one line each.
pub fn encode_records<'a, I>(records: I) -> Result<String, ProtocolError>
where
    I: IntoIterator<Item = &'a CubeRecord>,
{
    let mut payload = String::new();
    for record in records {
        payload.push_str(&record.to_line()?);
    }
    Ok(payload)
}

/// Steady-state command sent by a client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientCommand {
    Move { x: f64, y: f64 },
    Split { x: f64, y: f64 },
}

impl ClientCommand {
    /// Parses one record (without its delimiter).
    ///
    /// The command kind is taken from the character right after the
    /// opening parenthesis; the two trailing comma-separated fields are
    /// the target coordinates.
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        let record = record.trim();
        if record.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let tag = record.chars().nth(COMMAND_TAG_INDEX);
        let body = record.trim_start_matches('(').trim_end_matches(')');
        let mut fields = body.split(',').skip(1).map(str::trim);

        let (Some(raw_x), Some(raw_y)) = (fields.next(), fields.next()) else {
            return Err(ProtocolError::MissingCoordinates(record.to_string()));
        };
        let x = parse_coordinate(raw_x)?;
        let y = parse_coordinate(raw_y)?;

        match tag {
            Some('m') => Ok(ClientCommand::Move { x, y }),
            Some('s') => Ok(ClientCommand::Split { x, y }),
            _ => Err(ProtocolError::UnknownCommand(record.to_string())),
        }
    }

    pub fn target(&self) -> (f64, f64) {
        match *self {
            ClientCommand::Move { x, y } | ClientCommand::Split { x, y } => (x, y),
        }
    }

    pub fn to_line(&self) -> String {
        match *self {
            ClientCommand::Move { x, y } => format!("(move, {}, {}){}", x, y, RECORD_DELIMITER),
            ClientCommand::Split { x, y } => format!("(split, {}, {}){}", x, y, RECORD_DELIMITER),
        }
    }
}

fn parse_coordinate(raw: &str) -> Result<f64, ProtocolError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ProtocolError::InvalidCoordinate(raw.to_string())),
    }
}

/// Removes every complete record from `buffer` and returns them in order.
///
/// A trailing fragment without a delimiter stays in the buffer so the next
/// read can complete it. Blank records are skipped.
pub fn drain_records(buffer: &mut String) -> Vec<String> {
    let Some(last_delimiter) = buffer.rfind(RECORD_DELIMITER) else {
        return Vec::new();
    };

    let remainder = buffer.split_off(last_delimiter + 1);
    let complete = std::mem::replace(buffer, remainder);

    complete
        .split(RECORD_DELIMITER)
        .map(|record| record.trim_end_matches('\r'))
        .filter(|record| !record.trim().is_empty())
        .map(str::to_string)
        .collect()
}
