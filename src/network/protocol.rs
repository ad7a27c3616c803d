//! Protocol Messages
//!
//! Wire format for client-server communication: one message per line,
//! newline-terminated UTF-8 text, fields colon-separated, first field a
//! tag. The format is kept for compatibility with existing clients; inside
//! the server every line is parsed into a typed message at the session
//! boundary so downstream logic never touches raw strings.
//!
//! A line that fails to parse is a single well-defined error case; the
//! session handler treats it like a disconnect.

use thiserror::Error;

use crate::race::state::PlayerId;

/// Protocol parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Empty line.
    #[error("empty message")]
    Empty,

    /// First field is not a recognized tag.
    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    /// A required field is missing.
    #[error("{tag} message missing field {field}")]
    MissingField {
        /// Message tag.
        tag: &'static str,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field that must be numeric is not.
    #[error("{tag} field {field} is not a number: {value:?}")]
    InvalidNumber {
        /// Message tag.
        tag: &'static str,
        /// Name of the offending field.
        field: &'static str,
        /// The raw field text.
        value: String,
    },
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// This player's current position.
    PositionUpdate {
        /// X coordinate.
        x: f64,
        /// Y coordinate.
        y: f64,
    },

    /// This player picked up an item.
    ItemCollected {
        /// World-unique item identifier.
        item_id: String,
    },

    /// This player entered a room for the first time.
    RoomVisited {
        /// Room identifier.
        room_id: i32,
    },

    /// This player moved to another floor.
    FloorChanged {
        /// Display name of the floor, may contain spaces.
        floor: String,
    },

    /// Claim that a player reached the goal.
    VictoryClaim {
        /// The claimed winner.
        player: PlayerId,
    },

    /// The client's local clock ran out.
    TimeUp,

    /// Graceful-shutdown notice.
    Disconnecting,
}

impl ClientMessage {
    /// Parse one wire line into a typed message.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (tag, rest) = match line.split_once(':') {
            Some((tag, rest)) => (tag, Some(rest)),
            None => (line, None),
        };

        match tag {
            "POSITION_UPDATE" => {
                let rest = rest.ok_or(ProtocolError::MissingField {
                    tag: "POSITION_UPDATE",
                    field: "x",
                })?;
                let (x, y) = rest.split_once(':').ok_or(ProtocolError::MissingField {
                    tag: "POSITION_UPDATE",
                    field: "y",
                })?;
                Ok(ClientMessage::PositionUpdate {
                    x: parse_num("POSITION_UPDATE", "x", x)?,
                    y: parse_num("POSITION_UPDATE", "y", y)?,
                })
            }
            "ITEM_COLLECTED" => {
                let item_id = rest.ok_or(ProtocolError::MissingField {
                    tag: "ITEM_COLLECTED",
                    field: "itemId",
                })?;
                Ok(ClientMessage::ItemCollected {
                    item_id: item_id.to_string(),
                })
            }
            "ROOM_VISITED" => {
                let room_id = rest.ok_or(ProtocolError::MissingField {
                    tag: "ROOM_VISITED",
                    field: "roomId",
                })?;
                Ok(ClientMessage::RoomVisited {
                    room_id: parse_num("ROOM_VISITED", "roomId", room_id)?,
                })
            }
            "FLOOR_CHANGED" => {
                let floor = rest.ok_or(ProtocolError::MissingField {
                    tag: "FLOOR_CHANGED",
                    field: "floorName",
                })?;
                Ok(ClientMessage::FloorChanged {
                    floor: floor.to_string(),
                })
            }
            "VICTORY" => {
                let player = rest.ok_or(ProtocolError::MissingField {
                    tag: "VICTORY",
                    field: "playerId",
                })?;
                Ok(ClientMessage::VictoryClaim {
                    player: PlayerId::new(parse_num("VICTORY", "playerId", player)?),
                })
            }
            "TIME_UP" => Ok(ClientMessage::TimeUp),
            "PLAYER_DISCONNECTING" => Ok(ClientMessage::Disconnecting),
            other => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }
}

fn parse_num<T: std::str::FromStr>(
    tag: &'static str,
    field: &'static str,
    value: &str,
) -> Result<T, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        tag,
        field,
        value: value.to_string(),
    })
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Assigns this connection's player identity.
    PlayerAssigned(PlayerId),

    /// Both players connected; the race begins.
    StartGame,

    /// Relay of a player's position.
    PlayerPosition {
        /// Player whose position this is.
        player: PlayerId,
        /// X coordinate.
        x: f64,
        /// Y coordinate.
        y: f64,
    },

    /// An item was removed from the world.
    ItemCollected {
        /// Player who collected it.
        player: PlayerId,
        /// World-unique item identifier.
        item_id: String,
    },

    /// A room was marked explored.
    RoomVisited {
        /// Player who visited it.
        player: PlayerId,
        /// Room identifier.
        room_id: i32,
    },

    /// A player changed floors.
    FloorChanged {
        /// Player who moved.
        player: PlayerId,
        /// Display name of the floor.
        floor: String,
    },

    /// Confirms the recipient won the race.
    Victory(PlayerId),

    /// Confirms the recipient lost the race.
    Defeat {
        /// Human-readable reason.
        reason: String,
    },

    /// The race clock expired with no winner.
    TimeUpDefeat,
}

impl ServerMessage {
    /// Encode for the wire, without the trailing newline (framing is the
    /// writer's job).
    pub fn encode(&self) -> String {
        match self {
            ServerMessage::PlayerAssigned(player) => format!("PLAYER_ID:{player}"),
            ServerMessage::StartGame => "START_GAME".to_string(),
            ServerMessage::PlayerPosition { player, x, y } => {
                format!("PLAYER_POSITION:{player}:{x}:{y}")
            }
            ServerMessage::ItemCollected { player, item_id } => {
                format!("ITEM_COLLECTED:{player}:{item_id}")
            }
            ServerMessage::RoomVisited { player, room_id } => {
                format!("ROOM_VISITED:{player}:{room_id}")
            }
            ServerMessage::FloorChanged { player, floor } => {
                format!("FLOOR_CHANGED:{player}:{floor}")
            }
            ServerMessage::Victory(player) => format!("VICTORY:{player}"),
            ServerMessage::Defeat { reason } => format!("DEFEAT:{reason}"),
            ServerMessage::TimeUpDefeat => "TIME_UP_DEFEAT".to_string(),
        }
    }
}
