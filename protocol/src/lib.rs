//! The wire message shapes exchanged between this client and the relay
//! server. Every message carries a `type` discriminant (matching the
//! JSON-equivalent framing described by the coordination core); the actual
//! socket transport and JSON/byte framing live outside this crate.
//!
//! Two enums are exported: [`OutboundMessage`] for client -> server
//! traffic and [`InboundMessage`] for server -> client traffic. They are
//! not symmetric: most duel/battle variants appear on both sides, but a
//! handful only make sense in one direction (`duel_warp` is inbound-only,
//! `duel_player_info` is outbound-only).

use serde::{Deserialize, Serialize};

/// A remote player's advertised map connection, as seen from their own map.
/// Mirrors the local position sample's `connections` field so the same
/// type describes both sides of a position packet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub direction: Direction,
    pub offset: i32,
    pub map_group: u8,
    pub map_id: u8,
}

/// One of the four cardinal map-border directions used by the projector's
/// connection formulas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    N,
    S,
    W,
    E,
}

/// The map/position a moving packet transitioned from, carried only when
/// the sender believes it just crossed a map seam.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionFrom {
    pub map_group: u8,
    pub map_id: u8,
    pub x: i32,
    pub y: i32,
}

/// How confident the sender is that a map change was a walked seam rather
/// than a teleport/warp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    SeamConnected,
    LikelySeam,
    None,
}

/// The context fields that ride along with a relayed battle command —
/// the battler indices the engine had latched at dispatch time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferCmdContext {
    pub attacker: u8,
    pub target: u8,
    pub absent: u8,
    pub effect: u8,
}

/// `duel_stage`'s payload: either one of the two named stages the
/// coordination core emits, or an arbitrary integer stage code forwarded
/// verbatim from the battle engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DuelStage {
    Named(String),
    Code(i32),
}

impl DuelStage {
    pub const MAINLOOP_READY: &'static str = "mainloop_ready";
    pub const MAINLOOP_ENTERED: &'static str = "mainloop_entered";

    pub fn mainloop_ready() -> Self {
        DuelStage::Named(Self::MAINLOOP_READY.to_string())
    }

    pub fn mainloop_entered() -> Self {
        DuelStage::Named(Self::MAINLOOP_ENTERED.to_string())
    }
}

/// Messages this client sends to the relay server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Emitted whenever tile/map/facing changes, or at a heartbeat interval.
    Position {
        x: i16,
        y: i16,
        #[serde(rename = "mapId")]
        map_id: u8,
        #[serde(rename = "mapGroup")]
        map_group: u8,
        facing: u8,
        #[serde(rename = "timeMs")]
        time_ms: u64,
        #[serde(rename = "mapRev")]
        map_rev: u32,
        #[serde(rename = "metaStable")]
        meta_stable: bool,
        #[serde(rename = "metaHash")]
        meta_hash: u32,
        #[serde(rename = "borderX", skip_serializing_if = "Option::is_none")]
        border_x: Option<u16>,
        #[serde(rename = "borderY", skip_serializing_if = "Option::is_none")]
        border_y: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        connections: Option<Vec<ConnectionInfo>>,
        #[serde(rename = "transitionFrom", skip_serializing_if = "Option::is_none")]
        transition_from: Option<TransitionFrom>,
        #[serde(rename = "transitionKind", skip_serializing_if = "Option::is_none")]
        transition_kind: Option<TransitionKind>,
        #[serde(rename = "transitionToken", skip_serializing_if = "Option::is_none")]
        transition_token: Option<u32>,
    },
    DuelRequest {
        #[serde(rename = "targetId")]
        target_id: String,
    },
    DuelAccept {
        #[serde(rename = "requesterId")]
        requester_id: String,
    },
    DuelDecline {
        #[serde(rename = "requesterId")]
        requester_id: String,
    },
    /// Sent once per duel.
    DuelPlayerInfo {
        name: Vec<u8>,
        gender: u8,
        #[serde(rename = "trainerId")]
        trainer_id: u32,
    },
    DuelStage {
        stage: DuelStage,
    },
    /// Host -> client relayed command.
    DuelBufferCmd {
        battler: u8,
        #[serde(rename = "bufA")]
        buf_a: Vec<u8>,
        #[serde(rename = "bufB", skip_serializing_if = "Option::is_none")]
        buf_b: Option<Vec<u8>>,
        ctx: BufferCmdContext,
    },
    /// Client -> host relayed response.
    DuelBufferResp {
        battler: u8,
        #[serde(rename = "bufB")]
        buf_b: Vec<u8>,
    },
    /// Client -> host acknowledgement.
    DuelBufferAck { battler: u8 },
}

/// Messages the relay server forwards to this client, originating from a
/// peer. Symmetric to [`OutboundMessage`] plus the two variants below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Position {
        x: i16,
        y: i16,
        #[serde(rename = "mapId")]
        map_id: u8,
        #[serde(rename = "mapGroup")]
        map_group: u8,
        facing: u8,
        #[serde(rename = "timeMs")]
        time_ms: u64,
        #[serde(rename = "mapRev")]
        map_rev: u32,
        #[serde(rename = "metaStable")]
        meta_stable: bool,
        #[serde(rename = "metaHash")]
        meta_hash: u32,
        #[serde(rename = "borderX", skip_serializing_if = "Option::is_none")]
        border_x: Option<u16>,
        #[serde(rename = "borderY", skip_serializing_if = "Option::is_none")]
        border_y: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        connections: Option<Vec<ConnectionInfo>>,
        #[serde(rename = "transitionFrom", skip_serializing_if = "Option::is_none")]
        transition_from: Option<TransitionFrom>,
        #[serde(rename = "transitionKind", skip_serializing_if = "Option::is_none")]
        transition_kind: Option<TransitionKind>,
        #[serde(rename = "transitionToken", skip_serializing_if = "Option::is_none")]
        transition_token: Option<u32>,
        /// Who this position update came from.
        #[serde(rename = "playerId")]
        player_id: String,
    },
    DuelRequest {
        #[serde(rename = "requesterId")]
        requester_id: String,
        #[serde(rename = "requesterName")]
        requester_name: String,
    },
    DuelAccept {
        #[serde(rename = "targetId")]
        target_id: String,
    },
    DuelDecline {
        #[serde(rename = "targetId")]
        target_id: String,
    },
    DuelDeclined { from: String },
    DuelWarp {
        #[serde(rename = "isMaster")]
        is_master: bool,
        #[serde(rename = "originPos")]
        origin_pos: OriginPos,
    },
    DuelPlayerInfo {
        name: Vec<u8>,
        gender: u8,
        #[serde(rename = "trainerId")]
        trainer_id: u32,
    },
    DuelStage {
        stage: DuelStage,
    },
    DuelBufferCmd {
        battler: u8,
        #[serde(rename = "bufA")]
        buf_a: Vec<u8>,
        #[serde(rename = "bufB", skip_serializing_if = "Option::is_none")]
        buf_b: Option<Vec<u8>>,
        ctx: BufferCmdContext,
    },
    DuelBufferResp {
        battler: u8,
        #[serde(rename = "bufB")]
        buf_b: Vec<u8>,
    },
    DuelBufferAck { battler: u8 },
}

/// The pre-duel position snapshot carried by `duel_warp`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OriginPos {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "mapGroup")]
    pub map_group: u8,
    #[serde(rename = "mapId")]
    pub map_id: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duel_stage_named_round_trips_through_json() {
        let stage = DuelStage::mainloop_ready();
        let json = serde_json::to_string(&stage).unwrap();
        assert_eq!(json, "\"mainloop_ready\"");
        let back: DuelStage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stage);
    }

    #[test]
    fn duel_stage_code_round_trips_through_json() {
        let stage = DuelStage::Code(7);
        let json = serde_json::to_string(&stage).unwrap();
        assert_eq!(json, "7");
        let back: DuelStage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stage);
    }

    #[test]
    fn outbound_position_tag_is_snake_case() {
        let msg = OutboundMessage::Position {
            x: 1,
            y: 2,
            map_id: 3,
            map_group: 4,
            facing: 0,
            time_ms: 0,
            map_rev: 0,
            meta_stable: true,
            meta_hash: 0,
            border_x: None,
            border_y: None,
            connections: None,
            transition_from: None,
            transition_kind: None,
            transition_token: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "position");
        assert_eq!(json["mapId"], 3);
    }

    #[test]
    fn duel_buffer_cmd_round_trips() {
        let msg = InboundMessage::DuelBufferCmd {
            battler: 1,
            buf_a: vec![0x07, 0, 0, 0],
            buf_b: None,
            ctx: BufferCmdContext {
                attacker: 0,
                target: 1,
                absent: 0,
                effect: 0,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: InboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
