//! Learn RPC message schemas and CBOR encoding.
//!
//! Bodies are CBOR maps keyed by short field names; unknown keys are
//! skipped so either side can grow the schema.

use std::convert::Infallible;

use bytes::Bytes;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

use crate::core::{Ballot, Decree, Gpid, NodeId, PartitionConfig, ReplicaStatus};

use super::LearningStatus;

/// Error code carried inside a `LearnResponse`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LearnRpcError {
    InvalidState,
    ObjectNotFound,
    GetLearnStateFailed,
}

impl LearnRpcError {
    fn as_str(self) -> &'static str {
        match self {
            LearnRpcError::InvalidState => "invalid-state",
            LearnRpcError::ObjectNotFound => "object-not-found",
            LearnRpcError::GetLearnStateFailed => "get-learn-state-failed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "invalid-state" => Some(LearnRpcError::InvalidState),
            "object-not-found" => Some(LearnRpcError::ObjectNotFound),
            "get-learn-state-failed" => Some(LearnRpcError::GetLearnStateFailed),
            _ => None,
        }
    }
}

/// Checkpoint description returned by the application: opaque metadata
/// plus checkpoint file paths (dir-relative on the wire).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LearnState {
    pub meta: Bytes,
    pub files: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LearnRequest {
    pub gpid: Gpid,
    pub last_committed_decree_in_app: Decree,
    pub last_committed_decree_in_prepare_list: Decree,
    pub learner: NodeId,
    pub signature: u64,
    pub app_specific_request: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LearnResponse {
    pub error: Option<LearnRpcError>,
    pub config: PartitionConfig,
    pub prepare_start_decree: Option<Decree>,
    pub commit_decree: Decree,
    pub state: LearnState,
    pub base_local_dir: String,
}

/// One-way completion report sent back to the primary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LearnCompletionReport {
    pub gpid: Gpid,
    pub last_committed_decree_in_app: Decree,
    pub last_committed_decree_in_prepare_list: Decree,
    pub learner_signature: u64,
    pub status: LearningStatus,
    pub node: NodeId,
}

/// Configuration push that (re)starts a learning attempt on the learner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddLearnerRequest {
    pub config: PartitionConfig,
    pub learner_signature: u64,
}

#[derive(Debug, Error)]
pub enum ProtoEncodeError {
    #[error("cbor encode: {0}")]
    Cbor(#[from] minicbor::encode::Error<Infallible>),
}

#[derive(Debug, Error)]
pub enum ProtoDecodeError {
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("trailing bytes after message body")]
    TrailingBytes,
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

type Enc<'a> = Encoder<&'a mut Vec<u8>>;

pub fn encode_learn_request(request: &LearnRequest) -> Result<Vec<u8>, ProtoEncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(6)?;
    enc.str("gpid")?;
    encode_gpid(&mut enc, request.gpid)?;
    enc.str("app_committed")?;
    enc.i64(request.last_committed_decree_in_app)?;
    enc.str("list_committed")?;
    enc.i64(request.last_committed_decree_in_prepare_list)?;
    enc.str("learner")?;
    enc.str(&request.learner.to_string())?;
    enc.str("signature")?;
    enc.u64(request.signature)?;
    enc.str("app_request")?;
    enc.bytes(&request.app_specific_request)?;
    Ok(buf)
}

pub fn decode_learn_request(bytes: &[u8]) -> Result<LearnRequest, ProtoDecodeError> {
    let mut dec = Decoder::new(bytes);
    let len = map_len(&mut dec)?;

    let mut gpid = None;
    let mut app_committed = None;
    let mut list_committed = None;
    let mut learner = None;
    let mut signature = None;
    let mut app_request = None;

    for _ in 0..len {
        match dec.str()? {
            "gpid" => gpid = Some(decode_gpid(&mut dec)?),
            "app_committed" => app_committed = Some(dec.i64()?),
            "list_committed" => list_committed = Some(dec.i64()?),
            "learner" => learner = Some(decode_node(&mut dec, "learner")?),
            "signature" => signature = Some(dec.u64()?),
            "app_request" => app_request = Some(Bytes::copy_from_slice(dec.bytes()?)),
            _ => dec.skip()?,
        }
    }
    reject_trailing(&dec, bytes)?;

    Ok(LearnRequest {
        gpid: gpid.ok_or(ProtoDecodeError::MissingField("gpid"))?,
        last_committed_decree_in_app: app_committed
            .ok_or(ProtoDecodeError::MissingField("app_committed"))?,
        last_committed_decree_in_prepare_list: list_committed
            .ok_or(ProtoDecodeError::MissingField("list_committed"))?,
        learner: learner.ok_or(ProtoDecodeError::MissingField("learner"))?,
        signature: signature.ok_or(ProtoDecodeError::MissingField("signature"))?,
        app_specific_request: app_request
            .ok_or(ProtoDecodeError::MissingField("app_request"))?,
    })
}

pub fn encode_learn_response(response: &LearnResponse) -> Result<Vec<u8>, ProtoEncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(6)?;
    enc.str("error")?;
    match response.error {
        Some(err) => {
            enc.str(err.as_str())?;
        }
        None => {
            enc.null()?;
        }
    }
    enc.str("config")?;
    encode_config(&mut enc, &response.config)?;
    enc.str("prepare_start")?;
    match response.prepare_start_decree {
        Some(decree) => {
            enc.i64(decree)?;
        }
        None => {
            enc.null()?;
        }
    }
    enc.str("commit_decree")?;
    enc.i64(response.commit_decree)?;
    enc.str("state")?;
    encode_state(&mut enc, &response.state)?;
    enc.str("base_local_dir")?;
    enc.str(&response.base_local_dir)?;
    Ok(buf)
}

pub fn decode_learn_response(bytes: &[u8]) -> Result<LearnResponse, ProtoDecodeError> {
    let mut dec = Decoder::new(bytes);
    let len = map_len(&mut dec)?;

    let mut error = None;
    let mut config = None;
    let mut prepare_start = None;
    let mut commit_decree = None;
    let mut state = None;
    let mut base_local_dir = None;

    for _ in 0..len {
        match dec.str()? {
            "error" => {
                error = match decode_opt(&mut dec)? {
                    None => Some(None),
                    Some(()) => {
                        let raw = dec.str()?;
                        let parsed = LearnRpcError::parse(raw).ok_or_else(|| {
                            ProtoDecodeError::InvalidField {
                                field: "error",
                                reason: format!("unknown error code {raw}"),
                            }
                        })?;
                        Some(Some(parsed))
                    }
                };
            }
            "config" => config = Some(decode_config(&mut dec)?),
            "prepare_start" => {
                prepare_start = match decode_opt(&mut dec)? {
                    None => Some(None),
                    Some(()) => Some(Some(dec.i64()?)),
                };
            }
            "commit_decree" => commit_decree = Some(dec.i64()?),
            "state" => state = Some(decode_state(&mut dec)?),
            "base_local_dir" => base_local_dir = Some(dec.str()?.to_string()),
            _ => dec.skip()?,
        }
    }
    reject_trailing(&dec, bytes)?;

    Ok(LearnResponse {
        error: error.ok_or(ProtoDecodeError::MissingField("error"))?,
        config: config.ok_or(ProtoDecodeError::MissingField("config"))?,
        prepare_start_decree: prepare_start
            .ok_or(ProtoDecodeError::MissingField("prepare_start"))?,
        commit_decree: commit_decree.ok_or(ProtoDecodeError::MissingField("commit_decree"))?,
        state: state.ok_or(ProtoDecodeError::MissingField("state"))?,
        base_local_dir: base_local_dir
            .ok_or(ProtoDecodeError::MissingField("base_local_dir"))?,
    })
}

pub fn encode_completion_report(
    report: &LearnCompletionReport,
) -> Result<Vec<u8>, ProtoEncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(6)?;
    enc.str("gpid")?;
    encode_gpid(&mut enc, report.gpid)?;
    enc.str("app_committed")?;
    enc.i64(report.last_committed_decree_in_app)?;
    enc.str("list_committed")?;
    enc.i64(report.last_committed_decree_in_prepare_list)?;
    enc.str("signature")?;
    enc.u64(report.learner_signature)?;
    enc.str("status")?;
    enc.str(report.status.as_str())?;
    enc.str("node")?;
    enc.str(&report.node.to_string())?;
    Ok(buf)
}

pub fn decode_completion_report(bytes: &[u8]) -> Result<LearnCompletionReport, ProtoDecodeError> {
    let mut dec = Decoder::new(bytes);
    let len = map_len(&mut dec)?;

    let mut gpid = None;
    let mut app_committed = None;
    let mut list_committed = None;
    let mut signature = None;
    let mut status = None;
    let mut node = None;

    for _ in 0..len {
        match dec.str()? {
            "gpid" => gpid = Some(decode_gpid(&mut dec)?),
            "app_committed" => app_committed = Some(dec.i64()?),
            "list_committed" => list_committed = Some(dec.i64()?),
            "signature" => signature = Some(dec.u64()?),
            "status" => {
                let raw = dec.str()?;
                status = Some(LearningStatus::parse(raw).ok_or_else(|| {
                    ProtoDecodeError::InvalidField {
                        field: "status",
                        reason: format!("unknown status {raw}"),
                    }
                })?);
            }
            "node" => node = Some(decode_node(&mut dec, "node")?),
            _ => dec.skip()?,
        }
    }
    reject_trailing(&dec, bytes)?;

    Ok(LearnCompletionReport {
        gpid: gpid.ok_or(ProtoDecodeError::MissingField("gpid"))?,
        last_committed_decree_in_app: app_committed
            .ok_or(ProtoDecodeError::MissingField("app_committed"))?,
        last_committed_decree_in_prepare_list: list_committed
            .ok_or(ProtoDecodeError::MissingField("list_committed"))?,
        learner_signature: signature.ok_or(ProtoDecodeError::MissingField("signature"))?,
        status: status.ok_or(ProtoDecodeError::MissingField("status"))?,
        node: node.ok_or(ProtoDecodeError::MissingField("node"))?,
    })
}

pub fn encode_add_learner_request(
    request: &AddLearnerRequest,
) -> Result<Vec<u8>, ProtoEncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(2)?;
    enc.str("config")?;
    encode_config(&mut enc, &request.config)?;
    enc.str("signature")?;
    enc.u64(request.learner_signature)?;
    Ok(buf)
}

pub fn decode_add_learner_request(bytes: &[u8]) -> Result<AddLearnerRequest, ProtoDecodeError> {
    let mut dec = Decoder::new(bytes);
    let len = map_len(&mut dec)?;

    let mut config = None;
    let mut signature = None;
    for _ in 0..len {
        match dec.str()? {
            "config" => config = Some(decode_config(&mut dec)?),
            "signature" => signature = Some(dec.u64()?),
            _ => dec.skip()?,
        }
    }
    reject_trailing(&dec, bytes)?;

    Ok(AddLearnerRequest {
        config: config.ok_or(ProtoDecodeError::MissingField("config"))?,
        learner_signature: signature.ok_or(ProtoDecodeError::MissingField("signature"))?,
    })
}

fn encode_gpid(enc: &mut Enc<'_>, gpid: Gpid) -> Result<(), ProtoEncodeError> {
    enc.array(2)?;
    enc.i32(gpid.app_id)?;
    enc.i32(gpid.partition_index)?;
    Ok(())
}

fn decode_gpid(dec: &mut Decoder<'_>) -> Result<Gpid, ProtoDecodeError> {
    let len = dec.array()?.ok_or(ProtoDecodeError::IndefiniteLength)?;
    if len != 2 {
        return Err(ProtoDecodeError::InvalidField {
            field: "gpid",
            reason: format!("expected 2 elements, got {len}"),
        });
    }
    Ok(Gpid::new(dec.i32()?, dec.i32()?))
}

fn encode_config(enc: &mut Enc<'_>, config: &PartitionConfig) -> Result<(), ProtoEncodeError> {
    enc.map(4)?;
    enc.str("gpid")?;
    encode_gpid(enc, config.gpid)?;
    enc.str("ballot")?;
    enc.i64(config.ballot)?;
    enc.str("primary")?;
    match config.primary {
        Some(node) => {
            enc.str(&node.to_string())?;
        }
        None => {
            enc.null()?;
        }
    }
    enc.str("status")?;
    enc.str(config.status.as_str())?;
    Ok(())
}

fn decode_config(dec: &mut Decoder<'_>) -> Result<PartitionConfig, ProtoDecodeError> {
    let len = map_len(dec)?;
    let mut gpid = None;
    let mut ballot: Option<Ballot> = None;
    let mut primary = None;
    let mut status = None;

    for _ in 0..len {
        match dec.str()? {
            "gpid" => gpid = Some(decode_gpid(dec)?),
            "ballot" => ballot = Some(dec.i64()?),
            "primary" => {
                primary = match decode_opt(dec)? {
                    None => Some(None),
                    Some(()) => Some(Some(decode_node(dec, "primary")?)),
                };
            }
            "status" => {
                let raw = dec.str()?;
                status = Some(ReplicaStatus::parse(raw).ok_or_else(|| {
                    ProtoDecodeError::InvalidField {
                        field: "status",
                        reason: format!("unknown status {raw}"),
                    }
                })?);
            }
            _ => dec.skip()?,
        }
    }

    Ok(PartitionConfig {
        gpid: gpid.ok_or(ProtoDecodeError::MissingField("gpid"))?,
        ballot: ballot.ok_or(ProtoDecodeError::MissingField("ballot"))?,
        primary: primary.ok_or(ProtoDecodeError::MissingField("primary"))?,
        status: status.ok_or(ProtoDecodeError::MissingField("status"))?,
    })
}

fn encode_state(enc: &mut Enc<'_>, state: &LearnState) -> Result<(), ProtoEncodeError> {
    enc.map(2)?;
    enc.str("meta")?;
    enc.bytes(&state.meta)?;
    enc.str("files")?;
    enc.array(state.files.len() as u64)?;
    for file in &state.files {
        enc.str(file)?;
    }
    Ok(())
}

fn decode_state(dec: &mut Decoder<'_>) -> Result<LearnState, ProtoDecodeError> {
    let len = map_len(dec)?;
    let mut meta = None;
    let mut files = None;

    for _ in 0..len {
        match dec.str()? {
            "meta" => meta = Some(Bytes::copy_from_slice(dec.bytes()?)),
            "files" => {
                let count = dec.array()?.ok_or(ProtoDecodeError::IndefiniteLength)?;
                let mut list = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    list.push(dec.str()?.to_string());
                }
                files = Some(list);
            }
            _ => dec.skip()?,
        }
    }

    Ok(LearnState {
        meta: meta.ok_or(ProtoDecodeError::MissingField("meta"))?,
        files: files.ok_or(ProtoDecodeError::MissingField("files"))?,
    })
}

fn decode_node(dec: &mut Decoder<'_>, field: &'static str) -> Result<NodeId, ProtoDecodeError> {
    let raw = dec.str()?;
    raw.parse().map_err(|_| ProtoDecodeError::InvalidField {
        field,
        reason: format!("invalid socket address {raw}"),
    })
}

/// Peeks an optional value: `None` consumes a CBOR null, `Some(())`
/// leaves the actual value for the caller to decode.
fn decode_opt(dec: &mut Decoder<'_>) -> Result<Option<()>, ProtoDecodeError> {
    if dec.datatype()? == minicbor::data::Type::Null {
        dec.null()?;
        Ok(None)
    } else {
        Ok(Some(()))
    }
}

fn map_len(dec: &mut Decoder<'_>) -> Result<u64, ProtoDecodeError> {
    dec.map()?.ok_or(ProtoDecodeError::IndefiniteLength)
}

fn reject_trailing(dec: &Decoder<'_>, bytes: &[u8]) -> Result<(), ProtoDecodeError> {
    if dec.position() != bytes.len() {
        return Err(ProtoDecodeError::TrailingBytes);
    }
    Ok(())
}
