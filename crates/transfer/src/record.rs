//! One line of the export format: `{"type": <kind>, "data": <row>}`.

use std::fmt;

use core_model::{Card, ChatMessage, ChatThread, Evidence, Run};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Record {
    Run(Run),
    Card(Card),
    Evidence(Evidence),
    Thread(ChatThread),
    Message(ChatMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Run,
    Card,
    Evidence,
    Thread,
    Message,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Run => "run",
            RecordKind::Card => "card",
            RecordKind::Evidence => "evidence",
            RecordKind::Thread => "thread",
            RecordKind::Message => "message",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Run(_) => RecordKind::Run,
            Record::Card(_) => RecordKind::Card,
            Record::Evidence(_) => RecordKind::Evidence,
            Record::Thread(_) => RecordKind::Thread,
            Record::Message(_) => RecordKind::Message,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Record::Run(r) => r.id,
            Record::Card(c) => c.id,
            Record::Evidence(e) => e.id,
            Record::Thread(t) => t.id,
            Record::Message(m) => m.id,
        }
    }

    /// Appends the compact JSON form plus a trailing newline to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> serde_json::Result<()> {
        serde_json::to_writer(&mut *buf, self)?;
        buf.push(b'\n');
        Ok(())
    }
}

/// Per-kind tally of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub runs: u64,
    pub cards: u64,
    pub evidence: u64,
    pub threads: u64,
    pub messages: u64,
}

impl RecordCounts {
    pub fn bump(&mut self, kind: RecordKind) {
        match kind {
            RecordKind::Run => self.runs += 1,
            RecordKind::Card => self.cards += 1,
            RecordKind::Evidence => self.evidence += 1,
            RecordKind::Thread => self.threads += 1,
            RecordKind::Message => self.messages += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.runs + self.cards + self.evidence + self.threads + self.messages
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Record(Record),
    /// Well-formed line whose `type` this build does not know.
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

/// Decodes one framed line (without its newline). Unknown kinds are reported
/// rather than rejected so newer exports stay importable.
pub fn decode_line(line: &[u8]) -> serde_json::Result<Decoded> {
    let envelope: Envelope = serde_json::from_slice(line)?;
    let record = match envelope.kind.as_str() {
        "run" => Record::Run(serde_json::from_value(envelope.data)?),
        "card" => Record::Card(serde_json::from_value(envelope.data)?),
        "evidence" => Record::Evidence(serde_json::from_value(envelope.data)?),
        "thread" => Record::Thread(serde_json::from_value(envelope.data)?),
        "message" => Record::Message(serde_json::from_value(envelope.data)?),
        _ => return Ok(Decoded::Unknown(envelope.kind)),
    };
    Ok(Decoded::Record(record))
}
