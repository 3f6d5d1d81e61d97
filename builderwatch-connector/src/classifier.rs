//! # Event Classifier
//!
//! Decides whether a transaction's logs describe a tracked event. All detection
//! rules live in [`PATTERNS`]; changing what the feed reports means editing that
//! table and nothing else.

use crate::events::{Event, EventKind, EventSource, RawLogRecord, WatchKind};
use chrono::{DateTime, Utc};

/// One detection rule: any of `needles` found in the logs of a transaction on a
/// `target` address yields an event of `kind`.
#[derive(Debug, Clone, Copy)]
pub struct PatternRule {
    pub target: WatchKind,
    pub needles: &'static [&'static str],
    pub kind: EventKind,
    pub summary: &'static str,
}

/// Detection rules, checked in order. The first matching rule wins.
///
/// "Program upgraded" precedes the generic deploy marker, so a record that
/// contains both is reported as an upgrade.
pub const PATTERNS: &[PatternRule] = &[
    PatternRule {
        target: WatchKind::Deploy,
        needles: &["Program upgraded"],
        kind: EventKind::ProgramUpgrade,
        summary: "Program Upgraded",
    },
    PatternRule {
        target: WatchKind::Deploy,
        needles: &["DeployWithMaxDataLen"],
        kind: EventKind::NewDeploy,
        summary: "New Program Deployed",
    },
    PatternRule {
        target: WatchKind::Multisig,
        needles: &["Instruction: MultisigCreate", "Instruction: CreateMultisig"],
        kind: EventKind::NewMultisig,
        summary: "New Multisig Created",
    },
];

impl PatternRule {
    fn matches(&self, kind: WatchKind, logs: &[String]) -> bool {
        self.target == kind
            && logs
                .iter()
                .any(|line| self.needles.iter().any(|needle| line.contains(needle)))
    }
}

/// Returns the first rule matching `logs` for a target of `kind`.
pub fn find_rule(kind: WatchKind, logs: &[String]) -> Option<&'static PatternRule> {
    PATTERNS.iter().find(|rule| rule.matches(kind, logs))
}

/// Classifies `record`, stamping live records with the current time.
pub fn classify(kind: WatchKind, record: &RawLogRecord) -> Option<Event> {
    classify_at(kind, record, Utc::now())
}

/// Classifies `record`, using `now` when the record carries no block time.
///
/// Failed transactions never yield events.
pub fn classify_at(kind: WatchKind, record: &RawLogRecord, now: DateTime<Utc>) -> Option<Event> {
    if record.failed {
        return None;
    }
    let rule = find_rule(kind, &record.logs)?;

    let timestamp = record
        .block_time
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or(now);

    Some(Event {
        signature: record.signature.clone(),
        kind: rule.kind,
        timestamp,
        summary: rule.summary.to_string(),
        detail: detail_for(record.source).to_string(),
        source: record.source,
    })
}

fn detail_for(source: EventSource) -> &'static str {
    match source {
        EventSource::Historical => "Found in history scan.",
        EventSource::Live => "Detected on live stream.",
    }
}
