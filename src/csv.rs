use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::ParseAmountError;
use crate::model::{Level, Position, Rank};
use crate::store::TreeStore;
use crate::{Amount, BonusId, Command, Engine, MemberId};

/// Errors that can occur when reading csv commands
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open csv file: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: {kind} missing target")]
    MissingTarget { line: usize, kind: String },

    #[error("line {line}: {kind} missing amount")]
    MissingAmount { line: usize, kind: String },

    #[error("line {line}: {source}")]
    Amount {
        line: usize,
        source: ParseAmountError,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    member: MemberId,
    target: Option<MemberId>,
    amount: Option<String>,
}

/// One line of the final member report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRow {
    pub member: MemberId,
    pub status: &'static str,
    pub rank: Rank,
    pub balance: String,
    pub total_earned: String,
    pub parent: Option<MemberId>,
    pub level: Option<Level>,
    pub position: Option<Position>,
}

impl InputRow {
    fn into_command(self, line: usize) -> Result<Command, CsvError> {
        let kind = self.r#type;
        match kind.as_str() {
            "seed" => Ok(Command::Seed {
                member: self.member,
            }),
            "join" => {
                let inviter = self
                    .target
                    .ok_or_else(|| CsvError::MissingTarget { line, kind: kind.clone() })?;
                let raw = self
                    .amount
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| CsvError::MissingAmount { line, kind: kind.clone() })?;
                let payment: Amount = raw
                    .parse()
                    .map_err(|source| CsvError::Amount { line, source })?;
                Ok(Command::Join {
                    member: self.member,
                    inviter,
                    payment,
                })
            }
            // an empty target turns the member into a root
            "move" => Ok(Command::Relocate {
                member: self.member,
                parent: self.target,
            }),
            "promote" => Ok(Command::Promote {
                member: self.member,
            }),
            // the member column carries the bonus id
            "reverse" => Ok(Command::Reverse {
                bonus: BonusId::from(self.member),
            }),
            other => Err(CsvError::UnrecognizedType {
                line,
                kind: other.to_string(),
            }),
        }
    }
}

/// Read commands from a csv file
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_command(line)
        }))
}

/// Report rows for every member, ordered by member id
pub fn member_rows<S: TreeStore>(engine: &Engine<S>) -> Vec<MemberRow> {
    let mut rows: Vec<MemberRow> = engine
        .members()
        .map(|m| {
            let node = engine.node(m.id);
            MemberRow {
                member: m.id,
                status: m.status.as_str(),
                rank: m.rank,
                balance: m.balance.to_string(),
                total_earned: m.total_earned.to_string(),
                parent: node.and_then(|n| n.parent_id),
                level: node.map(|n| n.level),
                position: node.map(|n| n.position),
            }
        })
        .collect();
    rows.sort_by_key(|r| r.member);
    rows
}

/// Write member rows in csv format
pub fn write_members_to<W: io::Write>(
    writer: W,
    rows: impl IntoIterator<Item = MemberRow>,
) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// write member rows to stdout in csv format
pub fn write_members(rows: impl IntoIterator<Item = MemberRow>) -> csv::Result<()> {
    let stdout = io::stdout();
    write_members_to(stdout.lock(), rows)
}
