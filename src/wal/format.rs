use serde::{Deserialize, Serialize};

use crate::core::{DatabaseError, DbResult};
use crate::parser::ColumnDef;

pub const WAL_MAGIC: [u8; 4] = *b"VRQL";
pub const WAL_VERSION: u32 = 1;
pub const WAL_PAGE_SIZE: u32 = 4096;
pub const HEADER_LEN: usize = 36;

/// Fixed 36-byte prefix of every WAL file.
pub struct WalFileHeader {
    pub sequence: u64,
}

impl WalFileHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&WAL_MAGIC);
        buf[4..8].copy_from_slice(&WAL_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&WAL_PAGE_SIZE.to_le_bytes());
        buf[12..20].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(DatabaseError::WalCorrupt("file shorter than header".to_string()));
        }
        if bytes[0..4] != WAL_MAGIC {
            return Err(DatabaseError::WalCorrupt("bad magic".to_string()));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != WAL_VERSION {
            return Err(DatabaseError::WalCorrupt(format!("unsupported WAL version {version}")));
        }
        let sequence = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
        Ok(Self { sequence })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginTx,
    CommitTx,
    RollbackTx,
    InsertRow,
    DeleteRow,
    UpdateRow,
    CreateTable,
    DropTable,
    CreateIndex,
    DropIndex,
    AlterTableAddColumn,
    AlterTableDropColumn,
    AlterTableRenameColumn,
    AlterTableRenameTable,
    Checkpoint,
}

impl RecordType {
    fn to_tag(self) -> u8 {
        match self {
            RecordType::BeginTx => 0,
            RecordType::CommitTx => 1,
            RecordType::RollbackTx => 2,
            RecordType::InsertRow => 3,
            RecordType::DeleteRow => 4,
            RecordType::UpdateRow => 5,
            RecordType::CreateTable => 6,
            RecordType::DropTable => 7,
            RecordType::CreateIndex => 8,
            RecordType::DropIndex => 9,
            RecordType::AlterTableAddColumn => 10,
            RecordType::AlterTableDropColumn => 11,
            RecordType::AlterTableRenameColumn => 12,
            RecordType::Checkpoint => 13,
            RecordType::AlterTableRenameTable => 14,
        }
    }

    fn from_tag(tag: u8) -> DbResult<Self> {
        Ok(match tag {
            0 => RecordType::BeginTx,
            1 => RecordType::CommitTx,
            2 => RecordType::RollbackTx,
            3 => RecordType::InsertRow,
            4 => RecordType::DeleteRow,
            5 => RecordType::UpdateRow,
            6 => RecordType::CreateTable,
            7 => RecordType::DropTable,
            8 => RecordType::CreateIndex,
            9 => RecordType::DropIndex,
            10 => RecordType::AlterTableAddColumn,
            11 => RecordType::AlterTableDropColumn,
            12 => RecordType::AlterTableRenameColumn,
            13 => RecordType::Checkpoint,
            14 => RecordType::AlterTableRenameTable,
            other => return Err(DatabaseError::WalCorrupt(format!("unknown record type {other}"))),
        })
    }
}

/// DDL-specific payloads, bincode-framed inside a record's `data` field.
/// only requires DDL be "serialized command" — it does not
/// mandate a byte layout the way row records do, so this reuses the
/// crate's existing `bincode` dependency rather than hand-rolling another
/// ad hoc binary format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DdlPayload {
    CreateTable { columns: Vec<ColumnDef> },
    DropTable,
    CreateIndex { index_name: String, column: String },
    DropIndex { index_name: String },
    AlterAddColumn { column: ColumnDef },
    AlterDropColumn { column: String },
    AlterRenameColumn { old_name: String, new_name: String },
    AlterRenameTable { new_name: String },
}

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub record_type: RecordType,
    pub tx_id: u64,
    pub lsn: u64,
    pub table_name: String,
    pub row_id: u64,
    pub data: Vec<u8>,
}

impl WalRecord {
    /// `[type u8][tx_id u64][lsn u64][table_name_len u32][table_name][row_id
    /// u64][data_len u64][data][crc32 u32]`, CRC over every preceding byte
    ///.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.table_name.len() + self.data.len());
        buf.push(self.record_type.to_tag());
        buf.extend_from_slice(&self.tx_id.to_le_bytes());
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&(self.table_name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.table_name.as_bytes());
        buf.extend_from_slice(&self.row_id.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.data);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes one record starting at `bytes[0]`, returning it plus the
    /// number of bytes consumed. A bad CRC or truncated field is reported
    /// as `WalCorrupt`; callers treat that as end-of-log.
    pub fn decode(bytes: &[u8]) -> DbResult<(Self, usize)> {
        let mut pos = 0usize;
        let need = |pos: usize, n: usize| -> DbResult<()> {
            if bytes.len() < pos + n {
                Err(DatabaseError::WalCorrupt("truncated record".to_string()))
            } else {
                Ok(())
            }
        };

        need(pos, 1)?;
        let record_type = RecordType::from_tag(bytes[pos])?;
        pos += 1;

        need(pos, 8)?;
        let tx_id = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
        pos += 8;

        need(pos, 8)?;
        let lsn = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
        pos += 8;

        need(pos, 4)?;
        let name_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        need(pos, name_len)?;
        let table_name = String::from_utf8(bytes[pos..pos + name_len].to_vec())
            .map_err(|e| DatabaseError::WalCorrupt(e.to_string()))?;
        pos += name_len;

        need(pos, 8)?;
        let row_id = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
        pos += 8;

        need(pos, 8)?;
        let data_len = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()) as usize;
        pos += 8;
        need(pos, data_len)?;
        let data = bytes[pos..pos + data_len].to_vec();
        pos += data_len;

        need(pos, 4)?;
        let expected_crc = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        let actual_crc = crc32fast::hash(&bytes[..pos]);
        if expected_crc != actual_crc {
            return Err(DatabaseError::WalCorrupt("CRC mismatch".to_string()));
        }
        pos += 4;

        Ok((
            WalRecord {
                record_type,
                tx_id,
                lsn,
                table_name,
                row_id,
                data,
            },
            pos,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrips() {
        let rec = WalRecord {
            record_type: RecordType::InsertRow,
            tx_id: 7,
            lsn: 42,
            table_name: "users".to_string(),
            row_id: 3,
            data: vec![1, 2, 3, 4],
        };
        let bytes = rec.encode();
        let (decoded, consumed) = WalRecord::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.tx_id, 7);
        assert_eq!(decoded.row_id, 3);
        assert_eq!(decoded.table_name, "users");
        assert_eq!(decoded.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn corrupted_crc_is_detected() {
        let rec = WalRecord {
            record_type: RecordType::Checkpoint,
            tx_id: 0,
            lsn: 1,
            table_name: String::new(),
            row_id: 0,
            data: vec![],
        };
        let mut bytes = rec.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(WalRecord::decode(&bytes).is_err());
    }

    #[test]
    fn header_roundtrips() {
        let header = WalFileHeader { sequence: 99 };
        let bytes = header.encode();
        let decoded = WalFileHeader::decode(&bytes).unwrap();
        assert_eq!(decoded.sequence, 99);
    }
}
