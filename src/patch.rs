use crate::error::{Json, Result};
use crate::ips::{Record, Records, Terminator};
use hex_buffer_serde::{Hex as _, HexForm};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

/// Owned view of a parsed patch, suitable for dumping as JSON.
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct Patch {
    pub records: Vec<PatchRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_size: Option<u32>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PatchRecord {
    Literal {
        offset: u32,
        #[serde(with = "HexForm::<Vec<u8>>")]
        data: Vec<u8>,
    },
    Rle {
        offset: u32,
        count: u16,
        value: u8,
    },
}

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug, Default)]
pub struct Summary {
    pub literal_records: usize,
    pub rle_records: usize,
    pub bytes_written: usize,
    /// Highest offset + length touched by any record.
    pub extent: usize,
}

#[derive(Serialize)]
struct Report<'a> {
    summary: Summary,
    #[serde(flatten)]
    patch: &'a Patch,
}

impl<'a> From<Record<'a>> for PatchRecord {
    fn from(record: Record<'a>) -> Self {
        match record {
            Record::Literal { offset, data } => PatchRecord::Literal {
                offset,
                data: data.to_vec(),
            },
            Record::Rle {
                offset,
                count,
                value,
            } => PatchRecord::Rle {
                offset,
                count,
                value,
            },
        }
    }
}

impl PatchRecord {
    fn end(&self) -> usize {
        match self {
            PatchRecord::Literal { offset, data } => *offset as usize + data.len(),
            PatchRecord::Rle { offset, count, .. } => *offset as usize + usize::from(*count),
        }
    }
}

impl Patch {
    pub fn parse(bytes: &[u8], terminator: Terminator) -> Result<Self> {
        let mut records = Records::new(bytes, terminator)?;
        let mut patch = Patch::default();
        for record in records.by_ref() {
            patch.records.push(record?.into());
        }
        patch.final_size = records.final_size();
        Ok(patch)
    }

    /// Pretty-printed JSON of the summary followed by the records.
    pub fn to_json(&self) -> Result<String> {
        let report = Report {
            summary: self.summary(),
            patch: self,
        };
        serde_json::to_string_pretty(&report).context(Json)
    }

    pub fn summary(&self) -> Summary {
        self.records
            .iter()
            .fold(Summary::default(), |mut summary, record| {
                match record {
                    PatchRecord::Literal { data, .. } => {
                        summary.literal_records += 1;
                        summary.bytes_written += data.len();
                    }
                    PatchRecord::Rle { count, .. } => {
                        summary.rle_records += 1;
                        summary.bytes_written += usize::from(*count);
                    }
                }
                summary.extent = summary.extent.max(record.end());
                summary
            })
    }
}
