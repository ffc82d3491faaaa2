use crate::config::EraDef;
use crate::error::SchemaError;
use crate::period::ReportingPeriod;

/// Ordered report-format eras. A period belongs to the last era that starts
/// on or before it; periods before the first era fall into the first one.
#[derive(Debug, Clone)]
pub struct Eras {
    ids: Vec<String>,
    starts: Vec<ReportingPeriod>,
}

impl Eras {
    pub fn build(defs: &[EraDef]) -> Result<Self, SchemaError> {
        if defs.is_empty() {
            return Err(SchemaError::NoEras);
        }
        for pair in defs.windows(2) {
            if pair[1].starts <= pair[0].starts {
                return Err(SchemaError::EraOrder(pair[1].id.clone()));
            }
        }
        Ok(Self {
            ids: defs.iter().map(|d| d.id.clone()).collect(),
            starts: defs.iter().map(|d| d.starts).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, period: ReportingPeriod) -> usize {
        self.starts
            .iter()
            .rposition(|start| *start <= period)
            .unwrap_or(0)
    }

    pub fn id_of(&self, period: ReportingPeriod) -> &str {
        &self.ids[self.index_of(period)]
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    pub fn find(&self, id: &str) -> Result<usize, SchemaError> {
        self.ids
            .iter()
            .position(|e| e == id)
            .ok_or_else(|| SchemaError::UnknownEra(id.to_string()))
    }

    /// Era indices named by `ids`, or every era when `None`.
    pub fn select(&self, ids: Option<&[String]>) -> Result<Vec<usize>, SchemaError> {
        match ids {
            None => Ok((0..self.len()).collect()),
            Some(ids) => ids.iter().map(|id| self.find(id)).collect(),
        }
    }
}
