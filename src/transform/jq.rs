use std::io::{self, Write};

use super::{LineBuffer, LineMap};
use crate::error::RunError;
use crate::query::{Program, QueryError};

/// Transform stage that treats every line as a JSON document and replaces it
/// with the query results.
#[derive(Debug, Clone)]
pub struct MapJq {
    program: Program,
}

impl MapJq {
    pub fn new(query: &str) -> Result<Self, QueryError> {
        Ok(Self {
            program: Program::compile(query)?,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
}

impl LineMap for MapJq {
    fn map_line(&self, line: &[u8], dst: &mut LineBuffer) -> io::Result<usize> {
        let out = self
            .program
            .run_bytes(line)
            .map_err(|e| RunError::Query(e).into_io())?;
        dst.write(&out)
    }
}
