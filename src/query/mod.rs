//! jq queries over command output
//!
//! Queries are compiled and evaluated by `jaq`, with the jq standard library
//! and JSON builtins available, so filters such as `.[] | select(.ok)`,
//! `{name, size: (.items | length)}` or `.a, .b` work as they do in jq.

use std::fmt;
use std::sync::Arc;

use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, Filter, Native, RcIter};
use jaq_json::Val;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("jq: parse error in {query:?}: {message}")]
    Parse { query: String, message: String },

    #[error("jq: {message}")]
    Eval { message: String },

    #[error("json: {message}: {content}")]
    Json { message: String, content: String },
}

/// A compiled query, ready to be run against any number of JSON values
#[derive(Clone)]
pub struct Program {
    query: String,
    filter: Arc<Filter<Native<Val>>>,
}

impl Program {
    /// Parse and compile a query
    pub fn compile(query: &str) -> Result<Self, QueryError> {
        let arena = Arena::default();
        let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
        let modules = loader
            .load(&arena, File { code: query, path: () })
            .map_err(|errs| parse_error(query, "invalid syntax", &errs))?;

        let filter = Compiler::default()
            .with_funs(jaq_std::funs().chain(jaq_json::funs()))
            .compile(modules)
            .map_err(|errs| parse_error(query, "undefined names", &errs))?;

        debug!("Compiled jq query {:?}", query);
        Ok(Self {
            query: query.to_string(),
            filter: Arc::new(filter),
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Run the program against a value, producing every result in order.
    /// The first runtime error stops evaluation.
    pub fn run(&self, input: &Value) -> Result<Vec<Value>, QueryError> {
        let inputs = RcIter::new(core::iter::empty());
        let ctx = Ctx::new([], &inputs);

        self.filter
            .run((ctx, Val::from(input.clone())))
            .map(|result| {
                result.map(Value::from).map_err(|e| QueryError::Eval {
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// Decode `content` as a single JSON document, run the program and return
    /// the compact JSON encoding of each result, separated by newlines. Empty
    /// content produces empty output.
    pub fn run_bytes(&self, content: &[u8]) -> Result<Vec<u8>, QueryError> {
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let input: Value = serde_json::from_slice(content).map_err(|e| QueryError::Json {
            message: e.to_string(),
            content: String::from_utf8_lossy(content).to_string(),
        })?;

        let mut output = Vec::new();
        for (i, result) in self.run(&input)?.iter().enumerate() {
            if i > 0 {
                output.push(b'\n');
            }
            // Serializing a Value into a Vec cannot fail
            let encoded = serde_json::to_vec(result).map_err(|e| QueryError::Eval {
                message: e.to_string(),
            })?;
            output.extend_from_slice(&encoded);
        }
        Ok(output)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

fn parse_error(query: &str, kind: &str, details: &impl fmt::Debug) -> QueryError {
    debug!("Rejected jq query {:?}: {:?}", query, details);
    QueryError::Parse {
        query: query.to_string(),
        message: format!("{kind}: {details:?}"),
    }
}
