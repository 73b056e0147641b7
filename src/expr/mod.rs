//! Sandboxed evaluation of user-supplied expressions
//!
//! Expressions run in a restricted interpreter that exposes only metric
//! reads, arithmetic, and a fixed aggregate function set, under a
//! wall-clock deadline checked on every node visit. There is no ambient
//! filesystem, network, or process capability for an expression to reach.

pub mod eval;
pub mod parser;

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;

use crate::model::TimeSeries;

pub use eval::{EvalError, Verdict};
pub use parser::{Expr, ParseError};

/// Expression sandbox with a compiled-program cache
///
/// Parsing is cheap but jobs re-evaluate the same source on every cycle,
/// so parsed trees are cached keyed by source text.
pub struct Sandbox {
    programs: Cache<String, Arc<Expr>>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_programs: u64) -> Self {
        Self {
            programs: Cache::builder()
                .max_capacity(max_programs)
                .time_to_live(Duration::from_secs(3600))
                .build(),
        }
    }

    /// Compile (or fetch from cache) and run an expression against the
    /// fetched series, failing once `deadline` passes.
    pub fn evaluate(
        &self,
        source: &str,
        series: &TimeSeries,
        deadline: Instant,
    ) -> Result<Verdict, EvalError> {
        let program = self.compile(source)?;
        eval::evaluate(&program, series, deadline)
    }

    fn compile(&self, source: &str) -> Result<Arc<Expr>, EvalError> {
        if let Some(program) = self.programs.get(source) {
            return Ok(program);
        }

        let program = Arc::new(parser::parse_expression(source)?);
        self.programs.insert(source.to_string(), Arc::clone(&program));
        Ok(program)
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}
