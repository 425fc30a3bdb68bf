//! Query façades: one per entry-point family, each composing the negotiator
//! and a decoder into buffer-independent domain records.

pub mod directory;
pub mod folders;
pub mod services;
pub mod sessions;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::QueryError;

/// Name used for the local machine in reports.
pub const LOCAL_TARGET: &str = "local";

/// Serializable form of a [`QueryError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub native_code: Option<u32>,
    pub message: String,
}

impl From<&QueryError> for ErrorReport {
    fn from(err: &QueryError) -> Self {
        Self {
            code: err.code().as_str(),
            native_code: err.native_code(),
            message: err.to_string(),
        }
    }
}

/// A sub-query that failed while the rest of a record was still filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub query: String,
    pub error: ErrorReport,
}

impl Diagnostic {
    pub fn new(query: impl Into<String>, err: &QueryError) -> Self {
        Self {
            query: query.into(),
            error: ErrorReport::from(err),
        }
    }
}

/// Outcome of one query against one target.
#[derive(Debug)]
pub struct TargetReport<T> {
    pub target: String,
    pub outcome: Result<T, QueryError>,
}

impl<T> TargetReport<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl<T: Serialize> Serialize for TargetReport<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("TargetReport", 2)?;
        s.serialize_field("target", &self.target)?;
        match &self.outcome {
            Ok(value) => s.serialize_field("ok", value)?,
            Err(err) => s.serialize_field("error", &ErrorReport::from(err))?,
        }
        s.end()
    }
}

/// Runs `run` once per target, in order. A failing target is reported and
/// the rest still run. No targets means the local machine.
pub fn for_each_target<T, F>(targets: &[String], mut run: F) -> Vec<TargetReport<T>>
where
    F: FnMut(Option<&str>) -> Result<T, QueryError>,
{
    let hosts: Vec<Option<&str>> = if targets.is_empty() {
        vec![None]
    } else {
        targets.iter().map(|t| Some(t.as_str())).collect()
    };

    hosts
        .into_iter()
        .map(|host| {
            let target = host.unwrap_or(LOCAL_TARGET).to_string();
            let outcome = run(host);
            if let Err(err) = &outcome {
                tracing::warn!(
                    host = %target,
                    code = %err.code(),
                    native_code = ?err.native_code(),
                    error = %err,
                    "query failed for target"
                );
            }
            TargetReport { target, outcome }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{LOCAL_TARGET, for_each_target};
    use crate::error::QueryError;

    #[test]
    fn failures_are_isolated_per_target() {
        let targets = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let reports = for_each_target(&targets, |host| match host {
            Some("b") => Err(QueryError::Failure {
                call: "NetSessionEnum",
                code: 53,
            }),
            Some(h) => Ok(h.len()),
            None => Ok(0),
        });
        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_ok());
        assert!(!reports[1].is_ok());
        assert!(reports[2].is_ok());
        assert_eq!(reports[1].target, "b");
    }

    #[test]
    fn no_targets_means_local() {
        let reports = for_each_target(&[], |host| Ok::<_, QueryError>(host.is_none()));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].target, LOCAL_TARGET);
        assert!(matches!(reports[0].outcome, Ok(true)));
    }
}
