//! Course API request and response bodies
//!
//! Request: `{"ECRN": [...], "SCRN": [...]}` (CRNs to add, CRNs to drop).
//! Response: `{"ecrnResultList": [{"crn", "resultCode"}], "scrnResultList": [...]}`.
//! Both result lists are required; a body missing either one is malformed.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::worklist::{WorkingList, WorkingLists};

/// Body of a course selection request.
#[derive(Debug, Serialize)]
pub struct CourseRequest<'a> {
    #[serde(rename = "ECRN")]
    pub add: &'a WorkingList,
    #[serde(rename = "SCRN")]
    pub drop: &'a WorkingList,
}

impl<'a> From<&'a WorkingLists> for CourseRequest<'a> {
    fn from(lists: &'a WorkingLists) -> Self {
        Self {
            add: &lists.add,
            drop: &lists.drop,
        }
    }
}

/// Parsed course selection response.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseResponse {
    #[serde(rename = "ecrnResultList")]
    pub add_results: Vec<ResultEntry>,
    #[serde(rename = "scrnResultList")]
    pub drop_results: Vec<ResultEntry>,
}

/// Outcome for one CRN in one role list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResultEntry {
    #[serde(rename = "crn", deserialize_with = "crn_string")]
    pub item: String,
    /// `None` when the server sent `null` or omitted the field.
    #[serde(rename = "resultCode", default)]
    pub code: Option<String>,
}

impl ResultEntry {
    pub fn new(item: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            code: Some(code.into()),
        }
    }

    /// Result code, with a missing code read as the empty string.
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }
}

/// CRNs come back as strings, but accept bare numbers too.
fn crn_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected CRN as string or number, got {other}"
        ))),
    }
}

/// Parse a course selection response body.
pub fn parse_response(body: &str) -> Result<CourseResponse> {
    serde_json::from_str(body).map_err(|e| Error::MalformedResponse(e.to_string()))
}
