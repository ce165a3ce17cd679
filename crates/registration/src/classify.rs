//! Result code classification for course API responses
//!
//! The course API reports one result code per submitted CRN. The known codes
//! form a fixed table; anything outside it is `Unknown` and handled like a
//! permanent failure so a new server code can never cause an endless retry.

/// Outcome class of a single result code.
///
/// `QuotaFull` refines `RetryableTransient`: a full course is retried like any
/// transient rejection unless a backup CRN can take its place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Success,
    RetryableTransient,
    QuotaFull,
    PermanentFailure,
    Unknown,
}

impl ResultClass {
    /// Whether the item should stay in its working list.
    pub fn is_retryable(self) -> bool {
        matches!(self, ResultClass::RetryableTransient | ResultClass::QuotaFull)
    }

    /// Whether the item can no longer succeed under its current identifier.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, ResultClass::PermanentFailure | ResultClass::Unknown)
    }

    /// Label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            ResultClass::Success => "success",
            ResultClass::RetryableTransient => "retryable",
            ResultClass::QuotaFull => "quota_full",
            ResultClass::PermanentFailure => "permanent",
            ResultClass::Unknown => "unknown",
        }
    }
}

struct KnownCode {
    code: &'static str,
    class: ResultClass,
    message: &'static str,
}

const fn known(code: &'static str, class: ResultClass, message: &'static str) -> KnownCode {
    KnownCode {
        code,
        class,
        message,
    }
}

use ResultClass::{PermanentFailure, QuotaFull, RetryableTransient, Success};

/// Result codes the course API is known to return.
const KNOWN_CODES: &[KnownCode] = &[
    known("successResult", Success, "operation completed successfully"),
    known("Ekleme İşlemi Başarılı", Success, "course added successfully"),
    known("Silme İşlemi Başarılı", Success, "course dropped successfully"),
    known("VAL01", RetryableTransient, "could not be taken because of a problem"),
    known("VAL02", RetryableTransient, "blocked by the registration time window"),
    known("VAL06", QuotaFull, "course capacity is insufficient"),
    known("VAL13", RetryableTransient, "temporarily blocked"),
    known("VAL14", RetryableTransient, "system is temporarily not responding"),
    known("VAL16", RetryableTransient, "another operation is still in progress"),
    known("VAL21", RetryableTransient, "an error occurred while processing"),
    known("ERRLoad", RetryableTransient, "system is temporarily not responding"),
    known(
        "NULLParam-CheckOgrenciKayitZamaniKontrolu",
        RetryableTransient,
        "blocked by the registration time window",
    ),
    known("Kontenjan Dolu", QuotaFull, "course capacity is full"),
    known("errorResult", PermanentFailure, "operation could not be completed"),
    known("error", PermanentFailure, "an error occurred"),
    known("VAL03", PermanentFailure, "already taken this term"),
    known("VAL04", PermanentFailure, "not part of the curriculum"),
    known("VAL05", PermanentFailure, "exceeds the maximum credit limit for the term"),
    known("VAL07", PermanentFailure, "previously passed with an AA grade"),
    known("VAL08", PermanentFailure, "program requirement not satisfied"),
    known("VAL09", PermanentFailure, "conflicts with another course"),
    known("VAL10", PermanentFailure, "not registered to this course, nothing was done"),
    known("VAL11", PermanentFailure, "prerequisites not satisfied"),
    known("VAL12", PermanentFailure, "not offered this term"),
    known("VAL15", PermanentFailure, "at most 12 CRNs can be taken"),
    known("VAL18", PermanentFailure, "blocked"),
    known("VAL19", PermanentFailure, "associate degree course"),
    known("VAL20", PermanentFailure, "only one course can be dropped per term"),
    known("CRNListEmpty", PermanentFailure, "CRN list appears empty"),
    known("CRNNotFound", PermanentFailure, "CRN not found"),
];

fn lookup(code: &str) -> Option<&'static KnownCode> {
    KNOWN_CODES.iter().find(|known| known.code == code)
}

/// Classify a result code. Codes outside the known table are `Unknown`.
pub fn classify(code: &str) -> ResultClass {
    lookup(code).map_or(ResultClass::Unknown, |known| known.class)
}

/// Human-readable log line for `item` receiving `code`.
///
/// Unknown codes keep the raw code in the message so it can be added to the
/// table later.
pub fn describe(code: &str, item: &str) -> String {
    match lookup(code) {
        Some(known) => format!("CRN {item}: {}", known.message),
        None => format!("CRN {item}: unknown result code '{code}'"),
    }
}
