//! Retry/substitution engine
//!
//! Applies one course API response to the working lists. Each result entry is
//! classified and the CRN is kept, removed, or swapped according to its class
//! and the substitution ledger. The engine owns no I/O and never fails: a
//! malformed response leaves the lists untouched so the caller simply retries.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::classify::{ResultClass, classify, describe};
use crate::ledger::SubstitutionLedger;
use crate::wire::{ResultEntry, parse_response};
use crate::worklist::{Role, WorkingList, WorkingLists};

/// What happened to one CRN after processing its result.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Completed,
    Retrying,
    Substituted { backup: String },
    Reverted { primary: String },
    Abandoned,
}

/// Stateful engine holding the substitution ledger across attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryEngine {
    ledger: SubstitutionLedger,
}

impl RetryEngine {
    /// Create an engine from `primary → backup` declarations for add-role CRNs.
    pub fn new(backups: HashMap<String, String>) -> Self {
        Self {
            ledger: SubstitutionLedger::new(backups),
        }
    }

    pub fn ledger(&self) -> &SubstitutionLedger {
        &self.ledger
    }

    /// Parse a raw response body and update both working lists.
    ///
    /// Unparseable bodies or bodies missing a result list are logged and the
    /// lists are returned unchanged.
    pub fn apply_response(&mut self, body: &str, lists: WorkingLists) -> WorkingLists {
        let response = match parse_response(body) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, body, "could not process course response, lists unchanged");
                metrics::counter!("registration_malformed_responses_total").increment(1);
                return lists;
            }
        };

        let WorkingLists { add, drop } = lists;
        let add = self.process(&response.add_results, add, Role::Add);
        let drop = self.process(&response.drop_results, drop, Role::Drop);
        WorkingLists { add, drop }
    }

    /// Apply the result entries for one role to its working list.
    ///
    /// Only CRNs present in `list` when the call starts are considered; entries
    /// for anything else are ignored.
    pub fn process(
        &mut self,
        entries: &[ResultEntry],
        mut list: WorkingList,
        role: Role,
    ) -> WorkingList {
        let submitted: HashSet<String> = list.iter().map(str::to_owned).collect();

        for entry in entries {
            let item = entry.item.as_str();
            if !submitted.contains(item) || !list.contains(item) {
                debug!(item, role = role.label(), "result for CRN not in working list, ignoring");
                continue;
            }

            let code = entry.code();
            let class = classify(code);
            let message = describe(code, item);
            if class.is_terminal_failure() {
                warn!(item, code, role = role.label(), "{message}");
            } else {
                info!(item, code, role = role.label(), "{message}");
            }
            metrics::counter!(
                "registration_item_outcomes_total",
                "role" => role.label(),
                "outcome" => class.label()
            )
            .increment(1);

            let action = match role {
                Role::Add => self.apply_add(item, class, &mut list),
                Role::Drop => apply_drop(item, class, &mut list),
            };
            log_action(item, role, &action);
        }

        list
    }

    fn apply_add(&mut self, item: &str, class: ResultClass, list: &mut WorkingList) -> Action {
        match class {
            ResultClass::Success => {
                list.remove(item);
                self.ledger.finalize(item);
                Action::Completed
            }
            ResultClass::RetryableTransient => Action::Retrying,
            ResultClass::QuotaFull => match self.ledger.take_backup(item) {
                Some(backup) => {
                    list.replace(item, backup.clone());
                    Action::Substituted { backup }
                }
                None => Action::Retrying,
            },
            ResultClass::PermanentFailure | ResultClass::Unknown => {
                if let Some(primary) = self.ledger.reverse(item) {
                    list.replace(item, primary.clone());
                    return Action::Reverted { primary };
                }
                if let Some(backup) = self.ledger.take_backup(item) {
                    list.replace(item, backup.clone());
                    return Action::Substituted { backup };
                }
                list.remove(item);
                Action::Abandoned
            }
        }
    }
}

/// Drop-role CRNs never have backups.
fn apply_drop(item: &str, class: ResultClass, list: &mut WorkingList) -> Action {
    match class {
        ResultClass::Success => {
            list.remove(item);
            Action::Completed
        }
        ResultClass::RetryableTransient | ResultClass::QuotaFull => Action::Retrying,
        ResultClass::PermanentFailure | ResultClass::Unknown => {
            list.remove(item);
            Action::Abandoned
        }
    }
}

fn log_action(item: &str, role: Role, action: &Action) {
    let role = role.label();
    match action {
        Action::Completed => debug!(item, role, "CRN completed"),
        Action::Retrying => info!(item, role, "CRN will be retried"),
        Action::Substituted { backup } => {
            info!(item, role, backup = %backup, "switching to backup CRN");
            metrics::counter!("registration_substitutions_total", "kind" => "backup").increment(1);
        }
        Action::Reverted { primary } => {
            info!(item, role, primary = %primary, "backup CRN failed, returning to primary");
            metrics::counter!("registration_substitutions_total", "kind" => "revert").increment(1);
        }
        Action::Abandoned => warn!(item, role, "CRN will not be retried"),
    }
}
