//! The retention policy evaluator (§4.4): turns the current DONE-backup
//! list into a per-backup verdict, honoring archival pins and a
//! minimum-redundancy floor. Grounded in the teacher's `enforce_retention`
//! (`manager.rs`), generalized from "delete anything older than a
//! duration" into the two policies spec.md names, with the VALID /
//! OBSOLETE / POTENTIALLY_OBSOLETE three-way verdict the teacher's
//! boolean retention check doesn't need.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::backup::BackupInfo;
use crate::error::{Error, Result};

/// A retention-evaluator verdict for one backup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Obsolete,
    /// Recovery-window-only: the backup immediately preceding the last
    /// serving backup, which may still be needed to recover to a point
    /// inside the window.
    PotentiallyObsolete,
}

/// The two policies spec.md §4.4 names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the N newest non-pinned DONE backups.
    Redundancy(u32),
    /// Keep every DONE backup whose `end_time` falls within `duration` of
    /// the evaluator's reference time, plus one more for safety.
    RecoveryWindow(Duration),
}

impl RetentionPolicy {
    /// Parses a policy string in the barman-style grammar:
    /// `REDUNDANCY <n>` or `RECOVERY WINDOW OF <n> {DAY|DAYS|WEEK|WEEKS|MONTH|MONTHS}`.
    pub fn parse(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let tokens: Vec<&str> = upper.split_whitespace().collect();
        match tokens.as_slice() {
            ["REDUNDANCY", n] => {
                let n: u32 = n.parse().map_err(|_| {
                    Error::InvalidRetentionPolicy(s.to_string(), format!("{n:?} is not a number"))
                })?;
                Ok(RetentionPolicy::Redundancy(n))
            }
            ["RECOVERY", "WINDOW", "OF", n, unit] => {
                let n: i64 = n.parse().map_err(|_| {
                    Error::InvalidRetentionPolicy(s.to_string(), format!("{n:?} is not a number"))
                })?;
                let duration = match *unit {
                    "DAY" | "DAYS" => Duration::days(n),
                    "WEEK" | "WEEKS" => Duration::weeks(n),
                    "MONTH" | "MONTHS" => Duration::days(n * 30),
                    other => {
                        return Err(Error::InvalidRetentionPolicy(
                            s.to_string(),
                            format!("unrecognized time unit {other:?}"),
                        ));
                    }
                };
                Ok(RetentionPolicy::RecoveryWindow(duration))
            }
            _ => Err(Error::InvalidRetentionPolicy(
                s.to_string(),
                "expected REDUNDANCY <n> or RECOVERY WINDOW OF <n> <unit>".to_string(),
            )),
        }
    }
}

/// Evaluates a [`RetentionPolicy`] against the current backup list.
pub struct RetentionEvaluator {
    policy: RetentionPolicy,
    minimum_redundancy: u32,
    now: DateTime<Utc>,
}

impl RetentionEvaluator {
    pub fn new(policy: RetentionPolicy, minimum_redundancy: u32) -> Self {
        Self {
            policy,
            minimum_redundancy,
            now: Utc::now(),
        }
    }

    /// Overrides the evaluator's reference time (used by tests that need
    /// a fixed `now` for recovery-window arithmetic).
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Evaluates every DONE backup in `backups` (FAILED and STARTED are
    /// ignored entirely, per §4.4), consulting `is_pinned` for the
    /// pin-immutability rule. Returns a verdict map keyed by backup id.
    pub fn evaluate(
        &self,
        backups: &[BackupInfo],
        is_pinned: impl Fn(&str) -> bool,
    ) -> BTreeMap<String, Verdict> {
        let mut done: Vec<&BackupInfo> = backups.iter().filter(|b| b.status.is_done()).collect();
        done.sort_by(|a, b| a.id.cmp(&b.id));

        let mut verdicts: BTreeMap<String, Verdict> = BTreeMap::new();
        match self.policy {
            RetentionPolicy::Redundancy(n) => self.evaluate_redundancy(&done, n, &is_pinned, &mut verdicts),
            RetentionPolicy::RecoveryWindow(duration) => {
                self.evaluate_recovery_window(&done, duration, &is_pinned, &mut verdicts)
            }
        }

        self.apply_minimum_redundancy_floor(&done, &is_pinned, &mut verdicts);
        verdicts
    }

    fn evaluate_redundancy(
        &self,
        done: &[&BackupInfo],
        n: u32,
        is_pinned: &impl Fn(&str) -> bool,
        out: &mut BTreeMap<String, Verdict>,
    ) {
        let non_pinned: Vec<&&BackupInfo> = done.iter().filter(|b| !is_pinned(&b.id)).collect();
        let keep_count = non_pinned.len().saturating_sub(n as usize);
        for b in done {
            if is_pinned(&b.id) {
                out.insert(b.id.clone(), Verdict::Valid);
                continue;
            }
            let rank = non_pinned.iter().position(|nb| nb.id == b.id).unwrap();
            let verdict = if rank < keep_count {
                Verdict::Obsolete
            } else {
                Verdict::Valid
            };
            out.insert(b.id.clone(), verdict);
        }
    }

    fn evaluate_recovery_window(
        &self,
        done: &[&BackupInfo],
        duration: Duration,
        is_pinned: &impl Fn(&str) -> bool,
        out: &mut BTreeMap<String, Verdict>,
    ) {
        let cutoff = self.now - duration;

        // The most recent DONE backup whose end_time <= cutoff.
        let last_serving = done
            .iter()
            .filter(|b| b.end_time.map(|t| t <= cutoff).unwrap_or(false))
            .max_by_key(|b| b.id.clone())
            .map(|b| b.id.clone());

        let potentially_obsolete_id = last_serving.as_ref().and_then(|last_id| {
            done.iter()
                .filter(|b| b.id.as_str() < last_id.as_str())
                .max_by_key(|b| b.id.clone())
                .map(|b| b.id.clone())
        });

        for b in done {
            if is_pinned(&b.id) {
                out.insert(b.id.clone(), Verdict::Valid);
                continue;
            }
            let verdict = match &last_serving {
                None => Verdict::Valid,
                Some(last_id) => {
                    if b.id.as_str() >= last_id.as_str() {
                        Verdict::Valid
                    } else if Some(&b.id) == potentially_obsolete_id.as_ref() {
                        Verdict::PotentiallyObsolete
                    } else {
                        Verdict::Obsolete
                    }
                }
            };
            out.insert(b.id.clone(), verdict);
        }
    }

    /// Promotes the oldest would-be-obsolete backups back to VALID until
    /// the non-pinned VALID count meets `minimum_redundancy`.
    fn apply_minimum_redundancy_floor(
        &self,
        done: &[&BackupInfo],
        is_pinned: &impl Fn(&str) -> bool,
        out: &mut BTreeMap<String, Verdict>,
    ) {
        if self.minimum_redundancy == 0 {
            return;
        }
        let mut valid_count = done
            .iter()
            .filter(|b| !is_pinned(&b.id) && out.get(&b.id).copied() == Some(Verdict::Valid))
            .count();

        if valid_count >= self.minimum_redundancy as usize {
            return;
        }

        let mut candidates: Vec<&&BackupInfo> = done
            .iter()
            .filter(|b| !is_pinned(&b.id) && out.get(&b.id).copied() != Some(Verdict::Valid))
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        for b in candidates {
            if valid_count >= self.minimum_redundancy as usize {
                break;
            }
            out.insert(b.id.clone(), Verdict::Valid);
            valid_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupFile, Mode};
    use crate::backup::BackupStatus;

    fn done(id: &str, end_time: Option<DateTime<Utc>>) -> BackupInfo {
        BackupInfo {
            id: id.to_string(),
            name: None,
            status: BackupStatus::Done,
            begin_wal: "000000010000000000000001".into(),
            end_wal: "000000010000000000000002".into(),
            mode: Mode::Concurrent,
            snapshots_info: None,
            files: vec![BackupFile {
                oid: None,
                primary_path: Some("data.tar".into()),
                additional_paths: vec![],
            }],
            end_time,
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn parse_redundancy_policy() {
        assert_eq!(
            RetentionPolicy::parse("REDUNDANCY 3").unwrap(),
            RetentionPolicy::Redundancy(3)
        );
    }

    #[test]
    fn parse_recovery_window_policy() {
        assert_eq!(
            RetentionPolicy::parse("RECOVERY WINDOW OF 2 DAYS").unwrap(),
            RetentionPolicy::RecoveryWindow(Duration::days(2))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            RetentionPolicy::parse("NONSENSE"),
            Err(Error::InvalidRetentionPolicy(..))
        ));
    }

    #[test]
    fn redundancy_two_marks_oldest_obsolete() {
        let backups = vec![
            done("20210722T000000", None),
            done("20210723T000000", None),
            done("20210724T000000", None),
            done("20210725T000000", None),
        ];
        let evaluator = RetentionEvaluator::new(RetentionPolicy::Redundancy(2), 0);
        let verdicts = evaluator.evaluate(&backups, |_| false);
        assert_eq!(verdicts["20210722T000000"], Verdict::Obsolete);
        assert_eq!(verdicts["20210723T000000"], Verdict::Obsolete);
        assert_eq!(verdicts["20210724T000000"], Verdict::Valid);
        assert_eq!(verdicts["20210725T000000"], Verdict::Valid);
    }

    #[test]
    fn pinned_backup_is_always_valid() {
        let backups = vec![done("20210722T000000", None), done("20210723T000000", None)];
        let evaluator = RetentionEvaluator::new(RetentionPolicy::Redundancy(1), 0);
        let verdicts = evaluator.evaluate(&backups, |id| id == "20210722T000000");
        assert_eq!(verdicts["20210722T000000"], Verdict::Valid);
    }

    #[test]
    fn minimum_redundancy_floor_promotes_oldest_first() {
        let backups = vec![
            done("20210722T000000", None),
            done("20210723T000000", None),
            done("20210724T000000", None),
        ];
        // Redundancy(1) would leave only the newest valid; floor of 2
        // promotes the next-oldest back to VALID.
        let evaluator = RetentionEvaluator::new(RetentionPolicy::Redundancy(1), 2);
        let verdicts = evaluator.evaluate(&backups, |_| false);
        assert_eq!(verdicts["20210722T000000"], Verdict::Obsolete);
        assert_eq!(verdicts["20210723T000000"], Verdict::Valid);
        assert_eq!(verdicts["20210724T000000"], Verdict::Valid);
    }

    #[test]
    fn recovery_window_e4_scenario() {
        // Mirrors spec.md's E4 end-to-end scenario.
        let backups = vec![
            done("20210722T000000", Some(ts("2021-07-22T17:05:20Z"))),
            done("20210723T000000", Some(ts("2021-07-23T17:05:20Z"))),
            done("20210724T000000", Some(ts("2021-07-24T17:05:20Z"))),
            done("20210725T000000", Some(ts("2021-07-25T17:05:20Z"))),
        ];
        let now = ts("2021-07-27T00:00:00Z");
        let evaluator =
            RetentionEvaluator::new(RetentionPolicy::RecoveryWindow(Duration::days(2)), 0)
                .with_reference_time(now);
        let verdicts = evaluator.evaluate(&backups, |_| false);
        assert_eq!(verdicts["20210725T000000"], Verdict::Valid);
        assert_eq!(verdicts["20210724T000000"], Verdict::Valid);
        assert_eq!(verdicts["20210723T000000"], Verdict::PotentiallyObsolete);
        assert_eq!(verdicts["20210722T000000"], Verdict::Obsolete);
    }

    #[test]
    fn failed_and_started_backups_are_ignored() {
        let mut started = done("20210722T000000", None);
        started.status = BackupStatus::Started;
        let backups = vec![started, done("20210723T000000", None)];
        let evaluator = RetentionEvaluator::new(RetentionPolicy::Redundancy(5), 0);
        let verdicts = evaluator.evaluate(&backups, |_| false);
        assert!(!verdicts.contains_key("20210722T000000"));
        assert_eq!(verdicts["20210723T000000"], Verdict::Valid);
    }
}
