//! Timeline reconstruction.
//!
//! Replays an incident's audit history into "hops": contiguous intervals during which the
//! treating organization, treating group and status were all constant. The replay is a pure
//! function of the incident, its history and `now`; it never fails. Degenerate input
//! (no history, unparseable timestamps, missing values) degrades to placeholders and
//! warnings instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{HistoryEntry, Incident, TrackedField, ValidationWarning, NOT_AVAILABLE};
use crate::error::AppError;
use crate::normalize::timestamps::{format_canonical, parse_rfc3339, unix_millis};
use crate::repo::IncidentStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    /// 1-based position in the timeline.
    pub sequence: usize,
    pub start: String,
    /// `None` for the open hop.
    pub end: Option<String>,
    pub organization: String,
    pub group: String,
    pub status: String,
    /// `(end or now) - start`, never negative.
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineKpis {
    pub total_time_ms: i64,
    pub hop_count: usize,
    pub current_status: String,
    pub current_org: String,
    pub current_group: String,
    pub time_in_current_hop_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub incident_id: i64,
    pub hops: Vec<Hop>,
    pub org_accumulation: BTreeMap<String, i64>,
    pub group_accumulation: BTreeMap<String, i64>,
    pub status_accumulation: BTreeMap<String, i64>,
    pub kpis: TimelineKpis,
    /// True when no transition history existed and the single hop was derived from the
    /// stored record.
    pub synthetic: bool,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HopField {
    Organization,
    Group,
    Status,
}

impl HopField {
    fn from_history_label(label: &str) -> Option<HopField> {
        match TrackedField::from_label(label)? {
            TrackedField::TreatingOrganization => Some(HopField::Organization),
            TrackedField::TreatingGroup => Some(HopField::Group),
            TrackedField::Status => Some(HopField::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HopState {
    organization: Option<String>,
    group: Option<String>,
    status: Option<String>,
}

impl HopState {
    fn slot(&mut self, field: HopField) -> &mut Option<String> {
        match field {
            HopField::Organization => &mut self.organization,
            HopField::Group => &mut self.group,
            HopField::Status => &mut self.status,
        }
    }
}

struct Transition<'a> {
    at: OffsetDateTime,
    field: HopField,
    entry: &'a HistoryEntry,
}

fn placeholder(value: &Option<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn millis_between(start: OffsetDateTime, end: OffsetDateTime) -> i64 {
    (unix_millis(end) - unix_millis(start)).max(0)
}

/// Transition-relevant history entries in replay order: `changed_at` ascending, ties by
/// insertion order.
fn collect_transitions<'a>(
    history: &'a [HistoryEntry],
    warnings: &mut Vec<ValidationWarning>,
) -> Vec<Transition<'a>> {
    let mut transitions = Vec::new();
    for entry in history {
        let Some(field) = HopField::from_history_label(&entry.field) else {
            continue;
        };
        match parse_rfc3339(&entry.changed_at) {
            Some(at) => transitions.push(Transition { at, field, entry }),
            None => warnings.push(
                ValidationWarning::new(
                    "TIMELINE_TS_UNPARSEABLE",
                    "Skipped history entry with unparseable changed_at",
                )
                .with_details(format!(
                    "history_id={}; field={}; changed_at={}",
                    entry.id, entry.field, entry.changed_at
                )),
            ),
        }
    }
    // Stable: equal (at, id) pairs keep their slice order.
    transitions.sort_by(|a, b| a.at.cmp(&b.at).then(a.entry.id.cmp(&b.entry.id)));
    transitions
}

/// Initial values: the pre-transition value of the earliest entry per field, else the
/// stored value as a best-effort guess.
fn seed_state(incident: &Incident, transitions: &[Transition<'_>]) -> HopState {
    let earliest = |field: HopField| {
        transitions
            .iter()
            .find(|t| t.field == field)
            .map(|t| t.entry.previous_value.clone())
    };
    HopState {
        organization: earliest(HopField::Organization)
            .unwrap_or_else(|| incident.treating_organization.clone()),
        group: earliest(HopField::Group).unwrap_or_else(|| incident.treating_group.clone()),
        status: earliest(HopField::Status).unwrap_or_else(|| incident.status.clone()),
    }
}

fn timeline_origin(
    incident: &Incident,
    transitions: &[Transition<'_>],
    now: OffsetDateTime,
    warnings: &mut Vec<ValidationWarning>,
) -> OffsetDateTime {
    let recorded = parse_rfc3339(&incident.created_at)
        .or_else(|| incident.started_at.as_deref().and_then(parse_rfc3339));
    if recorded.is_none() {
        warnings.push(
            ValidationWarning::new(
                "TIMELINE_ORIGIN_UNKNOWN",
                "Neither created_at nor started_at is parseable; timeline starts at first change",
            )
            .with_details(format!("incident_id={}", incident.id)),
        );
    }

    let first = transitions.first().map(|t| t.at);
    match (recorded, first) {
        (Some(r), Some(f)) => r.min(f),
        (Some(r), None) => r,
        (None, Some(f)) => f,
        (None, None) => now,
    }
}

/// Rebuild the hop sequence, accumulations and KPIs for one incident.
pub fn reconstruct(incident: &Incident, history: &[HistoryEntry], now: OffsetDateTime) -> Timeline {
    let mut warnings = Vec::new();
    let transitions = collect_transitions(history, &mut warnings);

    let origin = timeline_origin(incident, &transitions, now, &mut warnings);
    let mut open_start = origin;
    let mut open_state = seed_state(incident, &transitions);
    let mut closed: Vec<(OffsetDateTime, OffsetDateTime, HopState)> = Vec::new();

    for t in &transitions {
        let mut next = open_state.clone();
        *next.slot(t.field) = Some(t.entry.new_value.clone());
        if next == open_state {
            continue;
        }
        if t.at <= open_start {
            // Same instant as the open hop's start (e.g. the creation entry, or several
            // fields changed by one upsert): amend the open hop instead of emitting a
            // zero-length one.
            open_state = next;
            continue;
        }
        let finished = std::mem::replace(&mut open_state, next);
        closed.push((open_start, t.at, finished));
        open_start = t.at;
    }

    let mut hops = Vec::with_capacity(closed.len() + 1);
    for (start, end, state) in closed {
        hops.push(Hop {
            sequence: hops.len() + 1,
            start: format_canonical(start),
            end: Some(format_canonical(end)),
            organization: placeholder(&state.organization),
            group: placeholder(&state.group),
            status: placeholder(&state.status),
            duration_ms: millis_between(start, end),
        });
    }
    hops.push(Hop {
        sequence: hops.len() + 1,
        start: format_canonical(open_start),
        end: None,
        organization: placeholder(&open_state.organization),
        group: placeholder(&open_state.group),
        status: placeholder(&open_state.status),
        duration_ms: millis_between(open_start, now),
    });

    let mut org_accumulation = BTreeMap::new();
    let mut group_accumulation = BTreeMap::new();
    let mut status_accumulation = BTreeMap::new();
    for hop in &hops {
        *org_accumulation.entry(hop.organization.clone()).or_insert(0) += hop.duration_ms;
        *group_accumulation.entry(hop.group.clone()).or_insert(0) += hop.duration_ms;
        *status_accumulation.entry(hop.status.clone()).or_insert(0) += hop.duration_ms;
    }

    let open = &hops[hops.len() - 1];
    let kpis = TimelineKpis {
        total_time_ms: millis_between(origin, now),
        hop_count: hops.len(),
        current_status: open.status.clone(),
        current_org: open.organization.clone(),
        current_group: open.group.clone(),
        time_in_current_hop_ms: open.duration_ms,
    };

    Timeline {
        incident_id: incident.id,
        hops,
        org_accumulation,
        group_accumulation,
        status_accumulation,
        kpis,
        synthetic: transitions.is_empty(),
        warnings,
    }
}

/// Fetch an incident and its history through the store, then reconstruct.
pub fn load_timeline<S: IncidentStore + ?Sized>(
    store: &S,
    incident_id: i64,
    now: OffsetDateTime,
) -> Result<Timeline, AppError> {
    let incident = store.get_incident(incident_id)?;
    let history = store.list_history(incident_id)?;
    Ok(reconstruct(&incident, &history, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::format_description::well_known::Rfc3339;
    use time::Duration;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn t0() -> OffsetDateTime {
        OffsetDateTime::parse("2026-02-01T08:00:00Z", &Rfc3339).unwrap()
    }

    fn at(hours: i64) -> String {
        format_canonical(t0() + Duration::hours(hours))
    }

    fn incident(status: &str, org: Option<&str>, group: Option<&str>) -> Incident {
        Incident {
            id: 1,
            origin: "noc-sp".to_string(),
            external_id: "INC-1".to_string(),
            status: Some(status.to_string()),
            treating_organization: org.map(str::to_string),
            treating_group: group.map(str::to_string),
            created_at: at(0),
            updated_at: at(0),
            ..Incident::default()
        }
    }

    fn entry(id: i64, field: &str, prev: Option<&str>, new: &str, changed_at: String) -> HistoryEntry {
        HistoryEntry {
            id,
            incident_id: 1,
            field: field.to_string(),
            previous_value: prev.map(str::to_string),
            new_value: new.to_string(),
            changed_by: "system".to_string(),
            changed_at,
        }
    }

    #[test]
    fn status_change_after_creation_yields_two_hops() {
        let inc = incident("DESIGNADO", Some("NOC"), Some("N1"));
        let history = vec![
            entry(1, "status", Some("N/A"), "NOVO", at(0)),
            entry(2, "status", Some("NOVO"), "DESIGNADO", at(1)),
        ];

        let tl = reconstruct(&inc, &history, t0() + Duration::hours(3));

        assert_eq!(tl.hops.len(), 2);
        assert_eq!(tl.hops[0].start, at(0));
        assert_eq!(tl.hops[0].end, Some(at(1)));
        assert_eq!(tl.hops[0].status, "NOVO");
        assert_eq!(tl.hops[1].start, at(1));
        assert_eq!(tl.hops[1].end, None);
        assert_eq!(tl.hops[1].status, "DESIGNADO");
        assert_eq!(
            tl.status_accumulation,
            BTreeMap::from([("NOVO".to_string(), HOUR_MS), ("DESIGNADO".to_string(), 2 * HOUR_MS)])
        );
        assert_eq!(tl.kpis.total_time_ms, 3 * HOUR_MS);
        assert_eq!(tl.kpis.time_in_current_hop_ms, 2 * HOUR_MS);
        assert_eq!(tl.kpis.current_status, "DESIGNADO");
        assert!(!tl.synthetic);
    }

    #[test]
    fn no_history_falls_back_to_one_synthetic_hop() {
        let inc = incident("NOVO", None, None);
        let tl = reconstruct(&inc, &[], t0() + Duration::minutes(30));

        assert_eq!(tl.hops.len(), 1);
        assert!(tl.synthetic);
        let hop = &tl.hops[0];
        assert_eq!(hop.start, at(0));
        assert_eq!(hop.end, None);
        assert_eq!(hop.organization, "N/A");
        assert_eq!(hop.group, "N/A");
        assert_eq!(hop.duration_ms, 30 * 60 * 1000);
    }

    #[test]
    fn single_transition_without_creation_entry_yields_two_hops() {
        let inc = incident("EM TRATAMENTO", Some("NOC"), Some("N1"));
        let history = vec![entry(5, "status", Some("NOVO"), "EM TRATAMENTO", at(2))];

        let tl = reconstruct(&inc, &history, t0() + Duration::hours(4));
        assert_eq!(tl.hops.len(), 2);
        assert_eq!(tl.hops[0].status, "NOVO");
        assert_eq!(tl.hops[0].duration_ms, 2 * HOUR_MS);
        assert_eq!(tl.hops[1].status, "EM TRATAMENTO");
    }

    #[test]
    fn ownership_changes_delimit_hops_and_other_fields_do_not() {
        let inc = incident("DESIGNADO", Some("CAMPO"), Some("FIELD-SUL"));
        let history = vec![
            entry(1, "status", Some("N/A"), "NOVO", at(0)),
            entry(2, "city", None, "Curitiba", at(1)),
            entry(3, "treating_organization", Some("NOC"), "CAMPO", at(2)),
            entry(4, "treating_group", Some("N1"), "FIELD-SUL", at(2)),
            entry(5, "status", Some("NOVO"), "DESIGNADO", at(2)),
        ];

        let tl = reconstruct(&inc, &history, t0() + Duration::hours(5));

        assert_eq!(tl.hops.len(), 2);
        assert_eq!(
            (tl.hops[0].organization.as_str(), tl.hops[0].group.as_str(), tl.hops[0].status.as_str()),
            ("NOC", "N1", "NOVO")
        );
        assert_eq!(
            (tl.hops[1].organization.as_str(), tl.hops[1].group.as_str(), tl.hops[1].status.as_str()),
            ("CAMPO", "FIELD-SUL", "DESIGNADO")
        );
        assert_eq!(tl.org_accumulation["NOC"], 2 * HOUR_MS);
        assert_eq!(tl.org_accumulation["CAMPO"], 3 * HOUR_MS);
        assert_eq!(tl.kpis.current_org, "CAMPO");
        assert_eq!(tl.kpis.current_group, "FIELD-SUL");
    }

    #[test]
    fn hops_are_contiguous_and_accumulations_conserve_time() {
        let inc = incident("FECHADO", Some("NOC"), Some("N2"));
        let history = vec![
            entry(1, "status", Some("N/A"), "NOVO", at(0)),
            entry(2, "treating_group", Some("N1"), "N2", at(1)),
            entry(3, "status", Some("NOVO"), "EM TRATAMENTO", at(3)),
            entry(4, "status", Some("EM TRATAMENTO"), "FECHADO", at(6)),
        ];
        let now = t0() + Duration::hours(8);
        let tl = reconstruct(&inc, &history, now);

        assert_eq!(tl.hops.len(), 4);
        for pair in tl.hops.windows(2) {
            assert_eq!(pair[0].end.as_deref(), Some(pair[1].start.as_str()));
        }
        assert_eq!(tl.hops.last().unwrap().end, None);
        assert_eq!(
            tl.hops.iter().map(|h| h.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );

        let hop_sum: i64 = tl.hops.iter().map(|h| h.duration_ms).sum();
        assert_eq!(tl.org_accumulation.values().sum::<i64>(), hop_sum);
        assert_eq!(tl.status_accumulation.values().sum::<i64>(), hop_sum);
        assert_eq!(tl.group_accumulation.values().sum::<i64>(), hop_sum);
        assert_eq!(hop_sum, tl.kpis.total_time_ms);
    }

    #[test]
    fn replay_sorts_out_of_order_input_and_breaks_ties_by_id() {
        let inc = incident("C", None, None);
        let history = vec![
            entry(3, "status", Some("B"), "C", at(2)),
            entry(1, "status", Some("N/A"), "A", at(0)),
            entry(2, "status", Some("A"), "B", at(2)),
        ];
        let tl = reconstruct(&inc, &history, t0() + Duration::hours(3));

        // A..2h, then B and C at the same instant fold into one hop ending in C.
        assert_eq!(tl.hops.len(), 2);
        assert_eq!(tl.hops[0].status, "A");
        assert_eq!(tl.hops[1].status, "C");
    }

    #[test]
    fn unparseable_changed_at_is_skipped_with_warning() {
        let inc = incident("B", None, None);
        let history = vec![
            entry(1, "status", Some("N/A"), "A", at(0)),
            entry(2, "status", Some("A"), "B", "not-a-time".to_string()),
        ];
        let tl = reconstruct(&inc, &history, t0() + Duration::hours(1));

        assert_eq!(tl.hops.len(), 1);
        assert_eq!(tl.hops[0].status, "A");
        assert_eq!(tl.warnings.len(), 1);
        assert_eq!(tl.warnings[0].code, "TIMELINE_TS_UNPARSEABLE");
    }

    #[test]
    fn clock_behind_start_never_yields_negative_durations() {
        let inc = incident("NOVO", None, None);
        let tl = reconstruct(&inc, &[], t0() - Duration::minutes(5));
        assert_eq!(tl.hops[0].duration_ms, 0);
        assert_eq!(tl.kpis.total_time_ms, 0);
    }

    #[test]
    fn started_at_is_used_when_created_at_is_unusable() {
        let mut inc = incident("NOVO", None, None);
        inc.created_at = "garbage".to_string();
        inc.started_at = Some(at(-2));
        let tl = reconstruct(&inc, &[], t0());
        assert_eq!(tl.hops[0].start, at(-2));
        assert_eq!(tl.kpis.total_time_ms, 2 * HOUR_MS);
    }
}
