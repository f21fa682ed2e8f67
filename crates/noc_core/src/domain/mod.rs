use serde::{Deserialize, Serialize};

/// Placeholder used wherever an organization, group or status is unknown, and as the
/// `previous_value` of the synthetic status entry written on insert.
pub const NOT_AVAILABLE: &str = "N/A";

/// Status recorded on insert when the feed did not supply one.
pub const NEW_STATUS_MARKER: &str = "NEW";

/// Default `changed_by` actor for feed-driven changes.
pub const SYSTEM_ACTOR: &str = "system";

/// Caller-supplied identity of an incident across re-deliveries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct NaturalKey {
    pub origin: String,
    pub external_id: String,
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.origin, self.external_id)
    }
}

/// Attributes the diff engine compares and records in the audit log.
///
/// Adding a variant forces a matching arm in every accessor below, so each tracked field
/// always has a column, a history label and a value on both sides of the diff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Status,
    Summary,
    City,
    Region,
    Group,
    Cluster,
    Subcluster,
    Category2,
    Category3,
    OperationalCategory2,
    OperationalCategory3,
    Topology,
    TopologyType,
    TreatingOrganization,
    TreatingGroup,
}

impl TrackedField {
    pub const ALL: [TrackedField; 15] = [
        TrackedField::Status,
        TrackedField::Summary,
        TrackedField::City,
        TrackedField::Region,
        TrackedField::Group,
        TrackedField::Cluster,
        TrackedField::Subcluster,
        TrackedField::Category2,
        TrackedField::Category3,
        TrackedField::OperationalCategory2,
        TrackedField::OperationalCategory3,
        TrackedField::Topology,
        TrackedField::TopologyType,
        TrackedField::TreatingOrganization,
        TrackedField::TreatingGroup,
    ];

    /// Label stored in `incident_history.field`.
    pub fn label(self) -> &'static str {
        match self {
            TrackedField::Status => "status",
            TrackedField::Summary => "summary",
            TrackedField::City => "city",
            TrackedField::Region => "region",
            TrackedField::Group => "group",
            TrackedField::Cluster => "cluster",
            TrackedField::Subcluster => "subcluster",
            TrackedField::Category2 => "category2",
            TrackedField::Category3 => "category3",
            TrackedField::OperationalCategory2 => "operational_category2",
            TrackedField::OperationalCategory3 => "operational_category3",
            TrackedField::Topology => "topology",
            TrackedField::TopologyType => "topology_type",
            TrackedField::TreatingOrganization => "treating_organization",
            TrackedField::TreatingGroup => "treating_group",
        }
    }

    /// Column in the `incidents` table. `group` is reserved in SQL.
    pub fn column(self) -> &'static str {
        match self {
            TrackedField::Group => "group_name",
            other => other.label(),
        }
    }

    pub fn from_label(label: &str) -> Option<TrackedField> {
        TrackedField::ALL.into_iter().find(|f| f.label() == label)
    }
}

/// Stored incident row.
///
/// Timestamps are canonical UTC strings (`YYYY-MM-DDTHH:MM:SS.mmmZ`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: i64,
    pub origin: String,
    pub external_id: String,

    pub status: Option<String>,
    pub summary: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub group: Option<String>,
    pub cluster: Option<String>,
    pub subcluster: Option<String>,
    pub category2: Option<String>,
    pub category3: Option<String>,
    pub operational_category2: Option<String>,
    pub operational_category3: Option<String>,
    pub topology: Option<String>,
    pub topology_type: Option<String>,
    pub treating_organization: Option<String>,
    pub treating_group: Option<String>,

    pub started_at: Option<String>,
    pub started_at_raw: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Incident {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            origin: self.origin.clone(),
            external_id: self.external_id.clone(),
        }
    }

    pub fn field(&self, field: TrackedField) -> Option<&str> {
        match field {
            TrackedField::Status => self.status.as_deref(),
            TrackedField::Summary => self.summary.as_deref(),
            TrackedField::City => self.city.as_deref(),
            TrackedField::Region => self.region.as_deref(),
            TrackedField::Group => self.group.as_deref(),
            TrackedField::Cluster => self.cluster.as_deref(),
            TrackedField::Subcluster => self.subcluster.as_deref(),
            TrackedField::Category2 => self.category2.as_deref(),
            TrackedField::Category3 => self.category3.as_deref(),
            TrackedField::OperationalCategory2 => self.operational_category2.as_deref(),
            TrackedField::OperationalCategory3 => self.operational_category3.as_deref(),
            TrackedField::Topology => self.topology.as_deref(),
            TrackedField::TopologyType => self.topology_type.as_deref(),
            TrackedField::TreatingOrganization => self.treating_organization.as_deref(),
            TrackedField::TreatingGroup => self.treating_group.as_deref(),
        }
    }
}

/// One snapshot as delivered by an external feed.
///
/// Every attribute is optional: `None` (absent or `null` in JSON) means the feed has no
/// opinion, never "clear this field".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingIncident {
    pub origin: Option<String>,
    pub external_id: Option<String>,

    pub status: Option<String>,
    pub summary: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub group: Option<String>,
    pub cluster: Option<String>,
    pub subcluster: Option<String>,
    pub category2: Option<String>,
    pub category3: Option<String>,
    pub operational_category2: Option<String>,
    pub operational_category3: Option<String>,
    pub topology: Option<String>,
    pub topology_type: Option<String>,
    pub treating_organization: Option<String>,
    pub treating_group: Option<String>,

    pub started_at: Option<String>,
}

impl IncomingIncident {
    pub fn new(origin: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            external_id: Some(external_id.into()),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field: TrackedField, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match field {
            TrackedField::Status => self.status = value,
            TrackedField::Summary => self.summary = value,
            TrackedField::City => self.city = value,
            TrackedField::Region => self.region = value,
            TrackedField::Group => self.group = value,
            TrackedField::Cluster => self.cluster = value,
            TrackedField::Subcluster => self.subcluster = value,
            TrackedField::Category2 => self.category2 = value,
            TrackedField::Category3 => self.category3 = value,
            TrackedField::OperationalCategory2 => self.operational_category2 = value,
            TrackedField::OperationalCategory3 => self.operational_category3 = value,
            TrackedField::Topology => self.topology = value,
            TrackedField::TopologyType => self.topology_type = value,
            TrackedField::TreatingOrganization => self.treating_organization = value,
            TrackedField::TreatingGroup => self.treating_group = value,
        }
        self
    }

    pub fn field(&self, field: TrackedField) -> Option<&str> {
        match field {
            TrackedField::Status => self.status.as_deref(),
            TrackedField::Summary => self.summary.as_deref(),
            TrackedField::City => self.city.as_deref(),
            TrackedField::Region => self.region.as_deref(),
            TrackedField::Group => self.group.as_deref(),
            TrackedField::Cluster => self.cluster.as_deref(),
            TrackedField::Subcluster => self.subcluster.as_deref(),
            TrackedField::Category2 => self.category2.as_deref(),
            TrackedField::Category3 => self.category3.as_deref(),
            TrackedField::OperationalCategory2 => self.operational_category2.as_deref(),
            TrackedField::OperationalCategory3 => self.operational_category3.as_deref(),
            TrackedField::Topology => self.topology.as_deref(),
            TrackedField::TopologyType => self.topology_type.as_deref(),
            TrackedField::TreatingOrganization => self.treating_organization.as_deref(),
            TrackedField::TreatingGroup => self.treating_group.as_deref(),
        }
    }
}

/// Row inserted on first ingestion of a natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncident {
    pub key: NaturalKey,
    pub fields: Vec<(TrackedField, String)>,
    pub started_at: Option<String>,
    pub started_at_raw: Option<String>,
    pub created_at: String,
}

/// A single tracked field whose incoming value differs from the stored one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: TrackedField,
    pub previous_value: Option<String>,
    pub new_value: String,
}

/// Immutable audit record. `field` is a [`TrackedField::label`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub incident_id: i64,
    pub field: String,
    pub previous_value: Option<String>,
    pub new_value: String,
    pub changed_by: String,
    pub changed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub incident_id: i64,
    pub field: TrackedField,
    pub previous_value: Option<String>,
    pub new_value: String,
    pub changed_by: String,
    pub changed_at: String,
}

/// Most recently changed incident, as seen by the live-selection watcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LatestChange {
    pub incident_id: i64,
    pub key: NaturalKey,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl ValidationWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
